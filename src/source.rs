//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos internos que el compilador construye
//! deben llevar cuenta de la posición en el código fuente donde
//! se originan, lo cual permite determinar un punto exacto en
//! donde ocurre un error. Internamente se trabaja únicamente con
//! desplazamientos en bytes sobre el texto ya preprocesado; la
//! conversión a archivo, línea y columna ocurre solo al reportar.
//!
//! # Marcas de inclusión
//! El preprocesador anexa cada archivo incluido entre líneas
//! `//@file <nombre>` y `//@endfile`. Al resolver una posición se
//! reproduce esta pila de inclusión para recuperar el archivo
//! original y la línea relativa al mismo.

use std::fmt::{self, Debug, Display, Formatter};

/// Marca de inicio de archivo incluido.
pub const FILE_MARKER: &str = "//@file ";

/// Marca de fin de archivo incluido.
pub const END_FILE_MARKER: &str = "//@endfile";

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located<T> {
    offset: usize,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene el desplazamiento en bytes.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (usize, T) {
        (self.offset, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, offset: usize) -> Self {
        Located { value, offset }
    }

    /// Transforma el valor con la misma ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            offset: self.offset,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Texto fuente expandido junto al nombre del archivo raíz.
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    /// Construye un origen a partir del texto ya preprocesado.
    pub fn new<S: Into<String>>(name: S, text: String) -> Self {
        Source {
            name: name.into(),
            text,
        }
    }

    /// Obtiene el nombre del archivo raíz.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Obtiene el texto completo.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resuelve un desplazamiento a una posición legible.
    ///
    /// Desplazamientos más allá del final del texto se ubican al
    /// final de la última línea.
    pub fn resolve(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());

        let mut line_start = 0;
        let mut line_index = 0;
        for (index, byte) in self.text.bytes().enumerate().take(offset) {
            if byte == b'\n' {
                line_start = index + 1;
                line_index += 1;
            }
        }

        let line_text = self.text[line_start..]
            .split('\n')
            .next()
            .unwrap_or_default();

        // Se reproduce la pila de inclusión hasta la línea del error
        let mut stack = vec![(0, self.name.as_str())];
        for (index, line) in self.text.lines().enumerate().take(line_index) {
            if let Some(name) = line.strip_prefix(FILE_MARKER) {
                stack.push((index + 1, name.trim_end()));
            } else if line.starts_with(END_FILE_MARKER) && stack.len() > 1 {
                stack.pop();
            }
        }

        let (base, file) = stack[stack.len() - 1];
        Position {
            file: file.to_owned(),
            line: (line_index - base + 1) as u32,
            column: (offset - line_start + 1) as u32,
            text: line_text.to_owned(),
        }
    }
}

/// Una posición archivo-línea-columna.
#[derive(Clone, PartialEq, Eq)]
pub struct Position {
    file: String,
    line: u32,
    column: u32,
    text: String,
}

impl Position {
    /// Obtiene el archivo original.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Obtiene el número de línea, relativo al archivo original.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Obtiene el contenido de la línea.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}:{}", self.file, self.line, self.column)
    }
}

impl Debug for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_root_lines() {
        let source = Source::new("main.fl", "int x;\nint y = 3;\n".to_owned());
        let position = source.resolve(11);

        assert_eq!(position.file(), "main.fl");
        assert_eq!(position.line(), 2);
        assert_eq!(position.column(), 5);
        assert_eq!(position.text(), "int y = 3;");
    }

    #[test]
    fn replays_inclusion_markers() {
        let text = "int a;\n\n//@file lib/io.fl\nint b;\nint c;\n//@endfile\n";
        let source = Source::new("main.fl", text.to_owned());

        let offset = text.find("int c").unwrap();
        let position = source.resolve(offset);
        assert_eq!(position.file(), "lib/io.fl");
        assert_eq!(position.line(), 2);
        assert_eq!(position.column(), 1);

        assert_eq!(source.resolve(0).file(), "main.fl");
    }
}
