//! Reporte de errores de código fuente.
//!
//! Los errores léxicos y sintácticos se acumulan con su desplazamiento
//! original y solo se traducen a una posición legible al momento de
//! reportarse, utilizando el [`Source`] correspondiente.

use crate::source::{Located, Source};
use std::{
    error::Error,
    fmt::{self, Display},
};

mod sealed {
    pub trait Sealed {}
}

/// Un error con ubicación en el texto fuente.
pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn offset(&self) -> usize;
}

/// Colección de errores ubicados lista para mostrarse.
pub struct Diagnostics<'a> {
    kind: &'static str,
    source: &'a Source,
    errors: Vec<Box<dyn 'a + LocatedError>>,
}

impl<'a> Diagnostics<'a> {
    /// Construye un reporte a partir de uno o más errores.
    pub fn new<E, I>(source: &'a Source, errors: I) -> Self
    where
        E: 'a + LocatedError,
        I: IntoIterator<Item = E>,
    {
        let errors = errors
            .into_iter()
            .map(|error| {
                let error: Box<dyn 'a + LocatedError> = Box::new(error);
                error
            })
            .collect();

        Diagnostics {
            kind: "error",
            source,
            errors,
        }
    }

    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }

    /// Cantidad de errores reportados.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Display for Diagnostics<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics {
            kind,
            source,
            errors,
        } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.source())?;

            let position = source.resolve(error.offset());
            writeln!(fmt, " --> {}", position)?;

            let digits = position.line().to_string().chars().count();
            writeln!(fmt, "{:digits$} |", "", digits = digits)?;
            writeln!(
                fmt,
                "{:>digits$} | {}",
                position.line(),
                position.text(),
                digits = digits
            )?;

            let skip = (position.column() - 1) as usize;
            writeln!(
                fmt,
                "{:digits$} | {:skip$}^",
                "",
                "",
                digits = digits,
                skip = skip
            )?;

            writeln!(fmt)?;
        }

        let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
        writeln!(
            fmt,
            "Build failed with {} {}",
            errors.len(),
            error_or_errors
        )
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn offset(&self) -> usize {
        Located::offset(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::LexerError;

    #[test]
    fn renders_caret_under_offending_column() {
        let source = Source::new("main.fl", "int x;\nint $y;\n".to_owned());
        let error = Located::at(LexerError::BadChar('$'), 11);

        let rendered = Diagnostics::new(&source, vec![error]).to_string();
        assert!(rendered.contains("error: Bad character '$' in input stream"));
        assert!(rendered.contains(" --> main.fl:2:5"));
        assert!(rendered.contains("2 | int $y;"));
        assert!(rendered.contains("  |     ^"));
        assert!(rendered.ends_with("Build failed with 1 error\n"));
    }
}
