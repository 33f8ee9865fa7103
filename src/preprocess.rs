//! Expansión de directivas `$include`.
//!
//! Cada directiva `$include <ruta>` se elimina del texto y el archivo
//! referido se anexa al final, delimitado por las marcas que
//! [`Source`](crate::source::Source) utiliza para recuperar posiciones
//! originales. Un archivo se incluye a lo sumo una vez por unidad.

use log::debug;
use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::source::{END_FILE_MARKER, FILE_MARKER};

const DIRECTIVE: &str = "$include";

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Could not include `{0}`")]
    NotFound(String),

    #[error("Failed to read `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Estado de inclusión de una unidad.
pub struct Preprocessor {
    include_paths: Vec<PathBuf>,
    included: HashSet<String>,
}

impl Preprocessor {
    pub fn new<I>(include_paths: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        Preprocessor {
            include_paths: include_paths.into_iter().map(Into::into).collect(),
            included: HashSet::new(),
        }
    }

    pub fn preprocess(&mut self, code: &str) -> Result<String, PreprocessError> {
        let (mut expanded, includes) = directives(code);

        for include in includes {
            let text = self.read(&include)?;
            if !self.included.insert(include.clone()) {
                continue;
            }

            debug!("Including `{}`", include);
            let text = self.preprocess(&text)?;

            expanded.push('\n');
            expanded.push_str(FILE_MARKER);
            expanded.push_str(&include);
            expanded.push('\n');
            expanded.push_str(&text);
            expanded.push('\n');
            expanded.push_str(END_FILE_MARKER);
            expanded.push('\n');
        }

        Ok(expanded)
    }

    /// Busca primero la ruta tal cual y luego bajo cada ruta de inclusión.
    fn read(&self, include: &str) -> Result<String, PreprocessError> {
        let candidates = std::iter::once(PathBuf::from(include))
            .chain(self.include_paths.iter().map(|path| path.join(include)));

        for candidate in candidates {
            match fs::read_to_string(&candidate) {
                Ok(text) => return Ok(text),
                Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(PreprocessError::Io { path: candidate, source }),
            }
        }

        Err(PreprocessError::NotFound(include.to_owned()))
    }
}

/// Separa el texto sin directivas de las rutas incluidas, en orden.
fn directives(code: &str) -> (String, Vec<String>) {
    let mut stripped = String::with_capacity(code.len());
    let mut includes = Vec::new();
    let mut rest = code;

    while let Some(start) = rest.find(DIRECTIVE) {
        stripped.push_str(&rest[..start]);

        let after = &rest[start + DIRECTIVE.len()..];
        match target(after) {
            Some((path, tail)) => {
                includes.push(path.to_owned());
                rest = tail;
            }

            None => {
                stripped.push_str(DIRECTIVE);
                rest = after;
            }
        }
    }

    stripped.push_str(rest);
    (stripped, includes)
}

/// Reconoce ` <ruta>`, con espacio opcional.
fn target(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix(' ').unwrap_or(text);
    let text = text.strip_prefix('<')?;
    let end = text.find('>')?;

    let path = &text[..end];
    let valid = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '/' | '.' | '-'));

    valid.then(|| (path, &text[end + 1..]))
}

/// Rutas de inclusión por omisión para un objetivo.
pub fn default_include_paths(target: &str) -> Vec<PathBuf> {
    let stdlib = Path::new("stdlib");
    vec![
        stdlib.to_path_buf(),
        PathBuf::from("/usr/firestorm/include"),
        stdlib.join(target),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use tempfile::tempdir;

    #[test]
    fn directives_are_stripped() {
        let (text, includes) = directives("$include <a.fl>\nint x;$include<lib/b.fl>\n$include x");
        assert_eq!(text, "\nint x;\n$include x");
        assert_eq!(includes, vec!["a.fl", "lib/b.fl"]);
    }

    #[test]
    fn includes_once_with_markers() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("io.fl"), "$include <mem.fl>\nint io;").unwrap();
        fs::write(dir.path().join("mem.fl"), "int mem;").unwrap();

        let mut preprocessor = Preprocessor::new([dir.path()]);
        let text = preprocessor
            .preprocess("$include <io.fl>\n$include <mem.fl>\nint main;")
            .unwrap();

        assert_eq!(text.matches("int mem;").count(), 1);
        assert!(text.starts_with("\n\nint main;\n//@file io.fl\n"));

        // La posición de `int io` se resuelve dentro de io.fl
        let source = Source::new("main.fl", text.clone());
        let position = source.resolve(text.find("int io").unwrap());
        assert_eq!(position.file(), "io.fl");
        assert_eq!(position.line(), 2);
    }

    #[test]
    fn missing_files_fail() {
        let mut preprocessor = Preprocessor::new(Vec::<PathBuf>::new());
        assert!(matches!(
            preprocessor.preprocess("$include <nowhere.fl>"),
            Err(PreprocessError::NotFound(path)) if path == "nowhere.fl"
        ));
    }
}
