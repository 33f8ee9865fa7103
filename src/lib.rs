//! Compilador e intérprete para el lenguaje firestorm.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente. Este
//! archivo se expande primero por [`preprocess`], que anexa los
//! archivos incluidos entre marcas de ubicación. El texto resultante
//! se somete a análisis léxico en [`lex`], de lo cual se obtiene un
//! flujo de tokens. El flujo de tokens se dispone en un AST ([`ast`])
//! por medio de análisis sintáctico en [`parse`]. Los errores de estas
//! fases conservan su desplazamiento y se reportan con [`error`] y
//! [`source`].
//!
//! # Back ends
//! El mismo AST alimenta cuatro consumidores independientes:
//!
//! - generación de ensamblador x86-64 y RISC-V en [`codegen`], con
//!   las tablas de instrucciones de cada ISA en [`arch`];
//! - compilación a bytecode, codificación y enlazado en [`bytecode`];
//! - interpretación directa con un heap simulado en [`interp`].
//!
//! Las tablas de símbolos y el grafo de llamadas que comparten los
//! backends viven en [`semantic`]. [`target`] expone los backends
//! compiladores detrás de una misma interfaz y [`link`] delega el
//! ensamblado y enlazado a la toolchain externa.

#[macro_use]
mod macros;

pub mod arch;
pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod error;
pub mod interp;
pub mod lex;
pub mod link;
pub mod parse;
pub mod preprocess;
pub mod semantic;
pub mod source;
pub mod target;
