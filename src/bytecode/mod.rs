//! Backend de bytecode.
//!
//! La compilación a bytecode ocurre en tres etapas independientes:
//!
//! 1. [`generate()`] traduce el AST a texto `flb`, una lista de
//!    secciones con instrucciones de máquina de pila en forma textual.
//! 2. [`encode()`] convierte ese texto a una secuencia de [`Item`]s
//!    con opcodes y operandos ya codificados, dejando referencias
//!    simbólicas pendientes. Su forma textual es `flenc`.
//! 3. [`link()`] concatena los ítems detrás de un encabezado, resuelve
//!    los símbolos y parcha cada referencia en su lugar, produciendo la
//!    imagen `flbb` que ejecuta la máquina virtual.

use crate::ast::Kind;

mod emit;
mod encode;
mod link;

pub use emit::generate;
pub use encode::{encode, EncodeError, Item};
pub use link::{link, LinkError};

/// Los slots de locales se numeran desde aquí, por encima de
/// cualquier slot global.
pub const LOCAL_SLOT_BASE: u64 = 1 << 32;

/// Tres desplazamientos de 64 bits: `spark`, `__globals` y `unreachable`.
pub const HEADER_SIZE: u64 = 24;

/// Nombre de la sección sintética de inicialización de globales.
pub const GLOBALS_SECTION: &str = "__globals";

/// Funciones nativas de la máquina virtual, en orden de índice.
pub const NATIVES: [&str; 4] = ["printc", "allocate", "deallocate", "do_exit"];

macro_rules! opcodes {
    ($($opcode:ident = $value:literal => $mnemonic:literal),* $(,)?) => {
        /// Opcode de la máquina virtual.
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        #[repr(u8)]
        pub enum Opcode {
            $($opcode = $value),*
        }

        impl Opcode {
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$opcode => $mnemonic),*
                }
            }

            pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
                match mnemonic {
                    $($mnemonic => Some(Opcode::$opcode),)*
                    _ => None,
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = u8;

            fn try_from(byte: u8) -> Result<Self, u8> {
                match byte {
                    $($value => Ok(Opcode::$opcode),)*
                    _ => Err(byte),
                }
            }
        }
    };
}

opcodes! {
    Global = 0 => "global",
    Assign = 2 => "assign",
    AssignIndexed = 3 => "assign_indexed",
    Load = 4 => "load",
    LoadIndexed = 5 => "load_indexed",
    Number = 6 => "number",
    String = 7 => "string",
    Goto = 8 => "goto",
    GotoTrue = 9 => "goto_true",
    GotoFalse = 10 => "goto_false",
    Invoke = 11 => "invoke",
    InvokeNative = 12 => "invoke_native",
    Return = 14 => "return",
    Variable = 15 => "variable",
    Increase = 16 => "increase",
    Decrease = 17 => "decrease",
    Add = 18 => "add",
    Sub = 19 => "sub",
    Mul = 20 => "mul",
    Div = 21 => "div",
    Mod = 22 => "mod",
    Less = 23 => "less",
    LessEquals = 24 => "less_equals",
    More = 25 => "more",
    MoreEquals = 26 => "more_equals",
    Equals = 27 => "equals",
    NotEquals = 28 => "not_equals",
    Or = 29 => "or",
    And = 30 => "and",
    Xor = 31 => "xor",
    Not = 32 => "not",
    ShiftLeft = 33 => "shift_left",
    ShiftRight = 34 => "shift_right",
    Invert = 35 => "invert",
    NoReturn = 99 => "noreturn",
    Delete = 100 => "delete",
}

/// Etiqueta numérica de un tipo de dato en la imagen.
pub fn type_tag(kind: Kind) -> u8 {
    match kind {
        Kind::Int => 1,
        Kind::Chr => 2,
        Kind::Str => 3,
    }
}

fn kind_from_name(name: &str) -> Option<Kind> {
    match name {
        "int" => Some(Kind::Int),
        "chr" => Some(Kind::Chr),
        "str" => Some(Kind::Str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_match_the_vm_table() {
        assert_eq!(Opcode::Global as u8, 0);
        assert_eq!(Opcode::Return as u8, 14);
        assert_eq!(Opcode::Invert as u8, 35);
        assert_eq!(Opcode::Delete as u8, 100);

        assert_eq!(Opcode::from_mnemonic("goto_false"), Some(Opcode::GotoFalse));
        assert_eq!(Opcode::try_from(99), Ok(Opcode::NoReturn));
        assert_eq!(Opcode::try_from(1), Err(1));
        assert_eq!(Opcode::try_from(13), Err(13));
    }
}
