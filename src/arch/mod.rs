//! Detalles específicos para cada arquitectura objetivo.
//!
//! Este módulo expone la interfaz de emisión de instrucciones que
//! implementa cada arquitectura. El algoritmo de generación de código
//! en sí (cascada de registros, tablas de símbolos, etiquetas y
//! eliminación de código muerto) vive en [`crate::codegen`] y es el
//! mismo para todas; cada arquitectura solo aporta mnemónicos, nombres
//! de registros y detalles de su convención de llamada. En general,
//! debe utilizarse la macro `dispatch_arch!()` para acceder a estas
//! implementaciones.

use crate::ast::{BinOp, CmpOp, UnOp};
use std::{
    fmt::Display,
    io::{self, Write},
    str::FromStr,
};

/// Arquitectura de procesador (ISA).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Riscv64,
}

impl Arch {
    /// Extensión convencional de archivos de ensamblador.
    pub fn asm_extension(self) -> &'static str {
        match self {
            Arch::X86_64 => "asm",
            Arch::Riscv64 => "S",
        }
    }
}

impl FromStr for Arch {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "x86_64" => Ok(Arch::X86_64),
            "riscv64" => Ok(Arch::Riscv64),
            _ => Err(()),
        }
    }
}

mod riscv64;
mod x86_64;

pub use riscv64::Emitter as Riscv64;
pub use x86_64::Emitter as X86_64;

/// Ubicación de almacenamiento de una variable.
#[derive(Copy, Clone, Debug)]
pub enum Place<'a> {
    /// Slot del stack frame, por desplazamiento desde su inicio.
    Local(u32),

    /// Etiqueta en la sección de datos.
    Global(&'a str),
}

/// Valor inicial de una global en la sección de datos.
#[derive(Copy, Clone, Debug)]
pub enum Datum<'a> {
    Quad(i64),
    Byte(u8),
    Address(&'a str),
}

/// Emisión de código ensamblador.
///
/// Los tipos que implementan este trait traducen operaciones
/// primitivas a texto de ensamblador para la arquitectura objetivo.
/// Los registros que reciben los métodos siempre provienen de
/// [`Emitter::FILE`].
pub trait Emitter {
    /// Tipo de registro.
    type Register: Register + 'static;

    /// Lista ordenada de registros para la cascada. Los primeros `n`
    /// registros reciben los argumentos de una llamada y el primero
    /// contiene el valor de retorno.
    const FILE: &'static [Self::Register];

    /// Bytes al inicio del frame que no pertenecen a locales.
    const RESERVED: u32;

    /// Encabezado de la sección de código.
    fn text(out: &mut dyn Write) -> io::Result<()>;

    /// Encabezado de la sección de datos.
    fn data(out: &mut dyn Write) -> io::Result<()>;

    /// Exporta un símbolo.
    fn export(out: &mut dyn Write, symbol: &str) -> io::Result<()>;

    /// Define una etiqueta en la posición actual.
    fn label(out: &mut dyn Write, label: &str) -> io::Result<()> {
        writeln!(out, "{}:", label)
    }

    /// Crea el stack frame de una función.
    fn prologue(out: &mut dyn Write, frame: u32) -> io::Result<()>;

    /// Destruye el stack frame y retorna, o cae en la trampa de
    /// código inalcanzable para funciones `noreturn`.
    fn epilogue(out: &mut dyn Write, frame: u32, noreturn: bool) -> io::Result<()>;

    fn jump(out: &mut dyn Write, label: &str) -> io::Result<()>;

    fn jump_if_zero(out: &mut dyn Write, test: Self::Register, label: &str) -> io::Result<()>;

    fn jump_if_not_zero(out: &mut dyn Write, test: Self::Register, label: &str) -> io::Result<()>;

    fn load_const(out: &mut dyn Write, target: Self::Register, value: i64) -> io::Result<()>;

    fn load_address(out: &mut dyn Write, target: Self::Register, label: &str) -> io::Result<()>;

    /// Lee una variable de `size` bytes, extendiendo con ceros.
    fn load(out: &mut dyn Write, target: Self::Register, place: Place, size: u32) -> io::Result<()>;

    /// Escribe los `size` bytes menos significativos de un registro.
    fn store(out: &mut dyn Write, place: Place, value: Self::Register, size: u32) -> io::Result<()>;

    /// Suma `delta` a una variable en su ubicación.
    fn step(out: &mut dyn Write, place: Place, size: u32, delta: i8) -> io::Result<()>;

    /// `base = *(base + index * size)`
    fn load_element(
        out: &mut dyn Write,
        base: Self::Register,
        index: Self::Register,
        size: u32,
    ) -> io::Result<()>;

    /// `*(base + index * size) = value`
    fn store_element(
        out: &mut dyn Write,
        base: Self::Register,
        index: Self::Register,
        value: Self::Register,
        size: u32,
    ) -> io::Result<()>;

    /// `target = target <op> operand`
    fn binary(
        out: &mut dyn Write,
        op: BinOp,
        target: Self::Register,
        operand: Self::Register,
    ) -> io::Result<()>;

    /// `target = (target <op> operand) ? 1 : 0`
    fn compare(
        out: &mut dyn Write,
        op: CmpOp,
        target: Self::Register,
        operand: Self::Register,
        scratch: Self::Register,
        label: &str,
    ) -> io::Result<()>;

    /// `target = (target == 0) ? 1 : 0`
    fn not(out: &mut dyn Write, target: Self::Register) -> io::Result<()>;

    fn unary(out: &mut dyn Write, op: UnOp, target: Self::Register) -> io::Result<()>;

    /// `target = target & (1 << index)`
    fn bit_test(
        out: &mut dyn Write,
        target: Self::Register,
        index: Self::Register,
        scratch: Self::Register,
    ) -> io::Result<()>;

    /// Preserva registros alrededor de una llamada.
    fn save(out: &mut dyn Write, registers: &[Self::Register]) -> io::Result<()>;

    /// Restaura lo que preservó [`Emitter::save()`].
    fn restore(out: &mut dyn Write, registers: &[Self::Register]) -> io::Result<()>;

    fn call(out: &mut dyn Write, function: &str) -> io::Result<()>;

    fn copy(out: &mut dyn Write, to: Self::Register, from: Self::Register) -> io::Result<()>;

    /// Define una global en la sección de datos.
    fn datum(out: &mut dyn Write, label: &str, datum: Datum) -> io::Result<()>;

    /// Define una cadena terminada en NUL en la sección de datos.
    fn string(out: &mut dyn Write, label: &str, content: &str) -> io::Result<()>;

    /// Adaptador de `main(argc, argv)` de la ABI de C hacia la
    /// convención interna, invocando a `entry`.
    fn entry(out: &mut dyn Write, entry: &str) -> io::Result<()>;

    /// Rutina de trampa que termina el proceso con estado 1.
    fn trap(out: &mut dyn Write, name: &str) -> io::Result<()>;
}

/// Registro de procesador.
pub trait Register: Copy + Display + PartialEq {}

/// Divide una cadena en fragmentos imprimibles y bytes numéricos.
///
/// Ambos ensambladores aceptan listas separadas por comas de
/// fragmentos entre comillas y enteros.
pub(crate) fn byte_list(content: &str) -> String {
    let mut items = Vec::new();
    let mut quoted = String::new();

    for byte in content.bytes() {
        if (b' '..=b'~').contains(&byte) && byte != b'"' && byte != b'\\' {
            quoted.push(byte as char);
        } else {
            if !quoted.is_empty() {
                items.push(format!("\"{}\"", std::mem::take(&mut quoted)));
            }

            items.push(byte.to_string());
        }
    }

    if !quoted.is_empty() {
        items.push(format!("\"{}\"", quoted));
    }

    items.push(String::from("0"));
    items.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_lists_escape_control_characters() {
        assert_eq!(byte_list("hi"), "\"hi\", 0");
        assert_eq!(byte_list("a\nb"), "\"a\", 10, \"b\", 0");
        assert_eq!(byte_list(""), "0");
    }
}
