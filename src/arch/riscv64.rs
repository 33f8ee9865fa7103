use super::{Datum, Place};
use crate::ast::{BinOp, CmpOp, UnOp};

use std::{
    fmt,
    io::{self, Write},
};

/// Emisor para RV64IM en sintaxis de GNU as.
pub struct Emitter;

/// Registro entero `xN`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reg(u8);

impl super::Register for Reg {}

impl fmt::Display for Reg {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "x{}", self.0)
    }
}

// Temporales fuera de la cascada, nunca preservados entre operaciones
const SCRATCH: Reg = Reg(30);
const ADDRESS: Reg = Reg(31);

/// `s0` es el frame pointer. Las locales se direccionan relativas a
/// él ya que `sp` se mueve al preservar registros en llamadas.
const FRAME_POINTER: &str = "s0";

/// Inmediatos de 12 bits con signo, como en `addi` y `ld`.
fn fits_immediate(value: i64) -> bool {
    (-2048..2048).contains(&value)
}

/// Resuelve una ubicación a un operando `offset(base)`.
fn address(out: &mut dyn Write, place: Place) -> io::Result<String> {
    match place {
        Place::Local(offset) if fits_immediate(offset.into()) => {
            Ok(format!("{}({})", offset, FRAME_POINTER))
        }

        Place::Local(offset) => {
            emit!(out, "li", "{}, {}", ADDRESS, offset)?;
            emit!(out, "add", "{0}, {0}, {1}", ADDRESS, FRAME_POINTER)?;
            Ok(format!("0({})", ADDRESS))
        }

        Place::Global(label) => {
            emit!(out, "la", "{}, {}", ADDRESS, label)?;
            Ok(format!("0({})", ADDRESS))
        }
    }
}

fn load_opcode(size: u32) -> &'static str {
    if size == 1 {
        "lbu"
    } else {
        "ld"
    }
}

fn store_opcode(size: u32) -> &'static str {
    if size == 1 {
        "sb"
    } else {
        "sd"
    }
}

/// Escapa una cadena para `.string`, que agrega el NUL final.
fn escape(content: &str) -> String {
    let mut escaped = String::new();
    for byte in content.bytes() {
        match byte {
            b'\n' => escaped.push_str("\\n"),
            b'\t' => escaped.push_str("\\t"),
            b'"' | b'\\' => {
                escaped.push('\\');
                escaped.push(byte as char);
            }

            b' '..=b'~' => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\{:03o}", byte)),
        }
    }

    escaped
}

/// `index = index * size`
fn scale(out: &mut dyn Write, index: Reg, size: u32) -> io::Result<()> {
    if size != 1 {
        emit!(out, "li", "{}, {}", SCRATCH, size)?;
        emit!(out, "mul", "{0}, {0}, {1}", index, SCRATCH)?;
    }

    Ok(())
}

/// `sp = sp + delta`
fn adjust_stack(out: &mut dyn Write, delta: i64) -> io::Result<()> {
    if fits_immediate(delta) {
        emit!(out, "addi", "sp, sp, {}", delta)
    } else {
        emit!(out, "li", "{}, {}", SCRATCH, delta)?;
        emit!(out, "add", "sp, sp, {}", SCRATCH)
    }
}

/// Espacio de stack para `count` registros, manteniendo `sp` alineado a 16.
fn spill_size(count: usize) -> usize {
    (count * 8 + 15) / 16 * 16
}

impl super::Emitter for Emitter {
    type Register = Reg;

    const FILE: &'static [Reg] = &[
        Reg(5),
        Reg(6),
        Reg(7),
        Reg(9),
        Reg(10),
        Reg(11),
        Reg(12),
        Reg(13),
        Reg(14),
        Reg(15),
        Reg(16),
        Reg(17),
        Reg(18),
    ];

    // ra y el s0 del llamador
    const RESERVED: u32 = 16;

    fn text(out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, ".text")
    }

    fn data(out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, ".data")
    }

    fn export(out: &mut dyn Write, symbol: &str) -> io::Result<()> {
        writeln!(out, ".global {}", symbol)
    }

    fn prologue(out: &mut dyn Write, frame: u32) -> io::Result<()> {
        adjust_stack(out, -i64::from(frame))?;
        emit!(out, "sd", "ra, 0(sp)")?;
        emit!(out, "sd", "{}, 8(sp)", FRAME_POINTER)?;
        emit!(out, "mv", "{}, sp", FRAME_POINTER)
    }

    fn epilogue(out: &mut dyn Write, frame: u32, noreturn: bool) -> io::Result<()> {
        emit!(out, "mv", "sp, {}", FRAME_POINTER)?;
        emit!(out, "ld", "ra, 0(sp)")?;
        emit!(out, "ld", "{}, 8(sp)", FRAME_POINTER)?;
        adjust_stack(out, frame.into())?;

        if noreturn {
            emit!(out, "call", "{}", crate::ast::UNREACHABLE)
        } else {
            emit!(out, "ret")
        }
    }

    fn jump(out: &mut dyn Write, label: &str) -> io::Result<()> {
        emit!(out, "j", "{}", label)
    }

    fn jump_if_zero(out: &mut dyn Write, test: Reg, label: &str) -> io::Result<()> {
        emit!(out, "beqz", "{}, {}", test, label)
    }

    fn jump_if_not_zero(out: &mut dyn Write, test: Reg, label: &str) -> io::Result<()> {
        emit!(out, "bnez", "{}, {}", test, label)
    }

    fn load_const(out: &mut dyn Write, target: Reg, value: i64) -> io::Result<()> {
        emit!(out, "li", "{}, {}", target, value)
    }

    fn load_address(out: &mut dyn Write, target: Reg, label: &str) -> io::Result<()> {
        emit!(out, "la", "{}, {}", target, label)
    }

    fn load(out: &mut dyn Write, target: Reg, place: Place, size: u32) -> io::Result<()> {
        let address = address(out, place)?;
        emit!(out, load_opcode(size), "{}, {}", target, address)
    }

    fn store(out: &mut dyn Write, place: Place, value: Reg, size: u32) -> io::Result<()> {
        let address = address(out, place)?;
        emit!(out, store_opcode(size), "{}, {}", value, address)
    }

    fn step(out: &mut dyn Write, place: Place, size: u32, delta: i8) -> io::Result<()> {
        let address = address(out, place)?;
        emit!(out, load_opcode(size), "{}, {}", SCRATCH, address)?;
        emit!(out, "addi", "{0}, {0}, {1}", SCRATCH, delta)?;
        emit!(out, store_opcode(size), "{}, {}", SCRATCH, address)
    }

    fn load_element(out: &mut dyn Write, base: Reg, index: Reg, size: u32) -> io::Result<()> {
        scale(out, index, size)?;
        emit!(out, "add", "{0}, {0}, {1}", base, index)?;
        emit!(out, load_opcode(size), "{0}, 0({0})", base)
    }

    fn store_element(
        out: &mut dyn Write,
        base: Reg,
        index: Reg,
        value: Reg,
        size: u32,
    ) -> io::Result<()> {
        scale(out, index, size)?;
        emit!(out, "add", "{0}, {0}, {1}", base, index)?;
        emit!(out, store_opcode(size), "{}, 0({})", value, base)
    }

    fn binary(out: &mut dyn Write, op: BinOp, target: Reg, operand: Reg) -> io::Result<()> {
        let opcode = match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "rem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::ShiftLeft => "sll",
            BinOp::ShiftRight => "sra",
        };

        emit!(out, opcode, "{0}, {0}, {1}", target, operand)
    }

    fn compare(
        out: &mut dyn Write,
        op: CmpOp,
        target: Reg,
        operand: Reg,
        scratch: Reg,
        label: &str,
    ) -> io::Result<()> {
        // Solo existen blt/bge, el resto se obtiene invirtiendo operandos
        let (opcode, left, right) = match op {
            CmpOp::Equals => ("beq", target, operand),
            CmpOp::NotEquals => ("bne", target, operand),
            CmpOp::Less => ("blt", target, operand),
            CmpOp::LessEquals => ("bge", operand, target),
            CmpOp::Greater => ("blt", operand, target),
            CmpOp::GreaterEquals => ("bge", target, operand),
        };

        emit!(out, "li", "{}, 1", scratch)?;
        emit!(out, opcode, "{}, {}, {}", left, right, label)?;
        emit!(out, "li", "{}, 0", scratch)?;
        writeln!(out, "{}:", label)?;
        emit!(out, "mv", "{}, {}", target, scratch)
    }

    fn not(out: &mut dyn Write, target: Reg) -> io::Result<()> {
        emit!(out, "seqz", "{0}, {0}", target)
    }

    fn unary(out: &mut dyn Write, op: UnOp, target: Reg) -> io::Result<()> {
        match op {
            UnOp::Plus => Ok(()),
            UnOp::Minus => emit!(out, "neg", "{0}, {0}", target),
            UnOp::BitNot => emit!(out, "not", "{0}, {0}", target),
        }
    }

    fn bit_test(out: &mut dyn Write, target: Reg, index: Reg, scratch: Reg) -> io::Result<()> {
        emit!(out, "li", "{}, 1", scratch)?;
        emit!(out, "sll", "{0}, {0}, {1}", scratch, index)?;
        emit!(out, "and", "{0}, {0}, {1}", target, scratch)
    }

    fn save(out: &mut dyn Write, registers: &[Reg]) -> io::Result<()> {
        if registers.is_empty() {
            return Ok(());
        }

        emit!(out, "addi", "sp, sp, -{}", spill_size(registers.len()))?;
        for (i, register) in registers.iter().enumerate() {
            emit!(out, "sd", "{}, {}(sp)", register, i * 8)?;
        }

        Ok(())
    }

    fn restore(out: &mut dyn Write, registers: &[Reg]) -> io::Result<()> {
        if registers.is_empty() {
            return Ok(());
        }

        for (i, register) in registers.iter().enumerate() {
            emit!(out, "ld", "{}, {}(sp)", register, i * 8)?;
        }

        emit!(out, "addi", "sp, sp, {}", spill_size(registers.len()))
    }

    fn call(out: &mut dyn Write, function: &str) -> io::Result<()> {
        emit!(out, "call", "{}", function)
    }

    fn copy(out: &mut dyn Write, to: Reg, from: Reg) -> io::Result<()> {
        emit!(out, "mv", "{}, {}", to, from)
    }

    fn datum(out: &mut dyn Write, label: &str, datum: Datum) -> io::Result<()> {
        match datum {
            Datum::Quad(value) => {
                writeln!(out, ".balign 8")?;
                writeln!(out, "{}: .quad {}", label, value)
            }

            Datum::Address(target) => {
                writeln!(out, ".balign 8")?;
                writeln!(out, "{}: .quad {}", label, target)
            }

            Datum::Byte(value) => writeln!(out, "{}: .byte {}", label, value),
        }
    }

    fn string(out: &mut dyn Write, label: &str, content: &str) -> io::Result<()> {
        writeln!(out, "{}: .string \"{}\"", label, escape(content))
    }

    fn entry(out: &mut dyn Write, entry: &str) -> io::Result<()> {
        writeln!(out, ".global main")?;
        writeln!(out, "main:")?;

        // ra y los callee-saved que la cascada puede destruir
        emit!(out, "addi", "sp, sp, -32")?;
        emit!(out, "sd", "ra, 0(sp)")?;
        emit!(out, "sd", "s0, 8(sp)")?;
        emit!(out, "sd", "s1, 16(sp)")?;
        emit!(out, "sd", "s2, 24(sp)")?;

        emit!(out, "mv", "{}, a0", Self::FILE[0])?;
        emit!(out, "mv", "{}, a1", Self::FILE[1])?;
        emit!(out, "call", "{}", entry)?;
        emit!(out, "mv", "a0, {}", Self::FILE[0])?;

        emit!(out, "ld", "ra, 0(sp)")?;
        emit!(out, "ld", "s0, 8(sp)")?;
        emit!(out, "ld", "s1, 16(sp)")?;
        emit!(out, "ld", "s2, 24(sp)")?;
        emit!(out, "addi", "sp, sp, 32")?;
        emit!(out, "ret")
    }

    fn trap(out: &mut dyn Write, name: &str) -> io::Result<()> {
        writeln!(out, "{}:", name)?;
        emit!(out, "li", "a7, 93")?;
        emit!(out, "li", "a0, 1")?;
        emit!(out, "ecall")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Emitter as _;

    fn render(emit: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> String {
        let mut output = Vec::new();
        emit(&mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn globals_go_through_address_register() {
        let text = render(|out| Emitter::load(out, Reg(5), Place::Global("__global_x"), 8));
        assert!(text.contains("la      x31, __global_x"));
        assert!(text.contains("ld      x5, 0(x31)"));
    }

    #[test]
    fn large_frames_use_scratch_registers() {
        let text = render(|out| Emitter::prologue(out, 4096));
        assert!(text.contains("li      x30, -4096"));
        assert!(text.contains("add     sp, sp, x30"));

        let text = render(|out| Emitter::epilogue(out, 2048, false));
        assert!(text.contains("li      x30, 2048"));
        assert!(!text.contains("addi    sp, sp, 2048"));

        let text = render(|out| Emitter::store(out, Place::Local(3000), Reg(5), 8));
        assert!(text.contains("li      x31, 3000"));
        assert!(text.contains("add     x31, x31, s0"));
        assert!(text.contains("sd      x5, 0(x31)"));

        let text = render(|out| Emitter::load(out, Reg(5), Place::Local(2040), 1));
        assert!(text.contains("lbu     x5, 2040(s0)"));
    }

    #[test]
    fn greater_swaps_operands() {
        let text = render(|out| {
            Emitter::compare(out, CmpOp::Greater, Reg(5), Reg(6), Reg(7), ".Lf_0")
        });

        assert!(text.contains("blt     x6, x5, .Lf_0"));
        assert!(text.contains("mv      x5, x7"));
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(escape("a\tb\n"), "a\\tb\\n");
        assert_eq!(escape("\u{1b}"), "\\033");
    }

    #[test]
    fn spills_keep_stack_aligned() {
        assert_eq!(spill_size(1), 16);
        assert_eq!(spill_size(2), 16);
        assert_eq!(spill_size(3), 32);

        let text = render(|out| Emitter::save(out, &[Reg(5), Reg(6), Reg(7)]));
        assert!(text.contains("addi    sp, sp, -32"));
        assert!(text.contains("sd      x7, 16(sp)"));
    }
}
