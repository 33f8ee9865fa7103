use super::{byte_list, Datum, Place};
use crate::ast::{BinOp, CmpOp, UnOp};

use std::{
    fmt,
    io::{self, Write},
};

/// Emisor para x86-64 en sintaxis NASM.
pub struct Emitter;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Reg {
    /// Nombre de los 8 bits menos significativos.
    fn low_byte(self) -> &'static str {
        use Reg::*;

        match self {
            Rax => "al",
            Rbx => "bl",
            Rcx => "cl",
            Rdx => "dl",
            Rsi => "sil",
            Rdi => "dil",
            R8 => "r8b",
            R9 => "r9b",
            R10 => "r10b",
            R11 => "r11b",
            R12 => "r12b",
            R13 => "r13b",
            R14 => "r14b",
            R15 => "r15b",
        }
    }
}

impl super::Register for Reg {}

impl fmt::Display for Reg {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Reg::*;

        let name = match self {
            Rax => "rax",
            Rbx => "rbx",
            Rcx => "rcx",
            Rdx => "rdx",
            Rsi => "rsi",
            Rdi => "rdi",
            R8 => "r8",
            R9 => "r9",
            R10 => "r10",
            R11 => "r11",
            R12 => "r12",
            R13 => "r13",
            R14 => "r14",
            R15 => "r15",
        };

        formatter.write_str(name)
    }
}

/// Operando de memoria para una variable, sin prefijo de tamaño.
fn address(place: Place, size: u32) -> String {
    match place {
        // Las locales crecen hacia abajo desde %rbp
        Place::Local(offset) => format!("[rbp - {}]", offset + size),
        Place::Global(label) => format!("[{}]", label),
    }
}

fn width(size: u32) -> &'static str {
    if size == 1 {
        "byte"
    } else {
        "qword"
    }
}

fn condition(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Equals => "e",
        CmpOp::NotEquals => "ne",
        CmpOp::Less => "l",
        CmpOp::LessEquals => "le",
        CmpOp::Greater => "g",
        CmpOp::GreaterEquals => "ge",
    }
}

/// La cantidad de un desplazamiento variable solo puede estar en %cl.
fn shift(out: &mut dyn Write, opcode: &str, target: Reg, amount: Reg) -> io::Result<()> {
    if target == Reg::Rcx {
        emit!(out, "xchg", "rcx, {}", amount)?;
        emit!(out, opcode, "{}, cl", amount)?;
        emit!(out, "mov", "rcx, {}", amount)
    } else if amount == Reg::Rcx {
        emit!(out, opcode, "{}, cl", target)
    } else {
        emit!(out, "push", "rcx")?;
        emit!(out, "mov", "rcx, {}", amount)?;
        emit!(out, opcode, "{}, cl", target)?;
        emit!(out, "pop", "rcx")
    }
}

/// `idiv` opera implícitamente sobre %rdx:%rax.
fn divide(out: &mut dyn Write, target: Reg, divisor: Reg, remainder: bool) -> io::Result<()> {
    if target != Reg::Rax {
        emit!(out, "push", "rax")?;
    }

    if target != Reg::Rdx {
        emit!(out, "push", "rdx")?;
    }

    // El divisor queda en el stack por si vive en %rax o %rdx
    emit!(out, "push", "{}", divisor)?;
    if target != Reg::Rax {
        emit!(out, "mov", "rax, {}", target)?;
    }

    emit!(out, "cqo")?;
    emit!(out, "idiv", "qword [rsp]")?;
    emit!(out, "add", "rsp, 8")?;

    let result = if remainder { Reg::Rdx } else { Reg::Rax };
    if target != result {
        emit!(out, "mov", "{}, {}", target, result)?;
    }

    if target != Reg::Rdx {
        emit!(out, "pop", "rdx")?;
    }

    if target != Reg::Rax {
        emit!(out, "pop", "rax")?;
    }

    Ok(())
}

impl super::Emitter for Emitter {
    type Register = Reg;

    const FILE: &'static [Reg] = &[
        Reg::Rax,
        Reg::Rbx,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
    ];

    const RESERVED: u32 = 0;

    fn text(out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "[bits 64]")?;
        writeln!(out, "[section .text]")
    }

    fn data(out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "[section .data]")
    }

    fn export(out: &mut dyn Write, symbol: &str) -> io::Result<()> {
        writeln!(out, "[global {}]", symbol)
    }

    fn prologue(out: &mut dyn Write, frame: u32) -> io::Result<()> {
        emit!(out, "push", "rbp")?;
        emit!(out, "mov", "rbp, rsp")?;
        if frame > 0 {
            emit!(out, "sub", "rsp, {}", frame)?;
        }

        Ok(())
    }

    fn epilogue(out: &mut dyn Write, _frame: u32, noreturn: bool) -> io::Result<()> {
        emit!(out, "mov", "rsp, rbp")?;
        emit!(out, "pop", "rbp")?;

        if noreturn {
            emit!(out, "call", "{}", crate::ast::UNREACHABLE)
        } else {
            emit!(out, "ret")
        }
    }

    fn jump(out: &mut dyn Write, label: &str) -> io::Result<()> {
        emit!(out, "jmp", "{}", label)
    }

    fn jump_if_zero(out: &mut dyn Write, test: Reg, label: &str) -> io::Result<()> {
        emit!(out, "test", "{0}, {0}", test)?;
        emit!(out, "jz", "{}", label)
    }

    fn jump_if_not_zero(out: &mut dyn Write, test: Reg, label: &str) -> io::Result<()> {
        emit!(out, "test", "{0}, {0}", test)?;
        emit!(out, "jnz", "{}", label)
    }

    fn load_const(out: &mut dyn Write, target: Reg, value: i64) -> io::Result<()> {
        emit!(out, "mov", "{}, {}", target, value)
    }

    fn load_address(out: &mut dyn Write, target: Reg, label: &str) -> io::Result<()> {
        emit!(out, "mov", "{}, {}", target, label)
    }

    fn load(out: &mut dyn Write, target: Reg, place: Place, size: u32) -> io::Result<()> {
        let address = address(place, size);
        if size == 1 {
            emit!(out, "movzx", "{}, byte {}", target, address)
        } else {
            emit!(out, "mov", "{}, qword {}", target, address)
        }
    }

    fn store(out: &mut dyn Write, place: Place, value: Reg, size: u32) -> io::Result<()> {
        let address = address(place, size);
        if size == 1 {
            emit!(out, "mov", "byte {}, {}", address, value.low_byte())
        } else {
            emit!(out, "mov", "qword {}, {}", address, value)
        }
    }

    fn step(out: &mut dyn Write, place: Place, size: u32, delta: i8) -> io::Result<()> {
        let opcode = if delta < 0 { "dec" } else { "inc" };
        emit!(out, opcode, "{} {}", width(size), address(place, size))
    }

    fn load_element(out: &mut dyn Write, base: Reg, index: Reg, size: u32) -> io::Result<()> {
        if size != 1 {
            emit!(out, "imul", "{0}, {0}, {1}", index, size)?;
        }

        emit!(out, "add", "{}, {}", base, index)?;
        if size == 1 {
            emit!(out, "movzx", "{0}, byte [{0}]", base)
        } else {
            emit!(out, "mov", "{0}, qword [{0}]", base)
        }
    }

    fn store_element(
        out: &mut dyn Write,
        base: Reg,
        index: Reg,
        value: Reg,
        size: u32,
    ) -> io::Result<()> {
        if size != 1 {
            emit!(out, "imul", "{0}, {0}, {1}", index, size)?;
        }

        emit!(out, "add", "{}, {}", base, index)?;
        if size == 1 {
            emit!(out, "mov", "byte [{}], {}", base, value.low_byte())
        } else {
            emit!(out, "mov", "qword [{}], {}", base, value)
        }
    }

    fn binary(out: &mut dyn Write, op: BinOp, target: Reg, operand: Reg) -> io::Result<()> {
        let opcode = match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "imul",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Div => return divide(out, target, operand, false),
            BinOp::Mod => return divide(out, target, operand, true),
            BinOp::ShiftLeft => return shift(out, "shl", target, operand),
            BinOp::ShiftRight => return shift(out, "sar", target, operand),
        };

        emit!(out, opcode, "{}, {}", target, operand)
    }

    fn compare(
        out: &mut dyn Write,
        op: CmpOp,
        target: Reg,
        operand: Reg,
        scratch: Reg,
        _label: &str,
    ) -> io::Result<()> {
        emit!(out, "cmp", "{}, {}", target, operand)?;
        emit!(out, "mov", "{}, 1", scratch)?;
        emit!(out, "mov", "{}, 0", target)?;
        emit!(out, format!("cmov{}", condition(op)), "{}, {}", target, scratch)
    }

    fn not(out: &mut dyn Write, target: Reg) -> io::Result<()> {
        emit!(out, "test", "{0}, {0}", target)?;
        emit!(out, "sete", "{}", target.low_byte())?;
        emit!(out, "movzx", "{}, {}", target, target.low_byte())
    }

    fn unary(out: &mut dyn Write, op: UnOp, target: Reg) -> io::Result<()> {
        match op {
            UnOp::Plus => Ok(()),
            UnOp::Minus => emit!(out, "neg", "{}", target),
            UnOp::BitNot => emit!(out, "not", "{}", target),
        }
    }

    fn bit_test(out: &mut dyn Write, target: Reg, index: Reg, scratch: Reg) -> io::Result<()> {
        emit!(out, "mov", "{}, 1", scratch)?;
        shift(out, "shl", scratch, index)?;
        emit!(out, "and", "{}, {}", target, scratch)
    }

    fn save(out: &mut dyn Write, registers: &[Reg]) -> io::Result<()> {
        for register in registers {
            emit!(out, "push", "{}", register)?;
        }

        Ok(())
    }

    fn restore(out: &mut dyn Write, registers: &[Reg]) -> io::Result<()> {
        for register in registers.iter().rev() {
            emit!(out, "pop", "{}", register)?;
        }

        Ok(())
    }

    fn call(out: &mut dyn Write, function: &str) -> io::Result<()> {
        emit!(out, "call", "{}", function)
    }

    fn copy(out: &mut dyn Write, to: Reg, from: Reg) -> io::Result<()> {
        emit!(out, "mov", "{}, {}", to, from)
    }

    fn datum(out: &mut dyn Write, label: &str, datum: Datum) -> io::Result<()> {
        match datum {
            Datum::Quad(value) => writeln!(out, "{}: dq {}", label, value),
            Datum::Byte(value) => writeln!(out, "{}: db {}", label, value),
            Datum::Address(target) => writeln!(out, "{}: dq {}", label, target),
        }
    }

    fn string(out: &mut dyn Write, label: &str, content: &str) -> io::Result<()> {
        writeln!(out, "{}: db {}", label, byte_list(content))
    }

    fn entry(out: &mut dyn Write, entry: &str) -> io::Result<()> {
        const PRESERVED: [Reg; 5] = [Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

        writeln!(out, "[global main]")?;
        writeln!(out, "main:")?;
        Self::save(out, &PRESERVED)?;

        // argc, argv de la ABI de C hacia los dos primeros registros
        emit!(out, "mov", "rax, rdi")?;
        emit!(out, "mov", "rbx, rsi")?;
        emit!(out, "call", "{}", entry)?;

        Self::restore(out, &PRESERVED)?;
        emit!(out, "ret")
    }

    fn trap(out: &mut dyn Write, name: &str) -> io::Result<()> {
        writeln!(out, "{}:", name)?;
        emit!(out, "mov", "rax, 60")?;
        emit!(out, "mov", "rdi, 1")?;
        emit!(out, "syscall")
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
    fn division_preserves_implicit_registers() {
        let text = render(|out| Emitter::binary(out, BinOp::Div, Reg::Rbx, Reg::Rcx));
        let lines: Vec<_> = text
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();

        assert_eq!(
            lines,
            vec![
                "push rax",
                "push rdx",
                "push rcx",
                "mov rax, rbx",
                "cqo",
                "idiv qword [rsp]",
                "add rsp, 8",
                "mov rbx, rax",
                "pop rdx",
                "pop rax",
            ]
        );
    }

    #[test]
    fn remainder_in_rax_only_saves_rdx() {
        let text = render(|out| Emitter::binary(out, BinOp::Mod, Reg::Rax, Reg::Rbx));
        assert!(!text.contains("push    rax"));
        assert!(text.contains("rax, rdx"));
    }

    #[test]
    fn shift_through_rcx_target() {
        let text = render(|out| Emitter::binary(out, BinOp::ShiftRight, Reg::Rcx, Reg::Rdx));
        assert!(text.contains("xchg"));
        assert!(text.contains("sar"));
        assert!(text.contains("rdx, cl"));
    }

    #[test]
    fn chr_locals_are_byte_sized() {
        let text = render(|out| Emitter::store(out, Place::Local(8), Reg::Rsi, 1));
        assert!(text.contains("byte [rbp - 9], sil"));

        let text = render(|out| Emitter::load(out, Reg::Rax, Place::Global("__global_c"), 1));
        assert!(text.contains("movzx"));
        assert!(text.contains("rax, byte [__global_c]"));
    }
}
