//! Generación de código nativo.
//!
//! Las expresiones se evalúan con una cascada de registros: una
//! expresión evaluada con registro objetivo `t` deja su resultado en
//! `FILE[t]` y puede destruir libremente cualquier registro con índice
//! mayor a `t`. Los operandos derecho y auxiliares usan `t + 1` y
//! `t + 2`. Una llamada preserva `FILE[0..t]`, evalúa el i-ésimo
//! argumento con objetivo `i` y mueve el retorno desde `FILE[0]`.
//! Si la profundidad excede el archivo de registros, la compilación
//! falla en vez de recurrir a spilling.

use log::debug;
use std::{
    collections::{BTreeSet, HashSet},
    io::{self, Write},
    marker::PhantomData,
    rc::Rc,
};

use thiserror::Error;

use crate::{
    arch::{Arch, Datum, Emitter, Place},
    ast::{
        Ast, Attributes, Body, Call, Conditional, Datatype, Expr, Function, Literal, Stmt,
        ENTRY_POINT, UNREACHABLE,
    },
    lex::Identifier,
    semantic::{CallGraph, FunctionTable, GlobalTable, LocalTable, SemanticError, Slot},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Semantic(#[from] SemanticError),

    #[error("Expression is too deep for the {0} available registers")]
    RegisterExhaustion(usize),

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

/// Genera el texto de ensamblador de una unidad de compilación.
pub fn generate(ast: &Ast, arch: Arch) -> Result<Vec<u8>, CodegenError> {
    dispatch_arch!(E: arch => Codegen::<E>::new(ast)?.generate())
}

fn string_label(index: usize) -> String {
    format!("__string_{}", index)
}

/// Contexto de generación de una unidad de compilación.
struct Codegen<'a, E> {
    ast: &'a Ast,
    globals: GlobalTable,
    functions: FunctionTable<'a>,
    strings: Vec<Rc<str>>,
    labels: u32,
    arch: PhantomData<E>,
}

impl<'a, E: Emitter> Codegen<'a, E> {
    fn new(ast: &'a Ast) -> Result<Self, CodegenError> {
        Ok(Codegen {
            ast,
            globals: GlobalTable::build(ast)?,
            functions: FunctionTable::build(ast)?,
            strings: Vec::new(),
            labels: 0,
            arch: PhantomData,
        })
    }

    fn generate(mut self) -> Result<Vec<u8>, CodegenError> {
        let ast = self.ast;
        let mut graph = CallGraph::default();
        let mut generated = Vec::new();

        for function in ast.functions() {
            let (code, uses) = self.function(function)?;
            graph.add(function, uses);
            generated.push((function, code));
        }

        let reachable = graph.reachable();

        let mut output = Vec::new();
        E::text(&mut output)?;

        let mut noreturn = false;
        for (function, code) in generated {
            if !reachable.contains(&function.name) {
                debug!("Removing unused function `{}`", function.name);
                continue;
            }

            noreturn |= function.is(Attributes::NORETURN);
            output.write_all(&code)?;
        }

        let entry = Identifier::from(ENTRY_POINT);
        if reachable.contains(&entry) && self.functions.get("main").is_none() {
            E::entry(&mut output, ENTRY_POINT)?;
        }

        if noreturn && self.functions.get(UNREACHABLE).is_none() {
            E::trap(&mut output, UNREACHABLE)?;
        }

        E::data(&mut output)?;
        self.data_section(&mut output)?;

        for (index, string) in self.strings.iter().enumerate() {
            E::string(&mut output, &string_label(index), string)?;
        }

        Ok(output)
    }

    fn data_section(&mut self, output: &mut Vec<u8>) -> Result<(), CodegenError> {
        let ast = self.ast;
        let mut emitted = HashSet::new();

        for global in ast.globals() {
            let name = &global.var.name;
            if !emitted.insert(name) {
                continue;
            }

            let label = format!("__global_{}", name);
            let size = global.var.datatype.size();

            let address;
            let datum = match (&global.init, size) {
                (None, 1) => Datum::Byte(0),
                (None, _) => Datum::Quad(0),
                (Some(Literal::Number(value)), 1) => Datum::Byte(*value as u8),
                (Some(Literal::Number(value)), _) => Datum::Quad(*value),
                (Some(Literal::Chr(value)), 1) => Datum::Byte(*value),
                (Some(Literal::Chr(value)), _) => Datum::Quad(*value as i64),
                (Some(Literal::Str(_)), 1) => {
                    return Err(CodegenError::Unsupported("string initializer for a chr global"))
                }

                (Some(Literal::Str(string)), _) => {
                    address = self.intern(string);
                    Datum::Address(&address)
                }
            };

            E::datum(output, &label, datum)?;
        }

        Ok(())
    }

    fn function(
        &mut self,
        function: &'a Function,
    ) -> Result<(Vec<u8>, BTreeSet<Identifier>), CodegenError> {
        let mut output = Vec::new();
        if function.is(Attributes::GLOBAL) {
            E::export(&mut output, function.name.as_ref())?;
        }

        let body = match &function.body {
            Body::Statements(body) => body,

            // Bloque opaco, se copia tal cual bajo la etiqueta
            Body::Assembly(code) => {
                E::label(&mut output, function.name.as_ref())?;
                writeln!(output, "{}", code)?;
                return Ok((output, BTreeSet::new()));
            }
        };

        let context = FunctionContext {
            codegen: self,
            function,
            locals: LocalTable::new(E::RESERVED),
            output: Vec::new(),
            uses: BTreeSet::new(),
        };

        let (code, uses) = context.generate(body)?;
        output.write_all(&code)?;

        Ok((output, uses))
    }

    fn intern(&mut self, string: &Rc<str>) -> String {
        let index = match self.strings.iter().position(|interned| interned == string) {
            Some(index) => index,
            None => {
                self.strings.push(Rc::clone(string));
                self.strings.len() - 1
            }
        };

        string_label(index)
    }
}

/// Variable resuelta: local del frame o global.
enum Variable {
    Local(Slot),
    Global { label: String, datatype: Datatype },
}

impl Variable {
    fn place(&self) -> Place<'_> {
        match self {
            Variable::Local(slot) => Place::Local(slot.offset),
            Variable::Global { label, .. } => Place::Global(label),
        }
    }

    fn datatype(&self) -> Datatype {
        match self {
            Variable::Local(slot) => slot.datatype,
            Variable::Global { datatype, .. } => *datatype,
        }
    }
}

struct FunctionContext<'c, 'a, E> {
    codegen: &'c mut Codegen<'a, E>,
    function: &'a Function,
    locals: LocalTable,
    output: Vec<u8>,
    uses: BTreeSet<Identifier>,
}

impl<'c, 'a, E: Emitter> FunctionContext<'c, 'a, E> {
    fn generate(
        mut self,
        body: &'a [Stmt],
    ) -> Result<(Vec<u8>, BTreeSet<Identifier>), CodegenError> {
        // Los argumentos llegan en los primeros registros
        for (index, parameter) in self.function.parameters.iter().enumerate() {
            let slot = self.locals.declare(parameter)?;
            let register = self.register(index)?;
            E::store(&mut self.output, Place::Local(slot.offset), register, slot.datatype.size())?;
        }

        self.block(body)?;

        // Retorno implícito
        E::load_const(&mut self.output, E::FILE[0], 0)?;

        let noreturn = self.function.is(Attributes::NORETURN);
        if noreturn {
            self.uses.insert(Identifier::from(UNREACHABLE));
        }

        // El tamaño del frame solo se conoce al terminar el cuerpo
        let frame = self.locals.frame_size();
        let mut output = Vec::new();

        E::label(&mut output, self.function.name.as_ref())?;
        E::prologue(&mut output, frame)?;
        output.append(&mut self.output);
        E::label(&mut output, &self.exit_label())?;
        E::epilogue(&mut output, frame, noreturn)?;

        Ok((output, self.uses))
    }

    fn register(&self, index: usize) -> Result<E::Register, CodegenError> {
        E::FILE
            .get(index)
            .copied()
            .ok_or(CodegenError::RegisterExhaustion(E::FILE.len()))
    }

    fn label(&mut self) -> String {
        let label = format!(".L{}.{}", self.function.name, self.codegen.labels);
        self.codegen.labels += 1;
        label
    }

    fn exit_label(&self) -> String {
        format!(".L{}.exit", self.function.name)
    }

    fn variable(&self, name: &Identifier) -> Result<Variable, CodegenError> {
        if let Some(slot) = self.locals.get(name) {
            return Ok(Variable::Local(slot));
        }

        match self.codegen.globals.get(name) {
            Some(symbol) => Ok(Variable::Global {
                label: symbol.label.clone(),
                datatype: symbol.datatype,
            }),

            None => Err(SemanticError::Undefined(name.clone()).into()),
        }
    }

    fn block(&mut self, block: &'a [Stmt]) -> Result<(), CodegenError> {
        block.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn statement(&mut self, stmt: &'a Stmt) -> Result<(), CodegenError> {
        let result = self.register(0)?;

        match stmt {
            Stmt::Declare { var, init } => {
                let slot = self.locals.declare(var)?;
                match init {
                    Some(init) => self.expr(init, 0)?,
                    None => E::load_const(&mut self.output, result, 0)?,
                }

                let size = slot.datatype.size();
                E::store(&mut self.output, Place::Local(slot.offset), result, size)?;
            }

            Stmt::Assign { target, value } => {
                let variable = self.variable(target)?;
                self.expr(value, 0)?;

                let size = variable.datatype().size();
                E::store(&mut self.output, variable.place(), result, size)?;
            }

            Stmt::AssignIndexed {
                target,
                index,
                value,
            } => {
                let variable = self.variable(target)?;
                let datatype = variable.datatype();
                if !datatype.array {
                    return Err(CodegenError::Unsupported("assignment to a bit index"));
                }

                self.expr(index, 0)?;
                self.expr(value, 1)?;

                let (value, base) = (self.register(1)?, self.register(2)?);
                E::load(&mut self.output, base, variable.place(), datatype.size())?;
                E::store_element(&mut self.output, base, result, value, datatype.element_size())?;
            }

            Stmt::Increment(target) | Stmt::Decrement(target) => {
                let variable = self.variable(target)?;
                let delta = if matches!(stmt, Stmt::Increment(_)) { 1 } else { -1 };

                let size = variable.datatype().size();
                E::step(&mut self.output, variable.place(), size, delta)?;
            }

            Stmt::Return(value) => {
                match value {
                    Some(value) => self.expr(value, 0)?,
                    None => E::load_const(&mut self.output, result, 0)?,
                }

                let exit = self.exit_label();
                E::jump(&mut self.output, &exit)?;
            }

            Stmt::If(conditional) => self.conditional(conditional)?,

            Stmt::While { condition, body } => {
                let (start, end) = (self.label(), self.label());

                E::label(&mut self.output, &start)?;
                self.expr(condition, 0)?;
                E::jump_if_zero(&mut self.output, result, &end)?;
                self.block(body)?;
                E::jump(&mut self.output, &start)?;
                E::label(&mut self.output, &end)?;
            }

            Stmt::DoWhile { body, condition } => {
                let start = self.label();

                E::label(&mut self.output, &start)?;
                self.block(body)?;
                self.expr(condition, 0)?;
                E::jump_if_not_zero(&mut self.output, result, &start)?;
            }

            Stmt::Loop(body) => {
                let start = self.label();

                E::label(&mut self.output, &start)?;
                self.block(body)?;
                E::jump(&mut self.output, &start)?;
            }

            Stmt::Expr(expr) => self.expr(expr, 0)?,
        }

        Ok(())
    }

    fn conditional(&mut self, conditional: &'a Conditional) -> Result<(), CodegenError> {
        let result = self.register(0)?;
        let otherwise = self.label();

        self.expr(&conditional.condition, 0)?;
        E::jump_if_zero(&mut self.output, result, &otherwise)?;
        self.block(&conditional.then)?;

        match &conditional.otherwise {
            None => E::label(&mut self.output, &otherwise)?,
            Some(block) => {
                let end = self.label();

                E::jump(&mut self.output, &end)?;
                E::label(&mut self.output, &otherwise)?;
                self.block(block)?;
                E::label(&mut self.output, &end)?;
            }
        }

        Ok(())
    }

    /// Evalúa una expresión hacia `FILE[target]`.
    fn expr(&mut self, expr: &'a Expr, target: usize) -> Result<(), CodegenError> {
        let result = self.register(target)?;

        match expr {
            Expr::Literal(Literal::Number(value)) => {
                E::load_const(&mut self.output, result, *value)?
            }

            Expr::Literal(Literal::Chr(value)) => {
                E::load_const(&mut self.output, result, *value as i64)?
            }

            Expr::Literal(Literal::Str(string)) => {
                let label = self.codegen.intern(string);
                E::load_address(&mut self.output, result, &label)?;
            }

            Expr::Lookup(name) => {
                let variable = self.variable(name)?;
                let size = variable.datatype().size();
                E::load(&mut self.output, result, variable.place(), size)?;
            }

            Expr::Index { var, index } => {
                let variable = self.variable(var)?;
                let datatype = variable.datatype();

                E::load(&mut self.output, result, variable.place(), datatype.size())?;
                self.expr(index, target + 1)?;

                let index = self.register(target + 1)?;
                if datatype.array {
                    E::load_element(&mut self.output, result, index, datatype.element_size())?;
                } else {
                    // Acceso a bit de un escalar
                    let scratch = self.register(target + 2)?;
                    E::bit_test(&mut self.output, result, index, scratch)?;
                }
            }

            Expr::Call(call) => self.call(call, target)?,

            Expr::Binary(op, left, right) => {
                self.expr(left, target)?;
                self.expr(right, target + 1)?;

                let operand = self.register(target + 1)?;
                E::binary(&mut self.output, *op, result, operand)?;
            }

            Expr::Compare(op, left, right) => {
                self.expr(left, target)?;
                self.expr(right, target + 1)?;

                let operand = self.register(target + 1)?;
                let scratch = self.register(target + 2)?;
                let label = self.label();
                E::compare(&mut self.output, *op, result, operand, scratch, &label)?;
            }

            Expr::Unary(op, operand) => {
                self.expr(operand, target)?;
                E::unary(&mut self.output, *op, result)?;
            }

            Expr::Not(operand) => {
                self.expr(operand, target)?;
                E::not(&mut self.output, result)?;
            }
        }

        Ok(())
    }

    fn call(&mut self, call: &'a Call, target: usize) -> Result<(), CodegenError> {
        let callee = self.codegen.functions.resolve(call)?;
        self.uses.insert(callee.name.clone());

        let result = self.register(target)?;
        if call.arguments.len() > E::FILE.len() {
            return Err(CodegenError::RegisterExhaustion(E::FILE.len()));
        }

        let saved = &E::FILE[..target];
        E::save(&mut self.output, saved)?;

        for (index, argument) in call.arguments.iter().enumerate() {
            self.expr(argument, index)?;
        }

        E::call(&mut self.output, callee.name.as_ref())?;
        if target != 0 {
            E::copy(&mut self.output, result, E::FILE[0])?;
        }

        E::restore(&mut self.output, saved)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::tokenize, parse::parse};

    fn compile(source: &str, arch: Arch) -> Result<String, CodegenError> {
        let ast = parse(&tokenize(source).unwrap()).unwrap();
        generate(&ast, arch).map(|output| String::from_utf8(output).unwrap())
    }

    fn x86(source: &str) -> String {
        compile(source, Arch::X86_64).unwrap()
    }

    #[test]
    fn cascade_uses_consecutive_registers() {
        let asm = x86("function spark(int argc, str[] argv) -> int { return 1 + 2; }");

        assert!(asm.contains("mov     rax, 1"));
        assert!(asm.contains("mov     rbx, 2"));
        assert!(asm.contains("add     rax, rbx"));
        assert!(asm.contains("jmp     .Lspark.exit"));
        assert!(asm.contains("[global main]"));
    }

    #[test]
    fn unused_functions_are_removed() {
        let asm = x86(
            "function spark(int argc, str[] argv) -> int { return used(); }
             function used() -> int { return 1; }
             function unused() -> int { return 2; }
             function(keep) kept() -> int { return 3; }",
        );

        assert!(asm.contains("used:"));
        assert!(asm.contains("kept:"));
        assert!(!asm.contains("unused:"));
    }

    #[test]
    fn strings_are_pooled() {
        let asm = x86(
            "str greeting = \"hi\";
             function spark(int argc, str[] argv) -> int { str s = \"hi\"; return 0; }",
        );

        assert!(asm.contains("__global_greeting: dq __string_0"));
        assert!(asm.contains("__string_0: db \"hi\", 0"));
        assert!(!asm.contains("__string_1"));
    }

    #[test]
    fn noreturn_pulls_in_trap() {
        let asm = x86(
            "function spark(int argc, str[] argv) -> int { stop(); return 0; }
             function(noreturn) stop() -> int { loop { } }",
        );

        assert!(asm.contains("call    unreachable"));
        assert!(asm.contains("unreachable:"));
        assert!(asm.contains("mov     rax, 60"));
    }

    #[test]
    fn assembly_bodies_are_verbatim() {
        let asm = x86(
            "function spark(int argc, str[] argv) -> int { return magic(); }
             function(assembly, global) magic() -> int { \"\tmov rax, 42\n\tret\" }",
        );

        assert!(asm.contains("[global magic]"));
        assert!(asm.contains("magic:\n\tmov rax, 42\n\tret"));
    }

    #[test]
    fn nested_calls_preserve_lower_registers() {
        let asm = x86(
            "function spark(int argc, str[] argv) -> int { return 1 + id(2); }
             function id(int x) -> int { return x; }",
        );

        let call = asm.find("call    id").unwrap();
        let before = &asm[..call];
        let after = &asm[call..];

        assert!(before.contains("push    rax"));
        assert!(after.contains("mov     rbx, rax"));
        assert!(after.contains("pop     rax"));
    }

    #[test]
    fn semantic_errors_abort_generation() {
        let arity = compile(
            "function spark(int argc, str[] argv) -> int { return f(1); }
             function f() -> int { return 0; }",
            Arch::X86_64,
        );

        assert!(matches!(
            arity,
            Err(CodegenError::Semantic(SemanticError::Arity { .. }))
        ));

        let undefined = compile(
            "function spark(int argc, str[] argv) -> int { return y; }",
            Arch::Riscv64,
        );

        assert!(matches!(
            undefined,
            Err(CodegenError::Semantic(SemanticError::Undefined(_)))
        ));
    }

    #[test]
    fn bit_assignment_is_rejected() {
        let result = compile(
            "function spark(int argc, str[] argv) -> int { int x = 0; x[1] = 1; return x; }",
            Arch::X86_64,
        );

        assert!(matches!(result, Err(CodegenError::Unsupported(_))));
    }

    #[test]
    fn riscv_locals_are_frame_relative() {
        let asm = compile(
            "function spark(int argc, str[] argv) -> int { chr c = 'a'; return c; }",
            Arch::Riscv64,
        )
        .unwrap();

        // ra y s0 ocupan los primeros 16 bytes; argc, argv y luego c
        assert!(asm.contains("sd      x5, 16(s0)"));
        assert!(asm.contains("sd      x6, 24(s0)"));
        assert!(asm.contains("sb      x5, 32(s0)"));
        assert!(asm.contains("lbu     x5, 32(s0)"));
        assert!(asm.contains("addi    sp, sp, -48"));
        assert!(asm.contains(".global main"));
    }
}
