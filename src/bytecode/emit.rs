use log::debug;
use std::{
    collections::{BTreeSet, HashSet},
    fmt::Display,
    io::{self, Write},
};

use super::{Opcode, GLOBALS_SECTION};
use crate::{
    ast::{
        Ast, Attributes, BinOp, Body, CmpOp, Conditional, Expr, Function, Literal, Stmt, UnOp,
        UNREACHABLE,
    },
    codegen::CodegenError,
    lex::Identifier,
    semantic::{CallGraph, FunctionTable, GlobalTable, LocalTable, SemanticError},
};

/// Genera el texto `flb` de una unidad de compilación.
pub fn generate(ast: &Ast) -> Result<Vec<u8>, CodegenError> {
    Emitter::new(ast)?.generate()
}

/// Escapa un literal de cadena para un operando `string`.
pub(super) fn escape(string: &str) -> String {
    string.replace('\\', "\\\\").replace('\n', "\\n")
}

struct Emitter<'a> {
    ast: &'a Ast,
    globals: GlobalTable,
    functions: FunctionTable<'a>,
    labels: u32,
}

impl<'a> Emitter<'a> {
    fn new(ast: &'a Ast) -> Result<Self, CodegenError> {
        Ok(Emitter {
            ast,
            globals: GlobalTable::build(ast)?,
            functions: FunctionTable::build(ast)?,
            labels: 0,
        })
    }

    fn generate(mut self) -> Result<Vec<u8>, CodegenError> {
        let ast = self.ast;
        let mut graph = CallGraph::default();
        let mut sections = Vec::new();

        for function in ast.functions() {
            match &function.body {
                Body::Statements(body) => {
                    let (code, uses) = self.function(function, body)?;
                    graph.add(function, uses);
                    sections.push((function, code));
                }

                // Se resuelven como nativas, no tienen sección propia
                Body::Assembly(_) => graph.add(function, BTreeSet::new()),
            }
        }

        // El encabezado de la imagen refiere a la trampa
        graph.root(UNREACHABLE);
        let reachable = graph.reachable();

        let mut output = Vec::new();
        self.globals_section(&mut output)?;

        let mut count = 1;
        for (function, code) in sections {
            if reachable.contains(&function.name) {
                output.write_all(&code)?;
                count += 1;
            } else {
                debug!("Removing unused function `{}`", function.name);
            }
        }

        let has_trap = matches!(
            self.functions.get(UNREACHABLE).map(|function| &function.body),
            Some(Body::Statements(_))
        );

        if !has_trap {
            trap_section(&mut output)?;
            count += 1;
        }

        debug!("Generated {} bytecode sections", count);
        Ok(output)
    }

    fn globals_section(&mut self, output: &mut Vec<u8>) -> io::Result<()> {
        writeln!(output, "@begin globals {}", GLOBALS_SECTION)?;
        writeln!(output, "{}:", GLOBALS_SECTION)?;

        let mut declared = HashSet::new();
        for global in self.ast.globals() {
            let var = &global.var;
            if !declared.insert(&var.name) {
                continue;
            }

            let datatype = var.datatype;
            emit!(output, "global", "{} {} {}", var.name, datatype.kind, datatype.array)?;

            match &global.init {
                None => continue,
                Some(Literal::Number(value)) => emit!(output, "number", "{}", value)?,
                Some(Literal::Chr(value)) => emit!(output, "number", "{}", value)?,
                Some(Literal::Str(string)) => emit!(output, "string", "\"{}\"", escape(string))?,
            }

            emit!(output, "assign", "{}", var.name)?;
        }

        emit!(output, "number", "0")?;
        emit!(output, "return")?;
        writeln!(output, "@end globals")
    }

    fn function(
        &mut self,
        function: &'a Function,
        body: &'a [Stmt],
    ) -> Result<(Vec<u8>, BTreeSet<Identifier>), CodegenError> {
        let mut section = Section {
            emitter: self,
            function,
            locals: LocalTable::new(0),
            output: Vec::new(),
            uses: BTreeSet::new(),
        };

        writeln!(section.output, "@begin function {}", function.name)?;
        writeln!(section.output, "{}:", function.name)?;

        if function.is(Attributes::NORETURN) {
            section.uses.insert(Identifier::from(UNREACHABLE));
            section.op(Opcode::NoReturn)?;
        }

        // Los argumentos se extraen de la pila en orden inverso
        for parameter in function.parameters.iter().rev() {
            section.locals.declare(parameter)?;
            section.declare(parameter.name.as_ref(), parameter.datatype)?;
            section.op_with(Opcode::Assign, &parameter.name)?;
        }

        section.block(body)?;

        section.op_with(Opcode::Number, 0)?;
        section.op(Opcode::Return)?;
        writeln!(section.output, "@end function")?;

        Ok((section.output, section.uses))
    }
}

/// Sección sintética que termina la máquina virtual con estado 1.
fn trap_section(output: &mut Vec<u8>) -> io::Result<()> {
    writeln!(output, "@begin function {}", UNREACHABLE)?;
    writeln!(output, "{}:", UNREACHABLE)?;
    emit!(output, "number", "1")?;
    emit!(output, "invoke_native", "do_exit")?;
    emit!(output, "number", "0")?;
    emit!(output, "return")?;
    writeln!(output, "@end function")
}

struct Section<'e, 'a> {
    emitter: &'e mut Emitter<'a>,
    function: &'a Function,
    locals: LocalTable,
    output: Vec<u8>,
    uses: BTreeSet<Identifier>,
}

impl<'e, 'a> Section<'e, 'a> {
    fn op(&mut self, opcode: Opcode) -> io::Result<()> {
        emit!(self.output, opcode.mnemonic())
    }

    fn op_with(&mut self, opcode: Opcode, operand: impl Display) -> io::Result<()> {
        emit!(self.output, opcode.mnemonic(), "{}", operand)
    }

    fn declare(&mut self, name: &str, datatype: crate::ast::Datatype) -> io::Result<()> {
        let operands = format!("{} {} {}", name, datatype.kind, datatype.array);
        self.op_with(Opcode::Variable, operands)
    }

    fn label(&mut self) -> u32 {
        let label = self.emitter.labels;
        self.emitter.labels += 1;
        label
    }

    fn place_label(&mut self, label: u32) -> io::Result<()> {
        writeln!(self.output, "{}:", label)
    }

    /// Verifica que una variable exista y retorna su tipo.
    fn variable(&self, name: &Identifier) -> Result<crate::ast::Datatype, CodegenError> {
        if let Some(slot) = self.locals.get(name) {
            return Ok(slot.datatype);
        }

        match self.emitter.globals.get(name) {
            Some(symbol) => Ok(symbol.datatype),
            None => Err(SemanticError::Undefined(name.clone()).into()),
        }
    }

    fn block(&mut self, block: &'a [Stmt]) -> Result<(), CodegenError> {
        block.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn statement(&mut self, stmt: &'a Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Declare { var, init } => {
                self.locals.declare(var)?;
                self.declare(var.name.as_ref(), var.datatype)?;

                if let Some(init) = init {
                    self.expr(init)?;
                    self.op_with(Opcode::Assign, &var.name)?;
                }
            }

            Stmt::Assign { target, value } => {
                self.variable(target)?;
                self.expr(value)?;
                self.op_with(Opcode::Assign, target)?;
            }

            Stmt::AssignIndexed {
                target,
                index,
                value,
            } => {
                if !self.variable(target)?.array {
                    return Err(CodegenError::Unsupported("assignment to a bit index"));
                }

                self.expr(index)?;
                self.expr(value)?;
                self.op_with(Opcode::AssignIndexed, target)?;
            }

            Stmt::Increment(target) => {
                self.variable(target)?;
                self.op_with(Opcode::Increase, target)?;
            }

            Stmt::Decrement(target) => {
                self.variable(target)?;
                self.op_with(Opcode::Decrease, target)?;
            }

            Stmt::Return(value) => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.op_with(Opcode::Number, 0)?,
                }

                self.op(Opcode::Return)?;
            }

            Stmt::If(conditional) => self.conditional(conditional)?,

            Stmt::While { condition, body } => {
                let start = self.label();
                self.place_label(start)?;
                self.expr(condition)?;

                let end = self.label();
                self.op_with(Opcode::GotoFalse, end)?;
                self.block(body)?;
                self.op_with(Opcode::Goto, start)?;
                self.place_label(end)?;
            }

            Stmt::DoWhile { body, condition } => {
                let start = self.label();
                self.place_label(start)?;
                self.block(body)?;
                self.expr(condition)?;
                self.op_with(Opcode::GotoTrue, start)?;
            }

            Stmt::Loop(body) => {
                let start = self.label();
                self.place_label(start)?;
                self.block(body)?;
                self.op_with(Opcode::Goto, start)?;
            }

            Stmt::Expr(expr) => {
                self.expr(expr)?;
                self.op(Opcode::Delete)?;
            }
        }

        Ok(())
    }

    fn conditional(&mut self, conditional: &'a Conditional) -> Result<(), CodegenError> {
        self.expr(&conditional.condition)?;

        let otherwise = self.label();
        self.op_with(Opcode::GotoFalse, otherwise)?;
        self.block(&conditional.then)?;

        match &conditional.otherwise {
            None => self.place_label(otherwise)?,
            Some(block) => {
                let end = self.label();
                self.op_with(Opcode::Goto, end)?;
                self.place_label(otherwise)?;
                self.block(block)?;
                self.place_label(end)?;
            }
        }

        Ok(())
    }

    fn expr(&mut self, expr: &'a Expr) -> Result<(), CodegenError> {
        match expr {
            Expr::Literal(Literal::Number(value)) => self.op_with(Opcode::Number, value)?,
            Expr::Literal(Literal::Chr(value)) => self.op_with(Opcode::Number, value)?,
            Expr::Literal(Literal::Str(string)) => {
                self.op_with(Opcode::String, format!("\"{}\"", escape(string)))?
            }

            Expr::Lookup(name) => {
                self.variable(name)?;
                self.op_with(Opcode::Load, name)?;
            }

            Expr::Index { var, index } => {
                self.variable(var)?;
                self.expr(index)?;
                self.op_with(Opcode::LoadIndexed, var)?;
            }

            Expr::Call(call) => {
                let callee = self.emitter.functions.resolve(call)?;
                for argument in &call.arguments {
                    self.expr(argument)?;
                }

                let opcode = if callee.is(Attributes::ASSEMBLY) {
                    Opcode::InvokeNative
                } else {
                    self.uses.insert(callee.name.clone());
                    Opcode::Invoke
                };

                self.op_with(opcode, &callee.name)?;
            }

            Expr::Binary(op, left, right) => {
                self.expr(left)?;
                self.expr(right)?;
                self.op(binary_opcode(*op))?;
            }

            Expr::Compare(op, left, right) => {
                self.expr(left)?;
                self.expr(right)?;
                self.op(compare_opcode(*op))?;
            }

            Expr::Unary(UnOp::Plus, operand) => self.expr(operand)?,

            Expr::Unary(UnOp::Minus, operand) => {
                self.op_with(Opcode::Number, 0)?;
                self.expr(operand)?;
                self.op(Opcode::Sub)?;
            }

            Expr::Unary(UnOp::BitNot, operand) => {
                self.expr(operand)?;
                self.op(Opcode::Not)?;
            }

            Expr::Not(operand) => {
                self.expr(operand)?;
                self.op(Opcode::Invert)?;
            }
        }

        Ok(())
    }
}

fn binary_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Or,
        BinOp::Xor => Opcode::Xor,
        BinOp::ShiftLeft => Opcode::ShiftLeft,
        BinOp::ShiftRight => Opcode::ShiftRight,
    }
}

fn compare_opcode(op: CmpOp) -> Opcode {
    match op {
        CmpOp::Equals => Opcode::Equals,
        CmpOp::NotEquals => Opcode::NotEquals,
        CmpOp::Less => Opcode::Less,
        CmpOp::LessEquals => Opcode::LessEquals,
        CmpOp::Greater => Opcode::More,
        CmpOp::GreaterEquals => Opcode::MoreEquals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::tokenize, parse::parse};

    fn flb(source: &str) -> String {
        let ast = parse(&tokenize(source).unwrap()).unwrap();
        String::from_utf8(generate(&ast).unwrap()).unwrap()
    }

    fn instructions(text: &str) -> Vec<String> {
        text.lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect()
    }

    #[test]
    fn function_sections_pop_parameters_in_reverse() {
        let text = flb(
            "function spark(int argc, str[] argv) -> int { return argc - 1; }",
        );

        let spark: Vec<_> = instructions(&text)
            .into_iter()
            .skip_while(|line| line != "@begin function spark")
            .take_while(|line| line != "@end function")
            .collect();

        assert_eq!(
            spark,
            vec![
                "@begin function spark",
                "spark:",
                "variable argv str true",
                "assign argv",
                "variable argc int false",
                "assign argc",
                "load argc",
                "number 1",
                "sub",
                "return",
                "number 0",
                "return",
            ]
        );
    }

    #[test]
    fn globals_section_comes_first() {
        let text = flb(
            "int x = 5; str s = \"a\\b\"; chr[] buffer;
             function spark(int argc, str[] argv) -> int { return x; }",
        );

        let lines = instructions(&text);
        assert_eq!(lines[0], "@begin globals __globals");
        assert!(lines.contains(&"global x int false".to_string()));
        assert!(lines.contains(&"string \"a\\\\b\"".to_string()));
        assert!(lines.contains(&"global buffer chr true".to_string()));
    }

    #[test]
    fn expression_statements_are_discarded() {
        let text = flb(
            "function spark(int argc, str[] argv) -> int { putc('a'); return -argc; }
             function(assembly) printc(chr c) -> int { \"\" }
             function putc(chr c) -> int { return printc(c); }",
        );

        let lines = instructions(&text);
        let call = lines.iter().position(|line| line == "invoke putc").unwrap();
        assert_eq!(lines[call + 1], "delete");
        assert!(lines.contains(&"invoke_native printc".to_string()));

        // Negación unaria como resta desde cero
        let negate = lines.iter().position(|line| line == "load argc").unwrap();
        assert_eq!(lines[negate - 1], "number 0");
        assert_eq!(lines[negate + 1], "sub");
    }

    #[test]
    fn loops_share_the_unit_label_counter() {
        let text = flb(
            "function spark(int argc, str[] argv) -> int {
                 while argc > 0 { argc--; }
                 do { argc++; } while argc < 3;
                 return argc;
             }",
        );

        let lines = instructions(&text);
        assert!(lines.contains(&"0:".to_string()));
        assert!(lines.contains(&"goto_false 1".to_string()));
        assert!(lines.contains(&"goto 0".to_string()));
        assert!(lines.contains(&"2:".to_string()));
        assert!(lines.contains(&"goto_true 2".to_string()));
    }

    #[test]
    fn synthetic_trap_and_dead_code() {
        let text = flb(
            "function spark(int argc, str[] argv) -> int { return 0; }
             function orphan() -> int { return 1; }",
        );

        assert!(text.contains("@begin function unreachable"));
        assert!(!text.contains("orphan"));
    }
}
