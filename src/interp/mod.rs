//! Intérprete directo sobre el AST.
//!
//! Todo valor es una palabra de 64 bits. Los arreglos y las cadenas
//! viven en un heap simulado de celdas ([`Memory`]), de modo que el
//! elemento `n` de un arreglo en `p` es la celda `p + n`. Las funciones
//! con cuerpo de ensamblador se resuelven por nombre contra un conjunto
//! fijo de funciones nativas.

use log::{debug, trace};
use std::{collections::HashMap, io::{self, Write}};
use thiserror::Error;

use crate::{
    ast::{self, Ast, Body, Conditional, Datatype, Expr, Function, Kind, Literal, Stmt, UnOp},
    ast::{Attributes, ENTRY_POINT},
    lex::Identifier,
    semantic::{check_global, FunctionTable, SemanticError},
};

mod memory;

pub use memory::{Allocation, Memory, MemoryError, DEFAULT_CAPACITY};

/// Valor de una expresión.
pub type Value = i64;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Program has no `{}` function", ENTRY_POINT)]
    NoEntryPoint,

    #[error("Argument `{parameter}` of `{callee}` expects {expected}, found {found}")]
    DatatypeMismatch {
        callee: Identifier,
        parameter: Identifier,
        expected: Datatype,
        found: Datatype,
    },

    #[error("Control reached the end of noreturn function `{0}`")]
    Unreachable(Identifier),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Assignment to a bit of scalar `{0}` is not supported")]
    BitAssignment(Identifier),

    #[error("Assembly function `{0}` is not a known native")]
    UnknownNative(Identifier),
}

/// Interrupción del flujo normal de evaluación.
#[derive(Debug)]
enum Halt {
    /// `do_exit()` termina el programa con un código.
    Exit(Value),
    Fault(RuntimeError),
}

impl From<RuntimeError> for Halt {
    fn from(error: RuntimeError) -> Self {
        Halt::Fault(error)
    }
}

impl From<SemanticError> for Halt {
    fn from(error: SemanticError) -> Self {
        Halt::Fault(error.into())
    }
}

impl From<MemoryError> for Halt {
    fn from(error: MemoryError) -> Self {
        Halt::Fault(error.into())
    }
}

impl From<io::Error> for Halt {
    fn from(error: io::Error) -> Self {
        Halt::Fault(error.into())
    }
}

#[derive(Copy, Clone, Debug)]
struct Variable {
    datatype: Datatype,
    value: Value,
}

impl Variable {
    fn new(datatype: Datatype, value: Value) -> Self {
        Variable {
            datatype,
            value: truncate(datatype, value),
        }
    }
}

/// Las locales tienen ámbito de función, no de bloque.
type Frame = HashMap<Identifier, Variable>;

pub struct Interpreter<'a, W> {
    functions: FunctionTable<'a>,
    globals: Frame,
    memory: Memory,
    output: W,
}

impl<'a, W: Write> Interpreter<'a, W> {
    /// Inicializa las globales en orden de declaración.
    pub fn new(ast: &'a Ast, memory: Memory, output: W) -> Result<Self, RuntimeError> {
        let mut interpreter = Interpreter {
            functions: FunctionTable::build(ast)?,
            globals: HashMap::new(),
            memory,
            output,
        };

        for global in ast.globals() {
            check_global(global)?;

            let var = &global.var;
            let value = match &global.init {
                Some(literal) => interpreter.literal(literal)?,
                None => 0,
            };

            let previous = interpreter
                .globals
                .insert(var.name.clone(), Variable::new(var.datatype, value));

            if previous.map_or(false, |previous| previous.datatype != var.datatype) {
                return Err(SemanticError::Redefined(var.name.clone()).into());
            }
        }

        Ok(interpreter)
    }

    /// Ejecuta `spark(argc, argv)` y retorna el código de salida.
    ///
    /// `argv` se construye con cadenas internadas y se libera al
    /// terminar, de modo que no aparece entre las fugas.
    pub fn run(&mut self, args: &[&str]) -> Result<Value, RuntimeError> {
        let spark = self
            .functions
            .get(ENTRY_POINT)
            .ok_or(RuntimeError::NoEntryPoint)?;

        let argv = self.memory.allocate(args.len() as i64)?;
        for (index, arg) in args.iter().enumerate() {
            let string = self.memory.intern(arg)?;
            self.memory.write(argv, index as i64, string)?;
        }

        let arguments = vec![
            (Some(Datatype::INT), args.len() as Value),
            (Some(Datatype::array(Kind::Str)), argv),
        ];

        let result = match self.call(spark, arguments) {
            Ok(value) => value,
            Err(Halt::Exit(code)) => {
                debug!("Program exited with code {}", code);
                code
            }

            Err(Halt::Fault(error)) => return Err(error),
        };

        self.memory.deallocate(argv)?;
        self.output.flush()?;

        debug!(
            "Heap: {} of {} cells in use, {} leaked allocations",
            self.memory.used(),
            self.memory.capacity(),
            self.memory.leaks().len()
        );

        Ok(result)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Los argumentos sin tipo estático adoptan el del parámetro.
    fn call(&mut self, function: &'a Function, arguments: Vec<(Option<Datatype>, Value)>) -> Result<Value, Halt> {
        let (expected, found) = (function.parameters.len(), arguments.len());
        if expected != found {
            let callee = function.name.clone();
            return Err(SemanticError::Arity { callee, expected, found }.into());
        }

        for (parameter, (datatype, _)) in function.parameters.iter().zip(&arguments) {
            let datatype = match datatype {
                Some(datatype) => *datatype,
                None => continue,
            };

            if !parameter.datatype.compatible(datatype) {
                return Err(RuntimeError::DatatypeMismatch {
                    callee: function.name.clone(),
                    parameter: parameter.name.clone(),
                    expected: parameter.datatype,
                    found: datatype,
                }
                .into());
            }
        }

        let body = match &function.body {
            Body::Statements(body) => body,
            Body::Assembly(_) => {
                let values: Vec<_> = arguments.iter().map(|(_, value)| *value).collect();
                return self.native(function, &values);
            }
        };

        trace!("Entering `{}`", function.name);

        let mut frame: Frame = function
            .parameters
            .iter()
            .zip(arguments)
            .map(|(parameter, (_, value))| {
                let datatype = parameter.datatype;
                (parameter.name.clone(), Variable::new(datatype, truncate(datatype, value)))
            })
            .collect();

        match self.block(&mut frame, body)? {
            _ if function.is(Attributes::NORETURN) => {
                Err(RuntimeError::Unreachable(function.name.clone()).into())
            }

            Some(value) => Ok(truncate(function.returns, value)),
            None => Ok(0),
        }
    }

    fn native(&mut self, function: &Function, arguments: &[Value]) -> Result<Value, Halt> {
        let argument = arguments.first().copied().unwrap_or(0);

        match function.name.as_ref() {
            "printc" => {
                self.output.write_all(&[argument as u8])?;
                Ok(0)
            }

            "allocate" => Ok(self.memory.allocate(argument)?),

            "deallocate" => {
                self.memory.deallocate(argument)?;
                Ok(0)
            }

            "do_exit" => Err(Halt::Exit(argument)),
            _ => Err(RuntimeError::UnknownNative(function.name.clone()).into()),
        }
    }

    fn block(&mut self, frame: &mut Frame, block: &[Stmt]) -> Result<Option<Value>, Halt> {
        for stmt in block {
            if let Some(value) = self.statement(frame, stmt)? {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    fn statement(&mut self, frame: &mut Frame, stmt: &Stmt) -> Result<Option<Value>, Halt> {
        match stmt {
            Stmt::Declare { var, init } => {
                if let Some(previous) = frame.get(&var.name) {
                    if previous.datatype != var.datatype {
                        return Err(SemanticError::Redefined(var.name.clone()).into());
                    }
                }

                let value = match init {
                    Some(init) => self.eval(frame, init)?,
                    None => 0,
                };

                frame.insert(var.name.clone(), Variable::new(var.datatype, value));
            }

            Stmt::Assign { target, value } => {
                let value = self.eval(frame, value)?;
                let var = variable(frame, &mut self.globals, target)?;
                var.value = truncate(var.datatype, value);
            }

            Stmt::AssignIndexed { target, index, value } => {
                let var = *variable(frame, &mut self.globals, target)?;
                if !var.datatype.array {
                    return Err(RuntimeError::BitAssignment(target.clone()).into());
                }

                let index = self.eval(frame, index)?;
                let value = truncate(var.datatype.element(), self.eval(frame, value)?);
                self.memory.write(var.value, index, value)?;
            }

            Stmt::Increment(target) => step(variable(frame, &mut self.globals, target)?, 1),
            Stmt::Decrement(target) => step(variable(frame, &mut self.globals, target)?, -1),

            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(frame, value)?,
                    None => 0,
                };

                return Ok(Some(value));
            }

            Stmt::If(Conditional { condition, then, otherwise }) => {
                if self.eval(frame, condition)? != 0 {
                    return self.block(frame, then);
                } else if let Some(otherwise) = otherwise {
                    return self.block(frame, otherwise);
                }
            }

            Stmt::While { condition, body } => {
                while self.eval(frame, condition)? != 0 {
                    if let Some(value) = self.block(frame, body)? {
                        return Ok(Some(value));
                    }
                }
            }

            Stmt::DoWhile { body, condition } => loop {
                if let Some(value) = self.block(frame, body)? {
                    return Ok(Some(value));
                } else if self.eval(frame, condition)? == 0 {
                    break;
                }
            },

            Stmt::Loop(body) => loop {
                if let Some(value) = self.block(frame, body)? {
                    return Ok(Some(value));
                }
            },

            Stmt::Expr(expr) => {
                self.eval(frame, expr)?;
            }
        }

        Ok(None)
    }

    fn eval(&mut self, frame: &mut Frame, expr: &Expr) -> Result<Value, Halt> {
        let value = match expr {
            Expr::Literal(literal) => self.literal(literal)?,
            Expr::Lookup(name) => variable(frame, &mut self.globals, name)?.value,

            Expr::Index { var, index } => {
                let var = *variable(frame, &mut self.globals, var)?;
                let index = self.eval(frame, index)?;

                if var.datatype.array {
                    self.memory.read(var.value, index)?
                } else {
                    ast::bit_test(var.value, index)
                }
            }

            Expr::Call(call) => {
                let function = self.functions.resolve(call)?;

                let mut arguments = Vec::with_capacity(call.arguments.len());
                for argument in &call.arguments {
                    let datatype = self.datatype(frame, argument)?;
                    arguments.push((datatype, self.eval(frame, argument)?));
                }

                self.call(function, arguments)?
            }

            Expr::Binary(op, a, b) => {
                let (a, b) = (self.eval(frame, a)?, self.eval(frame, b)?);
                op.eval(a, b).ok_or(RuntimeError::DivisionByZero)?
            }

            Expr::Compare(op, a, b) => {
                let (a, b) = (self.eval(frame, a)?, self.eval(frame, b)?);
                op.eval(a, b) as Value
            }

            Expr::Unary(op, operand) => {
                let operand = self.eval(frame, operand)?;
                match op {
                    UnOp::Plus => operand,
                    UnOp::Minus => operand.wrapping_neg(),
                    UnOp::BitNot => !operand,
                }
            }

            Expr::Not(operand) => (self.eval(frame, operand)? == 0) as Value,
        };

        Ok(value)
    }

    /// Tipo estático de una expresión usada como argumento.
    ///
    /// Las expresiones aritméticas, lógicas y de comparación no tienen
    /// tipo propio, igual que en los backends compilados.
    fn datatype(&mut self, frame: &mut Frame, expr: &Expr) -> Result<Option<Datatype>, RuntimeError> {
        let datatype = match expr {
            Expr::Literal(literal) => literal.datatype(),
            Expr::Lookup(name) => variable(frame, &mut self.globals, name)?.datatype,

            Expr::Index { var, .. } => {
                let datatype = variable(frame, &mut self.globals, var)?.datatype;
                if datatype.array {
                    datatype.element()
                } else {
                    Datatype::INT
                }
            }

            Expr::Call(call) => self.functions.resolve(call)?.returns,

            Expr::Binary(..) | Expr::Compare(..) | Expr::Unary(..) | Expr::Not(_) => return Ok(None),
        };

        Ok(Some(datatype))
    }

    fn literal(&mut self, literal: &Literal) -> Result<Value, MemoryError> {
        match literal {
            Literal::Number(number) => Ok(*number),
            Literal::Chr(c) => Ok(*c as Value),
            Literal::Str(string) => self.memory.intern(string),
        }
    }
}

fn variable<'f>(
    frame: &'f mut Frame,
    globals: &'f mut Frame,
    name: &Identifier,
) -> Result<&'f mut Variable, SemanticError> {
    if let Some(var) = frame.get_mut(name) {
        return Ok(var);
    }

    globals
        .get_mut(name)
        .ok_or_else(|| SemanticError::Undefined(name.clone()))
}

fn step(var: &mut Variable, delta: Value) {
    var.value = truncate(var.datatype, var.value.wrapping_add(delta));
}

/// Un `chr` escalar ocupa un byte.
fn truncate(datatype: Datatype, value: Value) -> Value {
    match datatype {
        Datatype { kind: Kind::Chr, array: false } => value & 0xff,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::tokenize, parse::parse};

    fn ast(source: &str) -> Ast {
        parse(&tokenize(source).unwrap()).unwrap()
    }

    const NATIVES: &str = "
        function(assembly) printc(chr c) -> int { \"\" }
        function(assembly) allocate(int n) -> int[] { \"\" }
        function(assembly) deallocate(int[] p) -> int { \"\" }
        function(assembly, noreturn) do_exit(int code) -> int { \"\" }
    ";

    fn run(source: &str, args: &[&str]) -> (Result<Value, RuntimeError>, String, Vec<Allocation>) {
        let program = ast(&format!("{}{}", NATIVES, source));
        let mut interpreter = Interpreter::new(&program, Memory::default(), Vec::new()).unwrap();

        let result = interpreter.run(args);
        let output = String::from_utf8(interpreter.output().clone()).unwrap();

        (result, output, interpreter.memory().leaks())
    }

    #[test]
    fn recursion_and_arithmetic() {
        let (result, _, _) = run(
            "function fib(int n) -> int {
                 if (n < 2) { return n; }
                 return fib(n - 1) + fib(n - 2);
             }

             function spark(int argc, str[] argv) -> int {
                 return fib(10) + -7 / 2 * 0 + 100 % 3 << 4 >> 1;
             }",
            &[],
        );

        // Los operadores de bits ligan más fuerte que `%`
        assert_eq!(result.unwrap(), 55 + 100 % 24);
    }

    #[test]
    fn loops_and_locals() {
        let (result, _, _) = run(
            "function spark(int argc, str[] argv) -> int {
                 int total = 0;
                 int i = 0;
                 while (i < 5) { total = total + i; i++; }
                 do { total--; } while (0);
                 loop {
                     int k = 3;
                     if (total > 100) { return total; }
                     total = total * k;
                 }
             }",
            &[],
        );

        assert_eq!(result.unwrap(), 243);
    }

    #[test]
    fn arguments_and_output() {
        let (result, output, leaks) = run(
            "function same(str a, str b) -> int { return a == b; }

             function spark(int argc, str[] argv) -> int {
                 printc('o');
                 printc('k');
                 printc('\n');
                 return argc * 10 + same(argv[1], \"hello\") + same(argv[0], \"hello\");
             }",
            &["prog", "hello"],
        );

        assert_eq!(result.unwrap(), 21);
        assert_eq!(output, "ok\n");
        assert!(leaks.is_empty());
    }

    #[test]
    fn globals_and_chr_truncation() {
        let (result, _, _) = run(
            "int counter = 250;
             chr c;

             function bump() -> int { counter++; return counter; }

             function spark(int argc, str[] argv) -> int {
                 c = 300;
                 bump();
                 return bump() + c;
             }",
            &[],
        );

        assert_eq!(result.unwrap(), 252 + 44);
    }

    #[test]
    fn heap_arrays_and_leaks() {
        let (result, _, leaks) = run(
            "function spark(int argc, str[] argv) -> int {
                 int[] kept = allocate(3);
                 int[] freed = allocate(2);
                 kept[2] = 40;
                 freed[0] = 2;
                 int sum = kept[2] + freed[0];
                 deallocate(freed);
                 return sum;
             }",
            &[],
        );

        assert_eq!(result.unwrap(), 42);
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].len, 3);
    }

    #[test]
    fn bit_index_reads_mask() {
        let (result, _, _) = run(
            "function spark(int argc, str[] argv) -> int {
                 int flags = 10;
                 return flags[1] + flags[2] * 100 + flags[3];
             }",
            &[],
        );

        assert_eq!(result.unwrap(), 2 + 8);
    }

    #[test]
    fn exit_stops_everything() {
        let (result, output, _) = run(
            "function spark(int argc, str[] argv) -> int {
                 printc('a');
                 do_exit(7);
                 printc('b');
                 return 0;
             }",
            &[],
        );

        assert_eq!(result.unwrap(), 7);
        assert_eq!(output, "a");
    }

    #[test]
    fn runtime_faults() {
        let (result, _, _) = run(
            "function spark(int argc, str[] argv) -> int { return 1 / (argc - argc); }",
            &[],
        );
        assert!(matches!(result, Err(RuntimeError::DivisionByZero)));

        let (result, _, _) = run(
            "function(noreturn) halt() -> int { int x = 1; }
             function spark(int argc, str[] argv) -> int { return halt(); }",
            &[],
        );
        assert!(matches!(result, Err(RuntimeError::Unreachable(name)) if name.as_ref() == "halt"));

        let (result, _, _) = run(
            "function takes(int n) -> int { return n; }
             function spark(int argc, str[] argv) -> int { return takes('x'); }",
            &[],
        );
        assert!(matches!(result, Err(RuntimeError::DatatypeMismatch { .. })));

        let (result, _, _) = run(
            "function spark(int argc, str[] argv) -> int { int x = 1; x[0] = 1; return x; }",
            &[],
        );
        assert!(matches!(result, Err(RuntimeError::BitAssignment(_))));

        let (result, _, _) = run(
            "function spark(int argc, str[] argv) -> int { return missing; }",
            &[],
        );
        assert!(matches!(
            result,
            Err(RuntimeError::Semantic(SemanticError::Undefined(_)))
        ));
    }

    #[test]
    fn expression_arguments_take_the_parameter_type() {
        let (result, output, _) = run(
            "function digit(int n) -> int { return printc(n % 10 + '0'); }

             function spark(int argc, str[] argv) -> int {
                 chr c = 'A';
                 printc(c + 1);
                 digit(argc + 6);
                 printc(c + 256);
                 return 0;
             }",
            &["x"],
        );

        result.unwrap();
        assert_eq!(output, "B7A");

        let (result, _, _) = run(
            "function spark(int argc, str[] argv) -> int { return printc(argc); }",
            &[],
        );
        assert!(matches!(
            result,
            Err(RuntimeError::DatatypeMismatch { expected: Datatype::CHR, found: Datatype::INT, .. })
        ));
    }

    #[test]
    fn missing_entry_point() {
        let program = ast("function other() -> int { return 0; }");
        let mut interpreter = Interpreter::new(&program, Memory::default(), io::sink()).unwrap();
        assert!(matches!(interpreter.run(&[]), Err(RuntimeError::NoEntryPoint)));
    }
}
