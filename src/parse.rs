//! Análisis sintáctico.
//!
//! Parser de descenso recursivo. Las reglas que pueden fallar sin
//! consumir entrada significativa lo hacen con [`Failure::Weak`], lo
//! cual permite a la regla llamadora intentar alternativas. Toda
//! alternativa especulativa se ejecuta sobre una copia del parser
//! (ver `attempt()`), de modo que un fallo restaura exactamente la
//! posición original sin efectos secundarios.
//!
//! # Precedencia
//! De menor a mayor: negación lógica y comparación, aditivos,
//! multiplicativos y módulo, operadores de bits y desplazamientos,
//! operadores unarios y finalmente expresiones primarias.

use std::{iter::Peekable, slice};
use thiserror::Error;

use crate::{
    ast::*,
    lex::{Identifier, Keyword, Token},
    source::Located,
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected token {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected token {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier")]
    ExpectedId,

    #[error("Expected a statement")]
    ExpectedStatement,

    #[error("Expected any of `int`, `str`, `chr`")]
    ExpectedType,

    #[error("Expected an expression")]
    ExpectedExpr,

    #[error("Expected a literal initializer")]
    ExpectedLiteral,

    #[error("Expected a global declaration or a function definition")]
    ExpectedGlobal,

    #[error("Unknown function attribute `{0}`")]
    UnknownAttribute(Identifier),

    #[error("Assembly functions must consist of a single string literal")]
    ExpectedAssembly,

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

/// Construye un AST a partir de un flujo de tokens.
pub fn parse(tokens: &[Located<Token>]) -> Result<Ast, Located<ParserError>> {
    let mut parser = Parser {
        tokens: tokens.iter().peekable(),
        last_known: 0,
    };

    parser.program().map_err(Failure::coerce)
}

#[derive(Clone)]
struct Parser<'a> {
    tokens: Peekable<slice::Iter<'a, Located<Token>>>,
    last_known: usize,
}

enum Failure {
    Weak(Located<ParserError>),
    Strict(Located<ParserError>),
}

impl Failure {
    fn weak(self) -> Self {
        Failure::Weak(self.coerce())
    }

    fn strict(self) -> Self {
        Failure::Strict(self.coerce())
    }

    fn coerce(self) -> Located<ParserError> {
        match self {
            Failure::Weak(error) => error,
            Failure::Strict(error) => error,
        }
    }
}

type Parse<T> = Result<T, Failure>;

impl<'a> Parser<'a> {
    fn program(&mut self) -> Parse<Ast> {
        let mut items = Vec::new();
        while let Some(token) = self.peek() {
            let item = match token {
                Token::Keyword(Keyword::Function) => Item::Function(self.function()?),
                _ => Item::Global(self.global()?),
            };

            items.push(item);
        }

        Ok(Ast { items })
    }

    fn global(&mut self) -> Parse<GlobalDeclaration> {
        let datatype = match self.attempt(|s| s.datatype().map_err(Failure::weak)) {
            Ok(datatype) => datatype,
            Err(_) => {
                self.next()?;
                return self.fail(ParserError::ExpectedGlobal);
            }
        };

        let name = self.id()?.into_inner();
        let init = match self.accept(|token| matches!(token, Token::Assign).then(|| ())) {
            Some(()) => Some(self.literal()?),
            None => None,
        };

        self.expect(Token::Semicolon)?;

        Ok(GlobalDeclaration {
            var: NamedDatatype { name, datatype },
            init,
        })
    }

    fn literal(&mut self) -> Parse<Literal> {
        let literal = match self.next()?.into_inner() {
            Token::IntLiteral(integer) => Literal::Number(integer),
            Token::StrLiteral(string) => Literal::Str(string),
            Token::ChrLiteral(c) => Literal::Chr(c),
            Token::Minus => match self.next()?.into_inner() {
                Token::IntLiteral(integer) => Literal::Number(integer.wrapping_neg()),
                _ => return self.fail(ParserError::ExpectedLiteral),
            },

            _ => return self.fail(ParserError::ExpectedLiteral),
        };

        Ok(literal)
    }

    fn function(&mut self) -> Parse<Function> {
        self.keyword(Keyword::Function)?;

        let mut attributes = Attributes::empty();
        if let Some(Token::OpenParen) = self.peek() {
            self.expect(Token::OpenParen)?;
            for attribute in self.comma_separated(Parser::attribute, true)? {
                attributes |= attribute;
            }

            self.expect(Token::CloseParen)?;
        }

        let name = self.id()?.into_inner();

        self.expect(Token::OpenParen)?;
        let parameters = self.comma_separated(Parser::named_datatype, true)?;
        self.expect(Token::CloseParen)?;

        self.expect(Token::Arrow)?;
        let returns = self.datatype()?;

        let body = if attributes.contains(Attributes::ASSEMBLY) {
            self.expect(Token::OpenCurly)?;
            let blob = match self.next()?.into_inner() {
                Token::StrLiteral(blob) => blob,
                _ => return self.fail(ParserError::ExpectedAssembly),
            };

            self.expect(Token::CloseCurly)?;
            Body::Assembly(blob)
        } else {
            Body::Statements(self.statement_block()?)
        };

        Ok(Function {
            name,
            attributes,
            parameters,
            returns,
            body,
        })
    }

    fn attribute(&mut self) -> Parse<Attributes> {
        let name = self.id().map_err(Failure::weak)?.into_inner();
        match Attributes::from_name(name.as_ref()) {
            Some(attribute) => Ok(attribute),
            None => self.fail(ParserError::UnknownAttribute(name)),
        }
    }

    fn named_datatype(&mut self) -> Parse<NamedDatatype> {
        let datatype = self.datatype().map_err(Failure::weak)?;
        let name = self.id()?.into_inner();

        Ok(NamedDatatype { name, datatype })
    }

    fn datatype(&mut self) -> Parse<Datatype> {
        let kind = match self.next()?.into_inner() {
            Token::Keyword(Keyword::Int) => Kind::Int,
            Token::Keyword(Keyword::Str) => Kind::Str,
            Token::Keyword(Keyword::Chr) => Kind::Chr,
            _ => return self.fail(ParserError::ExpectedType),
        };

        match self.attempt(|s| s.expect(Token::OpenSquare).map_err(Failure::weak)) {
            Err(Failure::Weak(_)) => Ok(Datatype::scalar(kind)),
            result => {
                result?;
                self.expect(Token::CloseSquare)?;
                Ok(Datatype::array(kind))
            }
        }
    }

    fn statement_block(&mut self) -> Parse<Vec<Stmt>> {
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        loop {
            match self.attempt(Parser::statement) {
                Ok(statement) => statements.extend(statement),
                Err(Failure::Weak(error)) => {
                    self.expect(Token::CloseCurly)
                        .map_err(|_| Failure::Strict(error))?;

                    break Ok(statements);
                }

                Err(error) => break Err(error),
            }
        }
    }

    /// Una sentencia puede expandirse a más de una, como ocurre con `for`.
    fn statement(&mut self) -> Parse<Vec<Stmt>> {
        let statement = match self.lookahead(|s| s.next().map(Located::into_inner))? {
            Token::Keyword(Keyword::Return) => self.return_statement()?,
            Token::Keyword(Keyword::If) => Stmt::If(self.if_statement()?),
            Token::Keyword(Keyword::While) => self.while_statement()?,
            Token::Keyword(Keyword::Do) => self.do_while_statement()?,
            Token::Keyword(Keyword::Loop) => {
                self.keyword(Keyword::Loop)?;
                Stmt::Loop(self.statement_block()?)
            }

            Token::Keyword(Keyword::For) => return self.for_statement(),

            Token::CloseCurly => {
                self.next()?;
                return self.fail(ParserError::ExpectedStatement).map_err(Failure::weak);
            }

            _ => {
                let statement = self.simple_statement()?;
                self.expect(Token::Semicolon)?;
                statement
            }
        };

        Ok(vec![statement])
    }

    /// Sentencias sin bloque ni `;` final, válidas también en `for`.
    fn simple_statement(&mut self) -> Parse<Stmt> {
        // Si lo que sigue es un tipo de dato, se trata de una declaración
        if let Ok(datatype) = self.attempt(|s| s.datatype().map_err(Failure::weak)) {
            let name = self.id()?.into_inner();
            let init = match self.accept(|token| matches!(token, Token::Assign).then(|| ())) {
                Some(()) => Some(self.expr()?),
                None => None,
            };

            return Ok(Stmt::Declare {
                var: NamedDatatype { name, datatype },
                init,
            });
        }

        let assignment = self.attempt(|s| {
            let target = s.id()?.into_inner();
            s.expect(Token::Assign)?;
            Ok(target)
        });

        if let Ok(target) = assignment {
            let value = self.expr().map_err(Failure::strict)?;
            return Ok(Stmt::Assign { target, value });
        }

        let indexed = self.attempt(|s| {
            let target = s.id()?.into_inner();
            s.expect(Token::OpenSquare)?;
            let index = s.expr()?;
            s.expect(Token::CloseSquare)?;
            s.expect(Token::Assign)?;
            Ok((target, index))
        });

        if let Ok((target, index)) = indexed {
            let value = self.expr().map_err(Failure::strict)?;
            return Ok(Stmt::AssignIndexed {
                target,
                index,
                value,
            });
        }

        let step = self.attempt(|s| {
            let target = s.id()?.into_inner();
            match s.next()?.into_inner() {
                Token::Increment => Ok(Stmt::Increment(target)),
                Token::Decrement => Ok(Stmt::Decrement(target)),
                _ => s.fail(ParserError::ExpectedStatement),
            }
        });

        if let Ok(step) = step {
            return Ok(step);
        }

        let expr = self.expr().map_err(Failure::strict)?;
        Ok(Stmt::Expr(expr))
    }

    fn return_statement(&mut self) -> Parse<Stmt> {
        self.keyword(Keyword::Return)?;

        let value = match self.peek() {
            Some(Token::Semicolon) => None,
            _ => Some(self.expr().map_err(Failure::strict)?),
        };

        self.expect(Token::Semicolon)?;
        Ok(Stmt::Return(value))
    }

    fn if_statement(&mut self) -> Parse<Conditional> {
        self.keyword(Keyword::If)?;
        let condition = self.expr().map_err(Failure::strict)?;
        let then = self.statement_block()?;

        let otherwise = match self.peek() {
            Some(Token::Keyword(Keyword::Else)) => {
                self.keyword(Keyword::Else)?;
                match self.peek() {
                    Some(Token::Keyword(Keyword::If)) => Some(vec![Stmt::If(self.if_statement()?)]),
                    _ => Some(self.statement_block()?),
                }
            }

            _ => None,
        };

        Ok(Conditional {
            condition,
            then,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Parse<Stmt> {
        self.keyword(Keyword::While)?;
        let condition = self.expr().map_err(Failure::strict)?;
        let body = self.statement_block()?;

        Ok(Stmt::While { condition, body })
    }

    fn do_while_statement(&mut self) -> Parse<Stmt> {
        self.keyword(Keyword::Do)?;
        let body = self.statement_block()?;

        self.keyword(Keyword::While)?;
        let condition = self.expr().map_err(Failure::strict)?;
        self.expect(Token::Semicolon)?;

        Ok(Stmt::DoWhile { body, condition })
    }

    /// `for (init; cond; update) { ... }` se reduce a `init` seguido
    /// de un `while cond` cuyo cuerpo termina con `update`.
    fn for_statement(&mut self) -> Parse<Vec<Stmt>> {
        self.keyword(Keyword::For)?;
        self.expect(Token::OpenParen)?;

        let init = self.simple_statement()?;
        self.expect(Token::Semicolon)?;
        let condition = self.expr().map_err(Failure::strict)?;
        self.expect(Token::Semicolon)?;
        let update = self.simple_statement()?;
        self.expect(Token::CloseParen)?;

        let mut body = self.statement_block()?;
        body.push(update);

        Ok(vec![init, Stmt::While { condition, body }])
    }

    fn expr(&mut self) -> Parse<Expr> {
        self.comparison()
    }

    fn comparison(&mut self) -> Parse<Expr> {
        let mut expr = self.additive()?;
        while let Some(op) = self.accept(|token| match token {
            Token::Equals => Some(CmpOp::Equals),
            Token::NotEquals => Some(CmpOp::NotEquals),
            Token::Less => Some(CmpOp::Less),
            Token::LessEquals => Some(CmpOp::LessEquals),
            Token::Greater => Some(CmpOp::Greater),
            Token::GreaterEquals => Some(CmpOp::GreaterEquals),
            _ => None,
        }) {
            let rhs = self.additive().map_err(Failure::strict)?;
            expr = Expr::Compare(op, Box::new(expr), Box::new(rhs));
        }

        Ok(expr)
    }

    fn additive(&mut self) -> Parse<Expr> {
        let mut expr = self.multiplicative()?;
        while let Some(op) = self.accept(|token| match token {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            _ => None,
        }) {
            let rhs = self.multiplicative().map_err(Failure::strict)?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }

        Ok(expr)
    }

    fn multiplicative(&mut self) -> Parse<Expr> {
        let mut expr = self.bitwise()?;
        while let Some(op) = self.accept(|token| match token {
            Token::Times => Some(BinOp::Mul),
            Token::Divide => Some(BinOp::Div),
            Token::Modulo => Some(BinOp::Mod),
            _ => None,
        }) {
            let rhs = self.bitwise().map_err(Failure::strict)?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }

        Ok(expr)
    }

    fn bitwise(&mut self) -> Parse<Expr> {
        let mut expr = self.unary()?;
        while let Some(op) = self.accept(|token| match token {
            Token::BitAnd => Some(BinOp::And),
            Token::BitOr => Some(BinOp::Or),
            Token::BitXor => Some(BinOp::Xor),
            Token::ShiftLeft => Some(BinOp::ShiftLeft),
            Token::ShiftRight => Some(BinOp::ShiftRight),
            _ => None,
        }) {
            let rhs = self.unary().map_err(Failure::strict)?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Parse<Expr> {
        let op = self.accept(|token| match token {
            Token::Not => Some(None),
            Token::BitNot => Some(Some(UnOp::BitNot)),
            Token::Plus => Some(Some(UnOp::Plus)),
            Token::Minus => Some(Some(UnOp::Minus)),
            _ => None,
        });

        match op {
            // `!` niega una comparación completa
            Some(None) => Ok(Expr::Not(Box::new(self.comparison().map_err(Failure::strict)?))),
            Some(Some(op)) => Ok(Expr::Unary(op, Box::new(self.unary().map_err(Failure::strict)?))),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Parse<Expr> {
        let expr = match self.next()?.into_inner() {
            Token::IntLiteral(integer) => Expr::Literal(Literal::Number(integer)),
            Token::StrLiteral(string) => Expr::Literal(Literal::Str(string)),
            Token::ChrLiteral(c) => Expr::Literal(Literal::Chr(c)),

            Token::OpenParen => {
                let expr = self.expr().map_err(Failure::strict)?;
                self.expect(Token::CloseParen)?;
                expr
            }

            Token::Id(id) => match self.peek() {
                Some(Token::OpenParen) => {
                    self.expect(Token::OpenParen)?;
                    let arguments = self.comma_separated(Parser::expr, true)?;
                    self.expect(Token::CloseParen)?;

                    Expr::Call(Call {
                        callee: id,
                        arguments,
                    })
                }

                Some(Token::OpenSquare) => {
                    self.expect(Token::OpenSquare)?;
                    let index = self.expr().map_err(Failure::strict)?;
                    self.expect(Token::CloseSquare)?;

                    Expr::Index {
                        var: id,
                        index: Box::new(index),
                    }
                }

                _ => Expr::Lookup(id),
            },

            _ => return self.fail(ParserError::ExpectedExpr).map_err(Failure::weak),
        };

        Ok(expr)
    }

    fn attempt<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        let mut fork = self.clone();

        let result = rule(&mut fork);
        if result.is_ok() {
            *self = fork;
        }

        result
    }

    fn lookahead<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        rule(&mut self.clone())
    }

    fn comma_separated<T, F>(&mut self, mut rule: F, allow_empty: bool) -> Parse<Vec<T>>
    where
        F: FnMut(&mut Self) -> Parse<T>,
    {
        let mut items = match self.attempt(|s| rule(s)) {
            Err(Failure::Weak(_)) if allow_empty => return Ok(Vec::new()),
            item => vec![item.map_err(Failure::strict)?],
        };

        while self.accept(|token| matches!(token, Token::Comma).then(|| ())).is_some() {
            items.push(rule(self).map_err(Failure::strict)?);
        }

        Ok(items)
    }

    /// Consume el siguiente token solo si `map` lo acepta.
    fn accept<T, F>(&mut self, map: F) -> Option<T>
    where
        F: FnOnce(&Token) -> Option<T>,
    {
        let token: &'a Located<Token> = self.tokens.peek().copied()?;
        let accepted = map(token.val())?;

        self.last_known = token.offset();
        self.tokens.next();

        Some(accepted)
    }

    fn peek(&mut self) -> Option<&'a Token> {
        self.tokens.peek().copied().map(Located::val)
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (offset, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, offset)),
            _ => self.fail(ParserError::ExpectedId),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next().map(Located::into_inner) {
            Ok(found) if found == token => Ok(()),
            Ok(found) => self.fail(ParserError::UnexpectedToken(token, found)),
            Err(_) => self.fail(ParserError::MissingToken(token)),
        }
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.offset();
                Ok(token.clone())
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Failure::Strict(Located::at(error, self.last_known)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::tokenize;
    use std::rc::Rc;

    fn parse_str(text: &str) -> Result<Ast, Located<ParserError>> {
        let tokens = tokenize(text).expect("lexing failed");
        parse(&tokens)
    }

    fn body(ast: &Ast, name: &str) -> Vec<Stmt> {
        match &ast.function(name).expect("missing function").body {
            Body::Statements(statements) => statements.clone(),
            Body::Assembly(_) => panic!("unexpected assembly body"),
        }
    }

    #[test]
    fn entry_point_with_arguments() {
        let ast = parse_str("function spark(int argc, str[] argv) -> int { return 1 + 2; }").unwrap();
        let spark = ast.function("spark").unwrap();

        assert_eq!(spark.parameters.len(), 2);
        assert_eq!(spark.parameters[1].datatype, Datatype::array(Kind::Str));
        assert_eq!(spark.returns, Datatype::INT);

        match &body(&ast, "spark")[..] {
            [Stmt::Return(Some(Expr::Binary(BinOp::Add, _, _)))] => (),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn array_flag_survives_parsing() {
        let ast = parse_str("int[] x; chr y; function f() -> int { chr[] z; return 0; }").unwrap();

        let globals: Vec<_> = ast.globals().map(|global| global.var.datatype).collect();
        assert_eq!(globals, vec![Datatype::array(Kind::Int), Datatype::CHR]);
        assert_eq!(globals[0].to_string(), "int[]");

        match &body(&ast, "f")[0] {
            Stmt::Declare { var, init: None } => {
                assert_eq!(var.datatype, Datatype::array(Kind::Chr))
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn global_literal_initializers() {
        let ast = parse_str("int x = 5; int y = -3; str s = \"hi\"; chr c = 'k';").unwrap();
        let inits: Vec<_> = ast.globals().map(|global| global.init.clone()).collect();

        assert_eq!(
            inits,
            vec![
                Some(Literal::Number(5)),
                Some(Literal::Number(-3)),
                Some(Literal::Str(Rc::from("hi"))),
                Some(Literal::Chr(b'k')),
            ]
        );

        let error = parse_str("int x = y;").unwrap_err();
        assert!(matches!(error.val(), ParserError::ExpectedLiteral));
    }

    #[test]
    fn precedence_levels() {
        let ast = parse_str("function f() -> int { return 1 + 2 * 3 & 4 == 5; }").unwrap();

        // ((1 + (2 * (3 & 4))) == 5)
        match &body(&ast, "f")[0] {
            Stmt::Return(Some(Expr::Compare(CmpOp::Equals, lhs, _))) => match &**lhs {
                Expr::Binary(BinOp::Add, _, product) => match &**product {
                    Expr::Binary(BinOp::Mul, _, and) => {
                        assert!(matches!(&**and, Expr::Binary(BinOp::And, _, _)))
                    }
                    other => panic!("unexpected {:?}", other),
                },
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn logical_not_covers_comparison() {
        let ast = parse_str("function f(int a) -> int { return !a == 1; }").unwrap();
        match &body(&ast, "f")[0] {
            Stmt::Return(Some(Expr::Not(inner))) => {
                assert!(matches!(&**inner, Expr::Compare(CmpOp::Equals, _, _)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn statements_are_disambiguated() {
        let source = "function f(int[] a) -> int {
            int i = 0;
            i = i + 1;
            a[i] = 3;
            i++;
            i--;
            g(a[0]);
            return a[i];
        }";

        let statements = body(&parse_str(source).unwrap(), "f");
        assert!(matches!(statements[0], Stmt::Declare { .. }));
        assert!(matches!(statements[1], Stmt::Assign { .. }));
        assert!(matches!(statements[2], Stmt::AssignIndexed { .. }));
        assert!(matches!(statements[3], Stmt::Increment(_)));
        assert!(matches!(statements[4], Stmt::Decrement(_)));
        assert!(matches!(statements[5], Stmt::Expr(Expr::Call(_))));
        assert!(matches!(statements[6], Stmt::Return(Some(Expr::Index { .. }))));
    }

    #[test]
    fn for_desugars_into_while() {
        let source = "function f() -> int {
            for (int i = 0; i < 10; i++) { g(i); }
            return 0;
        }";

        let statements = body(&parse_str(source).unwrap(), "f");
        assert_eq!(statements.len(), 3);
        assert!(matches!(statements[0], Stmt::Declare { .. }));

        match &statements[1] {
            Stmt::While { body, .. } => {
                assert_eq!(body.len(), 2);
                assert!(matches!(body[1], Stmt::Increment(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn else_if_chains_nest() {
        let source = "function f(int x) -> int {
            if x == 1 { return 1; } else if x == 2 { return 2; } else { return 3; }
            do { x--; } while x > 0;
            loop { return x; }
        }";

        let statements = body(&parse_str(source).unwrap(), "f");
        match &statements[0] {
            Stmt::If(Conditional {
                otherwise: Some(otherwise),
                ..
            }) => match &otherwise[..] {
                [Stmt::If(inner)] => assert!(inner.otherwise.is_some()),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(statements[1], Stmt::DoWhile { .. }));
        assert!(matches!(statements[2], Stmt::Loop(_)));
    }

    #[test]
    fn attributes_and_assembly_bodies() {
        let source = "function(assembly, keep) printc(chr c) -> int { \"\tret\n\" }
                      function(noreturn, global) halt() -> int { halt(); }";

        let ast = parse_str(source).unwrap();
        let printc = ast.function("printc").unwrap();
        assert_eq!(printc.attributes, Attributes::ASSEMBLY | Attributes::KEEP);
        assert!(matches!(&printc.body, Body::Assembly(blob) if &**blob == "\tret\n"));

        let halt = ast.function("halt").unwrap();
        assert!(halt.is(Attributes::NORETURN));
        assert!(halt.is(Attributes::GLOBAL));

        let error = parse_str("function(fast) f() -> int { return 0; }").unwrap_err();
        assert!(matches!(error.val(), ParserError::UnknownAttribute(_)));
    }

    #[test]
    fn errors_point_at_failing_token() {
        let source = "function f() -> int {\n  return 1 +;\n}";
        let error = parse_str(source).unwrap_err();

        assert_eq!(error.offset(), source.find(';').unwrap());
    }
}
