//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone el texto fuente
//! ya preprocesado en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios se descartan durante esta operación. Cada
//! token emitido esta asociado al desplazamiento en bytes donde comienza,
//! lo cual permite rastrear errores en tanto los mismos como constructos
//! más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Este lexer no produce lexemas para casos donde no son necesarios.
//! Operadores, puntuación y palabras clave se identifican por el hecho
//! de lo que son y no incluyen lexemas. Los identificadores sí incluyen
//! su lexema original. Las constantes literales se resuelven a sus valores.
//!
//! # Reglas importantes del lenguaje
//! - El lenguaje es case-sensitive.
//! - Los operadores de más de un carácter se reconocen con un carácter
//!   de lookahead: `=`/`==`, `-`/`->`/`--`, `<`/`<=`/`<<`, etc.
//! - Las cadenas se delimitan con `"` y no tienen secuencias de escape;
//!   un salto de línea dentro de una cadena se preserva tal cual.
//! - Un literal de carácter contiene exactamente un byte entre `'`.
//!
//! # Errores
//! El lexer es capaz de recuperarse parcialmente de condiciones de error.
//! Esto ocurre en suficiente grado como para reportar más de un error por
//! ejecución, pero no lo suficiente como para permitir el avance a las
//! demás fases de la compilación.

use crate::source::Located;
use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
    sync::Arc,
    str::{CharIndices, FromStr},
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow, valid range is [0, {}]", i64::MAX)]
    IntOverflow,

    /// Se alcanzó el final del archivo dentro de una cadena.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Un literal de carácter no contiene exactamente un byte.
    #[error("Character literals must contain exactly one byte")]
    BadCharLiteral,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Arc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier(Arc::from(name))
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(i64),

    /// Literal de cadena.
    StrLiteral(Rc<str>),

    /// Literal de carácter.
    ChrLiteral(u8),

    /// `=`
    Assign,

    /// `==`
    Equals,

    /// `!=`
    NotEquals,

    /// `<`
    Less,

    /// `<=`
    LessEquals,

    /// `>`
    Greater,

    /// `>=`
    GreaterEquals,

    /// `!`
    Not,

    /// `~`
    BitNot,

    /// `&`
    BitAnd,

    /// `|`
    BitOr,

    /// `^`
    BitXor,

    /// `<<`
    ShiftLeft,

    /// `>>`
    ShiftRight,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Divide,

    /// `%`
    Modulo,

    /// `++`
    Increment,

    /// `--`
    Decrement,

    /// `->`
    Arrow,

    /// `,`
    Comma,

    /// `;`
    Semicolon,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        let punctuation = match self {
            Id(id) => return write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => return write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => return write!(fmt, "literal `{}`", integer),
            StrLiteral(string) => return write!(fmt, "literal {:?}", string),
            ChrLiteral(c) => return write!(fmt, "literal {:?}", *c as char),
            Assign => "=",
            Equals => "==",
            NotEquals => "!=",
            Less => "<",
            LessEquals => "<=",
            Greater => ">",
            GreaterEquals => ">=",
            Not => "!",
            BitNot => "~",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            ShiftLeft => "<<",
            ShiftRight => ">>",
            Plus => "+",
            Minus => "-",
            Times => "*",
            Divide => "/",
            Modulo => "%",
            Increment => "++",
            Decrement => "--",
            Arrow => "->",
            Comma => ",",
            Semicolon => ";",
            OpenParen => "(",
            CloseParen => ")",
            OpenCurly => "{",
            CloseCurly => "}",
            OpenSquare => "[",
            CloseSquare => "]",
        };

        write!(fmt, "`{}`", punctuation)
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Loop,
    Int,
    Str,
    Chr,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("function", Keyword::Function),
    ("return", Keyword::Return),
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("while", Keyword::While),
    ("do", Keyword::Do),
    ("for", Keyword::For),
    ("loop", Keyword::Loop),
    ("int", Keyword::Int),
    ("str", Keyword::Str),
    ("chr", Keyword::Chr),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = KEYWORDS
            .iter()
            .find(|(_, keyword)| keyword == self)
            .map_or("?", |(name, _)| name);

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<'a> {
    source: Peekable<CharIndices<'a>>,
    length: usize,
    state: State,
    start: usize,
    next: usize,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error.
    Error,

    /// Estado de completitud; siempre emite el token incluido
    /// y pasa a [`State::Start`].
    Complete(Token),

    /// Se encontró `/`, puede iniciar un comentario.
    Slash,

    /// Comentario de línea.
    ///
    /// Este estado vuelve a [`State::Start`] al encontrar `'\n'`.
    Comment,

    /// Constante entera.
    Integer(i64),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Cuerpo de un literal de cadena.
    Quoted(String),

    /// Literal de carácter, con o sin su byte interior.
    Character(Option<u8>),

    /// Se encontró `=`.
    AfterEquals,

    /// Se encontró `!`.
    AfterBang,

    /// Se encontró `<`.
    AfterLess,

    /// Se encontró `>`.
    AfterGreater,

    /// Se encontró `-`.
    AfterMinus,

    /// Se encontró `+`.
    AfterPlus,
}

impl<'a> Lexer<'a> {
    /// Crea un lexer en estado inicial a partir del texto fuente.
    pub fn new(text: &'a str) -> Self {
        Lexer {
            source: text.char_indices().peekable(),
            length: text.len(),
            state: State::Start,
            start: 0,
            next: 0,
        }
    }

    /// Reduce la entrada a sea una secuencia conocida de tokens
    /// infalibles o una secuencia de errores.
    ///
    /// En caso de que ocurra al menos un error, el lexer dejará
    /// de buscar tokens exitosos y comenzará a acumular solamente
    /// errores.
    pub fn try_exhaustive(mut self) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => {
                    drop(tokens);

                    let mut errors = vec![error];
                    errors.extend(self.filter_map(Result::err));

                    return Err(errors);
                }
            }
        }

        Ok(tokens)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<Token>, LexerError> {
        use {State::*, Token::*};

        loop {
            let next_char = self.source.peek().map(|&(_, c)| c);
            self.next = self.source.peek().map_or(self.length, |&(offset, _)| offset);

            if let Start = self.state {
                self.start = self.next;
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                // Se descarta la línea donde ocurrió el error
                (Error, None) => return Ok(None),
                (Error, Some('\n')) => self.state = Start,
                (Error, Some(_)) => (),

                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some(';')) => self.state = Complete(Semicolon),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('{')) => self.state = Complete(OpenCurly),
                (Start, Some('}')) => self.state = Complete(CloseCurly),
                (Start, Some('[')) => self.state = Complete(OpenSquare),
                (Start, Some(']')) => self.state = Complete(CloseSquare),
                (Start, Some('*')) => self.state = Complete(Times),
                (Start, Some('%')) => self.state = Complete(Modulo),
                (Start, Some('~')) => self.state = Complete(BitNot),
                (Start, Some('&')) => self.state = Complete(BitAnd),
                (Start, Some('|')) => self.state = Complete(BitOr),
                (Start, Some('^')) => self.state = Complete(BitXor),

                // Posibles operadores compuestos
                (Start, Some('/')) => self.state = Slash,
                (Start, Some('=')) => self.state = AfterEquals,
                (Start, Some('!')) => self.state = AfterBang,
                (Start, Some('<')) => self.state = AfterLess,
                (Start, Some('>')) => self.state = AfterGreater,
                (Start, Some('-')) => self.state = AfterMinus,
                (Start, Some('+')) => self.state = AfterPlus,

                (Start, Some('"')) => self.state = Quoted(String::new()),
                (Start, Some('\'')) => self.state = Character(None),

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                // La constante inicia en cero y el dígito se acumula
                // en el caso para constantes enteras
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some(c)) => return Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => return Ok(Some(std::mem::replace(value, Comma))),

                (Slash, Some('/')) => self.state = Comment,
                (Slash, _) => return Ok(Some(Divide)),

                (Comment, Some('\n')) => self.state = Start,
                (Comment, Some(_)) => (),
                (Comment, None) => self.state = Start,

                (AfterEquals, Some('=')) => self.state = Complete(Equals),
                (AfterEquals, _) => return Ok(Some(Assign)),

                (AfterBang, Some('=')) => self.state = Complete(NotEquals),
                (AfterBang, _) => return Ok(Some(Not)),

                (AfterLess, Some('=')) => self.state = Complete(LessEquals),
                (AfterLess, Some('<')) => self.state = Complete(ShiftLeft),
                (AfterLess, _) => return Ok(Some(Less)),

                (AfterGreater, Some('=')) => self.state = Complete(GreaterEquals),
                (AfterGreater, Some('>')) => self.state = Complete(ShiftRight),
                (AfterGreater, _) => return Ok(Some(Greater)),

                (AfterMinus, Some('>')) => self.state = Complete(Arrow),
                (AfterMinus, Some('-')) => self.state = Complete(Decrement),
                (AfterMinus, _) => return Ok(Some(Minus)),

                (AfterPlus, Some('+')) => self.state = Complete(Increment),
                (AfterPlus, _) => return Ok(Some(Plus)),

                // Acumulación dígito por dígito de constantes enteras
                (Integer(accumulated), Some(digit)) if digit.is_ascii_digit() => {
                    let digit = i64::from(digit as u8 - b'0');

                    match accumulated
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                    {
                        Some(result) => *accumulated = result,
                        None => return Err(LexerError::IntOverflow),
                    }
                }

                (Integer(integer), _) => return Ok(Some(IntLiteral(*integer))),

                (Word(word), Some(c)) if c.is_ascii_alphanumeric() || c == '_' => word.push(c),
                (Word(word), _) => {
                    let token = match self::Keyword::from_str(word) {
                        Ok(keyword) => Keyword(keyword),
                        Err(()) => Id(Identifier(Arc::from(word.as_str()))),
                    };

                    return Ok(Some(token));
                }

                // Las cadenas terminan únicamente con otra comilla
                (Quoted(string), Some('"')) => {
                    let string = Rc::from(std::mem::take(string));
                    self.state = Complete(StrLiteral(string));
                }

                (Quoted(string), Some(c)) => string.push(c),
                (Quoted(_), None) => return Err(LexerError::UnterminatedString),

                (Character(None), Some(c)) if c.is_ascii() && c != '\'' => {
                    self.state = Character(Some(c as u8))
                }

                (Character(Some(c)), Some('\'')) => self.state = Complete(ChrLiteral(*c)),
                (Character(_), _) => return Err(LexerError::BadCharLiteral),
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            self.source.next();
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some(token)) => {
                self.state = State::Start;
                Some(Ok(Located::at(token, self.start)))
            }

            Err(error) => {
                self.state = State::Error;
                Some(Err(Located::at(error, self.next)))
            }
        }
    }
}

/// Descompone un texto completo en tokens.
pub fn tokenize(text: &str) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
    Lexer::new(text).try_exhaustive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Token> {
        tokenize(text)
            .expect("lexing failed")
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    #[test]
    fn splits_compound_operators() {
        use Token::*;

        assert_eq!(
            kinds("a == b = c -> d-- - e <= f << g >> h != !i ++"),
            vec![
                Id("a".into()),
                Equals,
                Id("b".into()),
                Assign,
                Id("c".into()),
                Arrow,
                Id("d".into()),
                Decrement,
                Minus,
                Id("e".into()),
                LessEquals,
                Id("f".into()),
                ShiftLeft,
                Id("g".into()),
                ShiftRight,
                Id("h".into()),
                NotEquals,
                Not,
                Id("i".into()),
                Increment,
            ]
        );
    }

    #[test]
    fn literals_and_keywords() {
        use Token::*;

        assert_eq!(
            kinds("int[] x = \"a\nb\"; chr c = 'z'; return 42 / 2;"),
            vec![
                Keyword(self::Keyword::Int),
                OpenSquare,
                CloseSquare,
                Id("x".into()),
                Assign,
                StrLiteral(Rc::from("a\nb")),
                Semicolon,
                Keyword(self::Keyword::Chr),
                Id("c".into()),
                Assign,
                ChrLiteral(b'z'),
                Semicolon,
                Keyword(self::Keyword::Return),
                IntLiteral(42),
                Divide,
                IntLiteral(2),
                Semicolon,
            ]
        );
    }

    #[test]
    fn comments_are_discarded() {
        let tokens = tokenize("x // comentario = 3\ny").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].offset(), 20);
    }

    #[test]
    fn tokens_carry_byte_offsets() {
        let tokens = tokenize("  foo  ==  12").unwrap();
        let offsets: Vec<_> = tokens.iter().map(Located::offset).collect();
        assert_eq!(offsets, vec![2, 7, 11]);
    }

    #[test]
    fn reports_illegal_characters_with_offset() {
        let errors = tokenize("int x;\nint @y;\nint $z;").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0].val(), LexerError::BadChar('@')));
        assert_eq!(errors[0].offset(), 11);
        assert!(matches!(errors[1].val(), LexerError::BadChar('$')));
    }

    #[test]
    fn malformed_literals() {
        let errors = tokenize("chr c = 'ab';").unwrap_err();
        assert!(matches!(errors[0].val(), LexerError::BadCharLiteral));

        let errors = tokenize("str s = \"open").unwrap_err();
        assert!(matches!(errors[0].val(), LexerError::UnterminatedString));

        let errors = tokenize("int n = 99999999999999999999;").unwrap_err();
        assert!(matches!(errors[0].val(), LexerError::IntOverflow));
    }
}
