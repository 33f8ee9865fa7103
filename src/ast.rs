//! Árbol de sintaxis abstracta.
//!
//! Este es el modelo de datos compartido que consumen todos los
//! backends: ambos emisores de ensamblador, el compilador a bytecode
//! y el intérprete. Cada variante lleva exactamente los campos que
//! necesita, por lo cual los consumidores hacen `match` exhaustivo
//! sin verificaciones defensivas de forma.

use bitflags::bitflags;
use std::{
    fmt::{self, Display},
    rc::Rc,
};

use crate::lex::Identifier;

/// Nombre de la función de entrada.
pub const ENTRY_POINT: &str = "spark";

/// Nombre de la rutina de trampa para código inalcanzable.
pub const UNREACHABLE: &str = "unreachable";

/// Unidad de compilación.
#[derive(Debug, Default)]
pub struct Ast {
    pub items: Vec<Item>,
}

impl Ast {
    /// Itera sobre las declaraciones globales en orden.
    pub fn globals(&self) -> impl Iterator<Item = &GlobalDeclaration> {
        self.items.iter().filter_map(|item| match item {
            Item::Global(global) => Some(global),
            Item::Function(_) => None,
        })
    }

    /// Itera sobre las funciones en orden.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(function) => Some(function),
            Item::Global(_) => None,
        })
    }

    /// Busca una función por nombre.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions().find(|function| function.name.as_ref() == name)
    }
}

/// Elemento de ámbito global.
#[derive(Debug)]
pub enum Item {
    Global(GlobalDeclaration),
    Function(Function),
}

/// Clase escalar de un tipo de dato.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Int,
    Str,
    Chr,
}

/// Descriptor de tipo sin nombre.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Datatype {
    pub kind: Kind,
    pub array: bool,
}

impl Datatype {
    pub const INT: Datatype = Datatype::scalar(Kind::Int);
    pub const STR: Datatype = Datatype::scalar(Kind::Str);
    pub const CHR: Datatype = Datatype::scalar(Kind::Chr);

    pub const fn scalar(kind: Kind) -> Self {
        Datatype { kind, array: false }
    }

    pub const fn array(kind: Kind) -> Self {
        Datatype { kind, array: true }
    }

    /// Dos descriptores son compatibles si y solo si coinciden tanto
    /// en clase como en la bandera de arreglo.
    pub fn compatible(self, other: Datatype) -> bool {
        self == other
    }

    /// Tipo de cada elemento de un arreglo.
    pub fn element(self) -> Datatype {
        Datatype::scalar(self.kind)
    }

    /// Tamaño de almacenamiento en bytes.
    ///
    /// Los arreglos son punteros, por lo cual solo un `chr` escalar
    /// ocupa un único byte.
    pub fn size(self) -> u32 {
        match (self.kind, self.array) {
            (Kind::Chr, false) => 1,
            _ => 8,
        }
    }

    /// Tamaño de cada elemento si este tipo se indexa como arreglo.
    pub fn element_size(self) -> u32 {
        self.element().size()
    }
}

impl Display for Kind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Kind::Int => "int",
            Kind::Str => "str",
            Kind::Chr => "chr",
        })
    }
}

impl Display for Datatype {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.kind)?;
        if self.array {
            fmt.write_str("[]")?;
        }

        Ok(())
    }
}

/// Descriptor de tipo con nombre, para declaraciones y parámetros.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedDatatype {
    pub name: Identifier,
    pub datatype: Datatype,
}

/// Constante literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    Number(i64),
    Str(Rc<str>),
    Chr(u8),
}

impl Literal {
    /// Tipo estático del literal.
    pub fn datatype(&self) -> Datatype {
        match self {
            Literal::Number(_) => Datatype::INT,
            Literal::Str(_) => Datatype::STR,
            Literal::Chr(_) => Datatype::CHR,
        }
    }
}

/// Declaración de variable global, inicializada solo con literales.
#[derive(Clone, Debug)]
pub struct GlobalDeclaration {
    pub var: NamedDatatype,
    pub init: Option<Literal>,
}

bitflags! {
    /// Atributos de una función.
    pub struct Attributes: u8 {
        /// El cuerpo es un bloque opaco de código de backend.
        const ASSEMBLY = 0x01;

        /// El control nunca debe alcanzar el retorno de la función.
        const NORETURN = 0x02;

        /// El símbolo se exporta.
        const GLOBAL = 0x04;

        /// La función sobrevive a eliminación de código muerto.
        const KEEP = 0x08;
    }
}

impl Attributes {
    /// Resuelve un atributo por su nombre en el código fuente.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "assembly" => Some(Attributes::ASSEMBLY),
            "noreturn" => Some(Attributes::NORETURN),
            "global" => Some(Attributes::GLOBAL),
            "keep" => Some(Attributes::KEEP),
            _ => None,
        }
    }
}

/// Definición de función.
#[derive(Debug)]
pub struct Function {
    pub name: Identifier,
    pub attributes: Attributes,
    pub parameters: Vec<NamedDatatype>,
    pub returns: Datatype,
    pub body: Body,
}

impl Function {
    pub fn is(&self, attribute: Attributes) -> bool {
        self.attributes.contains(attribute)
    }
}

/// Cuerpo de una función.
#[derive(Debug)]
pub enum Body {
    Statements(Vec<Stmt>),
    Assembly(Rc<str>),
}

/// Sentencia.
#[derive(Clone, Debug)]
pub enum Stmt {
    Declare {
        var: NamedDatatype,
        init: Option<Expr>,
    },

    Assign {
        target: Identifier,
        value: Expr,
    },

    AssignIndexed {
        target: Identifier,
        index: Expr,
        value: Expr,
    },

    Increment(Identifier),
    Decrement(Identifier),
    Return(Option<Expr>),
    If(Conditional),

    While {
        condition: Expr,
        body: Vec<Stmt>,
    },

    DoWhile {
        body: Vec<Stmt>,
        condition: Expr,
    },

    Loop(Vec<Stmt>),

    /// Expresión evaluada por sus efectos, descartando su valor.
    Expr(Expr),
}

/// Rama condicional, con `else` opcional.
#[derive(Clone, Debug)]
pub struct Conditional {
    pub condition: Expr,
    pub then: Vec<Stmt>,
    pub otherwise: Option<Vec<Stmt>>,
}

/// Expresión.
#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Literal),
    Lookup(Identifier),

    /// Acceso indexado: elemento de arreglo o bit de un escalar.
    Index {
        var: Identifier,
        index: Box<Expr>,
    },

    Call(Call),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),

    /// Negación lógica, resulta en 0 o 1.
    Not(Box<Expr>),
}

/// Invocación de función.
#[derive(Clone, Debug)]
pub struct Call {
    pub callee: Identifier,
    pub arguments: Vec<Expr>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
}

impl BinOp {
    /// Evaluación sobre palabras de 64 bits.
    ///
    /// Retorna `None` para división o módulo entre cero. El
    /// desplazamiento a la derecha es aritmético.
    pub fn eval(self, a: i64, b: i64) -> Option<i64> {
        use BinOp::*;

        Some(match self {
            Add => a.wrapping_add(b),
            Sub => a.wrapping_sub(b),
            Mul => a.wrapping_mul(b),
            Div | Mod if b == 0 => return None,
            Div => a.wrapping_div(b),
            Mod => a.wrapping_rem(b),
            And => a & b,
            Or => a | b,
            Xor => a ^ b,
            ShiftLeft => a.wrapping_shl(b as u32),
            ShiftRight => a.wrapping_shr(b as u32),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
}

impl CmpOp {
    pub fn eval(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Equals => a == b,
            CmpOp::NotEquals => a != b,
            CmpOp::Less => a < b,
            CmpOp::LessEquals => a <= b,
            CmpOp::Greater => a > b,
            CmpOp::GreaterEquals => a >= b,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    BitNot,
}

/// Prueba de bit sobre un escalar, `value & (1 << index)`.
///
/// No hay verificación de rango en ningún backend: un índice fuera
/// de `0..64` se reduce módulo 64 tal como lo hace el hardware.
pub fn bit_test(value: i64, index: i64) -> i64 {
    value & 1i64.wrapping_shl(index as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_is_exact() {
        assert!(Datatype::INT.compatible(Datatype::INT));
        assert!(!Datatype::INT.compatible(Datatype::CHR));
        assert!(!Datatype::INT.compatible(Datatype::array(Kind::Int)));
    }

    #[test]
    fn storage_sizes() {
        assert_eq!(Datatype::CHR.size(), 1);
        assert_eq!(Datatype::array(Kind::Chr).size(), 8);
        assert_eq!(Datatype::array(Kind::Chr).element_size(), 1);
        assert_eq!(Datatype::STR.size(), 8);
        assert_eq!(Datatype::array(Kind::Int).element_size(), 8);
    }

    #[test]
    fn shift_right_is_arithmetic() {
        assert_eq!(BinOp::ShiftRight.eval(-16, 2), Some(-4));
        assert_eq!(BinOp::ShiftLeft.eval(1, 65), Some(2));
        assert_eq!(BinOp::Div.eval(7, 0), None);
        assert_eq!(BinOp::Mod.eval(-7, 3), Some(-1));
    }

    #[test]
    fn bit_test_masks_full_word() {
        assert_eq!(bit_test(0b1010, 1), 0b10);
        assert_eq!(bit_test(0b1010, 2), 0);
        assert_eq!(bit_test(i64::MIN, 63), i64::MIN);
    }
}
