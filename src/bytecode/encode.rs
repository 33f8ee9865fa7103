use log::debug;
use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use thiserror::Error;

use super::{kind_from_name, type_tag, Opcode, LOCAL_SLOT_BASE, NATIVES};

#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("line {0}: instruction outside of a section")]
    OutsideSection(usize),

    #[error("line {line}: unknown instruction `{mnemonic}`")]
    UnknownInstruction { line: usize, mnemonic: String },

    #[error("line {0}: missing or malformed operand")]
    BadOperand(usize),

    #[error("line {line}: unknown native function `{name}`")]
    UnknownNative { line: usize, name: String },
}

/// Elemento de una imagen antes de enlazar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    /// Define un símbolo en la posición actual.
    Label(String),

    /// Define un símbolo con un valor fijo, sin ocupar espacio.
    Constant(String, u64),

    Byte(u8),
    Quad(i64),

    /// Espacio de 8 bytes que el enlazador reemplaza por el valor del
    /// símbolo.
    Reference(String),

    Bytes(Vec<u8>),
}

impl Item {
    /// Bytes que ocupa el ítem en la imagen.
    pub fn size(&self) -> u64 {
        match self {
            Item::Label(_) | Item::Constant(..) => 0,
            Item::Byte(_) => 1,
            Item::Quad(_) | Item::Reference(_) => 8,
            Item::Bytes(bytes) => bytes.len() as u64,
        }
    }
}

/// Forma textual `flenc`.
impl Display for Item {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Label(name) => write!(fmt, "{}:", name),
            Item::Constant(name, value) => write!(fmt, "{} equ {}", name, value),
            Item::Byte(value) => write!(fmt, "\tdb {}", value),
            Item::Quad(value) => write!(fmt, "\tdq {}", value),
            Item::Reference(symbol) => write!(fmt, "\tdq {}", symbol),
            Item::Bytes(bytes) => {
                fmt.write_str("\tds \"")?;
                for &byte in bytes {
                    match byte {
                        b'\\' => fmt.write_str("\\\\")?,
                        b'"' => fmt.write_str("\\\"")?,
                        b'\n' => fmt.write_str("\\n")?,
                        b' '..=b'~' => write!(fmt, "{}", byte as char)?,
                        _ => write!(fmt, "\\x{:02x}", byte)?,
                    }
                }

                fmt.write_str("\"")
            }
        }
    }
}

/// Codifica texto `flb`.
pub fn encode(text: &str) -> Result<Vec<Item>, EncodeError> {
    let mut encoder = Encoder::default();
    for (index, line) in text.lines().enumerate() {
        encoder.line(index + 1, line.trim())?;
    }

    debug!(
        "Encoded {} items, {} global slots",
        encoder.items.len(),
        encoder.globals.len()
    );

    Ok(encoder.items)
}

#[derive(Default)]
struct Encoder {
    items: Vec<Item>,
    section: Option<String>,
    locals: HashMap<String, u64>,
    globals: HashMap<String, u64>,
}

impl Encoder {
    fn line(&mut self, line: usize, text: &str) -> Result<(), EncodeError> {
        if text.is_empty() {
            return Ok(());
        }

        if let Some(header) = text.strip_prefix("@begin") {
            let name = header.split_whitespace().nth(1);
            self.section = Some(name.ok_or(EncodeError::BadOperand(line))?.to_owned());
            self.locals.clear();
            return Ok(());
        } else if text.starts_with("@end") {
            self.section = None;
            return Ok(());
        }

        let section = self
            .section
            .clone()
            .ok_or(EncodeError::OutsideSection(line))?;

        if let Some(label) = text.strip_suffix(':') {
            // Las etiquetas numéricas son locales a su sección
            let symbol = match label.parse::<u32>() {
                Ok(number) => format!("{}.{}", section, number),
                Err(_) => label.to_owned(),
            };

            self.items.push(Item::Label(symbol));
            return Ok(());
        }

        let (mnemonic, operands) = match text.split_once(char::is_whitespace) {
            Some((mnemonic, operands)) => (mnemonic, operands.trim()),
            None => (text, ""),
        };

        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| {
            EncodeError::UnknownInstruction {
                line,
                mnemonic: mnemonic.to_owned(),
            }
        })?;

        self.items.push(Item::Byte(opcode as u8));

        let bad_operand = || EncodeError::BadOperand(line);
        let mut words = operands.split_whitespace();

        match opcode {
            Opcode::Global | Opcode::Variable => {
                let name = words.next().ok_or_else(bad_operand)?;
                let kind = words.next().and_then(kind_from_name).ok_or_else(bad_operand)?;
                let array = words.next().and_then(|array| array.parse::<bool>().ok());
                let array = array.ok_or_else(bad_operand)?;

                let slot = if opcode == Opcode::Global {
                    self.global_slot(name)
                } else {
                    let next = LOCAL_SLOT_BASE + self.locals.len() as u64;
                    *self.locals.entry(name.to_owned()).or_insert(next)
                };

                self.items.push(Item::Quad(slot as i64));
                self.items.push(Item::Byte(type_tag(kind)));
                self.items.push(Item::Byte(array as u8));
            }

            Opcode::Assign
            | Opcode::AssignIndexed
            | Opcode::Load
            | Opcode::LoadIndexed
            | Opcode::Increase
            | Opcode::Decrease => {
                let name = words.next().ok_or_else(bad_operand)?;
                let item = match self.locals.get(name) {
                    Some(&slot) => Item::Quad(slot as i64),
                    None => Item::Reference(format!("${}", name)),
                };

                self.items.push(item);
            }

            Opcode::Number => {
                let value = words.next().and_then(|value| value.parse::<i64>().ok());
                self.items.push(Item::Quad(value.ok_or_else(bad_operand)?));
            }

            Opcode::String => {
                let bytes = unquote(operands).ok_or_else(bad_operand)?;
                self.items.push(Item::Quad(bytes.len() as i64));

                let mut bytes = bytes;
                bytes.push(0);
                self.items.push(Item::Bytes(bytes));
            }

            Opcode::Goto | Opcode::GotoTrue | Opcode::GotoFalse => {
                let label = words.next().ok_or_else(bad_operand)?;
                self.items.push(Item::Reference(format!("{}.{}", section, label)));
            }

            Opcode::Invoke => {
                let name = words.next().ok_or_else(bad_operand)?;
                self.items.push(Item::Reference(name.to_owned()));
            }

            Opcode::InvokeNative => {
                let name = words.next().ok_or_else(bad_operand)?;
                let index = NATIVES.iter().position(|native| *native == name);
                let index = index.ok_or_else(|| EncodeError::UnknownNative {
                    line,
                    name: name.to_owned(),
                })?;

                self.items.push(Item::Quad(index as i64));
            }

            _ if !operands.is_empty() => return Err(bad_operand()),
            _ => (),
        }

        Ok(())
    }

    /// Asigna slots globales en orden de declaración.
    fn global_slot(&mut self, name: &str) -> u64 {
        if let Some(&slot) = self.globals.get(name) {
            return slot;
        }

        let slot = self.globals.len() as u64;
        self.globals.insert(name.to_owned(), slot);
        self.items.push(Item::Constant(format!("${}", name), slot));

        slot
    }
}

/// Extrae y decodifica el contenido entre la primera y última comilla.
fn unquote(operand: &str) -> Option<Vec<u8>> {
    let start = operand.find('"')?;
    let end = operand.rfind('"')?;
    if end <= start {
        return None;
    }

    let mut bytes = Vec::new();
    let mut chars = operand[start + 1..end].chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => bytes.push(b'\n'),
                Some('\\') => bytes.push(b'\\'),
                Some(other) => {
                    bytes.push(b'\\');
                    push_char(&mut bytes, other);
                }

                None => bytes.push(b'\\'),
            },

            c => push_char(&mut bytes, c),
        }
    }

    Some(bytes)
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buffer = [0; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locals_are_slots_and_globals_are_references() {
        let items = encode(
            "@begin function f
             f:
             \tvariable a int false
             \tload a
             \tload g
             \tgoto 3
             3:
             @end function",
        )
        .unwrap();

        assert_eq!(
            items,
            vec![
                Item::Label("f".into()),
                Item::Byte(Opcode::Variable as u8),
                Item::Quad(LOCAL_SLOT_BASE as i64),
                Item::Byte(1),
                Item::Byte(0),
                Item::Byte(Opcode::Load as u8),
                Item::Quad(LOCAL_SLOT_BASE as i64),
                Item::Byte(Opcode::Load as u8),
                Item::Reference("$g".into()),
                Item::Byte(Opcode::Goto as u8),
                Item::Reference("f.3".into()),
                Item::Label("f.3".into()),
            ]
        );
    }

    #[test]
    fn global_slots_follow_declaration_order() {
        let items = encode(
            "@begin globals __globals
             __globals:
             \tglobal x int false
             \tglobal s str false
             \tstring \"a\\nb\"
             @end globals",
        )
        .unwrap();

        assert!(items.contains(&Item::Constant("$x".into(), 0)));
        assert!(items.contains(&Item::Constant("$s".into(), 1)));
        assert!(items.contains(&Item::Quad(3)));
        assert!(items.contains(&Item::Bytes(vec![b'a', b'\n', b'b', 0])));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(encode("\tnumber 1"), Err(EncodeError::OutsideSection(1)));

        assert_eq!(
            encode("@begin function f\n\tjump 1"),
            Err(EncodeError::UnknownInstruction {
                line: 2,
                mnemonic: "jump".into()
            })
        );

        assert_eq!(
            encode("@begin function f\n\tinvoke_native puts"),
            Err(EncodeError::UnknownNative {
                line: 2,
                name: "puts".into()
            })
        );

        assert_eq!(
            encode("@begin function f\n\tnumber x"),
            Err(EncodeError::BadOperand(2))
        );
    }

    #[test]
    fn flenc_text() {
        assert_eq!(Item::Label("f.1".into()).to_string(), "f.1:");
        assert_eq!(Item::Reference("$g".into()).to_string(), "\tdq $g");
        assert_eq!(Item::Bytes(b"a\"\n\0".to_vec()).to_string(), "\tds \"a\\\"\\n\\x00\"");
    }
}
