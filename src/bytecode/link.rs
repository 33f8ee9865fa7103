use byteorder::{WriteBytesExt, LE};
use log::debug;
use std::{
    collections::HashMap,
    io::{self, Seek, SeekFrom, Write},
};

use thiserror::Error;

use super::{Item, GLOBALS_SECTION};
use crate::ast::{ENTRY_POINT, UNREACHABLE};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Unresolved symbol `{0}`")]
    Unresolved(String),

    #[error("Symbol `{0}` is defined more than once")]
    Duplicate(String),
}

/// Enlaza una imagen `flbb`.
///
/// Los ítems se escriben en orden detrás del encabezado. Cada
/// referencia deja un espacio de 8 bytes que se sobrescribe una vez
/// que todos los símbolos son conocidos, por lo cual la salida debe
/// permitir `seek`. Los desplazamientos son relativos al inicio de la
/// imagen, que se asume en la posición actual de `output`.
pub fn link<W: Write + Seek>(items: &[Item], output: &mut W) -> Result<(), LinkError> {
    let base = output.stream_position()?;

    let mut symbols = HashMap::new();
    let mut relocations = Vec::new();
    let mut position = 0;

    let header = [ENTRY_POINT, GLOBALS_SECTION, UNREACHABLE];
    for symbol in header {
        relocations.push((position, symbol.to_owned()));
        output.write_u64::<LE>(0)?;
        position += 8;
    }

    for item in items {
        match item {
            Item::Label(name) => define(&mut symbols, name, position)?,
            Item::Constant(name, value) => define(&mut symbols, name, *value)?,
            Item::Byte(value) => output.write_u8(*value)?,
            Item::Quad(value) => output.write_i64::<LE>(*value)?,
            Item::Bytes(bytes) => output.write_all(bytes)?,
            Item::Reference(symbol) => {
                relocations.push((position, symbol.clone()));
                output.write_u64::<LE>(0)?;
            }
        }

        position += item.size();
    }

    for (offset, symbol) in &relocations {
        let value = symbols
            .get(symbol.as_str())
            .copied()
            .ok_or_else(|| LinkError::Unresolved(symbol.clone()))?;

        output.seek(SeekFrom::Start(base + offset))?;
        output.write_u64::<LE>(value)?;
    }

    output.seek(SeekFrom::Start(base + position))?;

    debug!(
        "Linked {} bytes, {} symbols, {} relocations",
        position,
        symbols.len(),
        relocations.len()
    );

    Ok(())
}

fn define<'a>(
    symbols: &mut HashMap<&'a str, u64>,
    name: &'a str,
    value: u64,
) -> Result<(), LinkError> {
    match symbols.insert(name, value) {
        Some(_) => Err(LinkError::Duplicate(name.to_owned())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Opcode, HEADER_SIZE};
    use byteorder::{ReadBytesExt, LE};
    use std::io::Cursor;

    fn minimal() -> Vec<Item> {
        vec![
            Item::Label("__globals".into()),
            Item::Byte(Opcode::Return as u8),
            Item::Label("spark".into()),
            Item::Byte(Opcode::Invoke as u8),
            Item::Reference("unreachable".into()),
            Item::Label("unreachable".into()),
            Item::Byte(Opcode::Load as u8),
            Item::Reference("$x".into()),
            Item::Constant("$x".into(), 7),
        ]
    }

    #[test]
    fn header_and_relocations_are_patched() {
        let mut image = Cursor::new(Vec::new());
        link(&minimal(), &mut image).unwrap();

        let bytes = image.into_inner();
        let mut reader = Cursor::new(&bytes);

        let spark = reader.read_u64::<LE>().unwrap();
        let globals = reader.read_u64::<LE>().unwrap();
        let unreachable = reader.read_u64::<LE>().unwrap();

        assert_eq!(globals, HEADER_SIZE);
        assert_eq!(spark, HEADER_SIZE + 1);
        assert_eq!(unreachable, HEADER_SIZE + 1 + 9);
        assert_eq!(bytes[spark as usize], Opcode::Invoke as u8);

        // Operando de invoke
        let mut operand = Cursor::new(&bytes[spark as usize + 1..]);
        assert_eq!(operand.read_u64::<LE>().unwrap(), unreachable);

        // Valor constante del slot global
        let mut slot = Cursor::new(&bytes[unreachable as usize + 1..]);
        assert_eq!(slot.read_u64::<LE>().unwrap(), 7);
        assert_eq!(bytes.len() as u64, unreachable + 9);
    }

    #[test]
    fn unresolved_symbols_fail() {
        let mut items = minimal();
        items.push(Item::Reference("nowhere".into()));

        let result = link(&items, &mut Cursor::new(Vec::new()));
        assert!(matches!(result, Err(LinkError::Unresolved(symbol)) if symbol == "nowhere"));
    }

    #[test]
    fn duplicate_symbols_fail() {
        let mut items = minimal();
        items.push(Item::Label("spark".into()));

        let result = link(&items, &mut Cursor::new(Vec::new()));
        assert!(matches!(result, Err(LinkError::Duplicate(_))));
    }
}
