use bit_set::BitSet;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Capacidad por omisión del heap, en celdas.
pub const DEFAULT_CAPACITY: usize = 1024;

#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Out of memory, no free run of {0} cells")]
    OutOfMemory(i64),

    #[error("Invalid pointer {0}")]
    InvalidPointer(i64),

    #[error("Heap access out of range at cell {0}")]
    OutOfRange(i64),
}

/// Bloque reservado del heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub ptr: i64,
    pub len: usize,
}

/// Heap simulado de capacidad fija.
///
/// Cada celda contiene una palabra de 64 bits y los punteros son
/// índices de celda. La ocupación se lleva en un bitmap; la búsqueda de
/// espacio libre es first fit. Las cadenas se internan: un mismo
/// contenido siempre resulta en el mismo puntero y nunca se libera.
pub struct Memory {
    cells: Vec<i64>,
    used: BitSet,
    allocations: Vec<Allocation>,
    strings: HashMap<String, i64>,
    interned: HashSet<i64>,
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new(DEFAULT_CAPACITY)
    }
}

impl Memory {
    pub fn new(capacity: usize) -> Self {
        Memory {
            cells: vec![0; capacity],
            used: BitSet::with_capacity(capacity),
            allocations: Vec::new(),
            strings: HashMap::new(),
            interned: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Cantidad de celdas ocupadas.
    pub fn used(&self) -> usize {
        self.used.len()
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// Reserva `len` celdas con primer ajuste.
    ///
    /// Una reserva vacía ocupa igualmente una celda, de modo que cada
    /// puntero vivo es único.
    pub fn allocate(&mut self, len: i64) -> Result<i64, MemoryError> {
        let size = usize::try_from(len).map_err(|_| MemoryError::OutOfMemory(len))?.max(1);
        if size > self.capacity() {
            return Err(MemoryError::OutOfMemory(len));
        }

        let start = (0..=self.capacity() - size)
            .find(|&start| (start..start + size).all(|cell| !self.used.contains(cell)))
            .ok_or(MemoryError::OutOfMemory(len))?;

        for cell in start..start + size {
            self.used.insert(cell);
        }

        let ptr = start as i64;
        self.allocations.push(Allocation { ptr, len: size });

        Ok(ptr)
    }

    /// Libera una reserva, `ptr` debe ser su inicio exacto.
    pub fn deallocate(&mut self, ptr: i64) -> Result<(), MemoryError> {
        if self.interned.contains(&ptr) {
            return Err(MemoryError::InvalidPointer(ptr));
        }

        let index = self
            .allocations
            .iter()
            .position(|allocation| allocation.ptr == ptr)
            .ok_or(MemoryError::InvalidPointer(ptr))?;

        let Allocation { ptr, len } = self.allocations.remove(index);
        for cell in ptr as usize..ptr as usize + len {
            self.used.remove(cell);
        }

        Ok(())
    }

    pub fn read(&self, ptr: i64, index: i64) -> Result<i64, MemoryError> {
        let cell = self.cell(ptr, index)?;
        Ok(self.cells[cell])
    }

    pub fn write(&mut self, ptr: i64, index: i64, value: i64) -> Result<(), MemoryError> {
        let cell = self.cell(ptr, index)?;
        self.cells[cell] = value;
        Ok(())
    }

    /// Sin verificación de reservas, solo de los límites del heap.
    fn cell(&self, ptr: i64, index: i64) -> Result<usize, MemoryError> {
        let address = ptr.wrapping_add(index);
        usize::try_from(address)
            .ok()
            .filter(|&cell| cell < self.capacity())
            .ok_or(MemoryError::OutOfRange(address))
    }

    /// Interna una cadena terminada en NUL, una celda por byte.
    pub fn intern(&mut self, string: &str) -> Result<i64, MemoryError> {
        if let Some(&ptr) = self.strings.get(string) {
            return Ok(ptr);
        }

        let bytes = string.as_bytes();
        let ptr = self.allocate(bytes.len() as i64 + 1)?;

        for (index, &byte) in bytes.iter().enumerate() {
            self.write(ptr, index as i64, byte as i64)?;
        }

        self.write(ptr, bytes.len() as i64, 0)?;
        self.strings.insert(string.to_owned(), ptr);
        self.interned.insert(ptr);

        Ok(ptr)
    }

    /// Reservas pendientes que no son cadenas internadas.
    pub fn leaks(&self) -> Vec<Allocation> {
        self.allocations
            .iter()
            .filter(|allocation| !self.interned.contains(&allocation.ptr))
            .copied()
            .collect()
    }
}
