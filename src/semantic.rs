//! Tablas de símbolos y análisis de alcanzabilidad.
//!
//! Estas estructuras no forman parte del AST; existen únicamente
//! durante la generación de código de cada backend. La tabla global
//! se construye una vez por unidad de compilación y es de solo
//! lectura desde la perspectiva de cada función. Cada función posee
//! su propia tabla de locales, la cual nunca se comparte.

use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

use crate::{
    ast::{Ast, Attributes, Call, Datatype, Function, GlobalDeclaration, NamedDatatype, ENTRY_POINT},
    lex::Identifier,
};

/// Alineamiento del stack frame.
const FRAME_ALIGNMENT: u32 = 16;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Function `{0}` is undefined")]
    UndefinedFunction(Identifier),

    #[error("Function `{callee}` takes {expected} arguments, but {found} were supplied")]
    Arity {
        callee: Identifier,
        expected: usize,
        found: usize,
    },

    #[error("`{0}` is already defined with a different datatype")]
    Redefined(Identifier),

    #[error("Function `{0}` is defined more than once")]
    DuplicateFunction(Identifier),

    #[error("Global array initializers are not supported (`{0}`)")]
    GlobalArrayInit(Identifier),
}

/// Verifica que una declaración global sea representable.
pub fn check_global(global: &GlobalDeclaration) -> Result<(), SemanticError> {
    if global.var.datatype.array && global.init.is_some() {
        return Err(SemanticError::GlobalArrayInit(global.var.name.clone()));
    }

    Ok(())
}

/// Una variable global con su etiqueta de datos.
#[derive(Clone, Debug)]
pub struct GlobalSymbol {
    pub datatype: Datatype,
    pub label: String,
}

/// Tabla de variables globales.
#[derive(Default)]
pub struct GlobalTable {
    symbols: HashMap<Identifier, GlobalSymbol>,
}

impl GlobalTable {
    /// Construye la tabla y asigna a cada global su etiqueta.
    pub fn build(ast: &Ast) -> Result<Self, SemanticError> {
        let mut table = GlobalTable::default();
        for global in ast.globals() {
            check_global(global)?;

            let NamedDatatype { name, datatype } = &global.var;
            let symbol = GlobalSymbol {
                datatype: *datatype,
                label: format!("__global_{}", name),
            };

            if let Some(previous) = table.symbols.insert(name.clone(), symbol) {
                if previous.datatype != *datatype {
                    return Err(SemanticError::Redefined(name.clone()));
                }
            }
        }

        Ok(table)
    }

    pub fn get(&self, name: &Identifier) -> Option<&GlobalSymbol> {
        self.symbols.get(name)
    }
}

/// Ubicación de una local dentro del stack frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub datatype: Datatype,

    /// Desplazamiento del inicio del slot, en bytes.
    pub offset: u32,
}

/// Tabla de locales de una función.
///
/// Los slots se asignan con un contador monótono creciente, alineando
/// cada slot a su propio tamaño. Una redeclaración con el mismo tipo
/// reutiliza el slot existente.
pub struct LocalTable {
    slots: HashMap<Identifier, Slot>,
    next: u32,
}

impl LocalTable {
    /// Crea una tabla cuyos primeros `reserved` bytes ya están ocupados.
    pub fn new(reserved: u32) -> Self {
        LocalTable {
            slots: HashMap::new(),
            next: reserved,
        }
    }

    pub fn declare(&mut self, var: &NamedDatatype) -> Result<Slot, SemanticError> {
        if let Some(slot) = self.slots.get(&var.name) {
            return if slot.datatype == var.datatype {
                Ok(*slot)
            } else {
                Err(SemanticError::Redefined(var.name.clone()))
            };
        }

        let size = var.datatype.size();
        let offset = align(self.next, size);
        self.next = offset + size;

        let slot = Slot {
            datatype: var.datatype,
            offset,
        };

        self.slots.insert(var.name.clone(), slot);
        Ok(slot)
    }

    pub fn get(&self, name: &Identifier) -> Option<Slot> {
        self.slots.get(name).copied()
    }

    /// Tamaño total del frame, con padding de alineamiento.
    pub fn frame_size(&self) -> u32 {
        align(self.next, FRAME_ALIGNMENT)
    }
}

fn align(offset: u32, alignment: u32) -> u32 {
    (offset + alignment - 1) / alignment * alignment
}

/// Tabla de funciones por nombre.
pub struct FunctionTable<'a> {
    functions: HashMap<Identifier, &'a Function>,
}

impl<'a> FunctionTable<'a> {
    pub fn build(ast: &'a Ast) -> Result<Self, SemanticError> {
        let mut functions = HashMap::new();
        for function in ast.functions() {
            if functions.insert(function.name.clone(), function).is_some() {
                return Err(SemanticError::DuplicateFunction(function.name.clone()));
            }
        }

        Ok(FunctionTable { functions })
    }

    pub fn get(&self, name: &str) -> Option<&'a Function> {
        self.functions.get(&Identifier::from(name)).copied()
    }

    /// Resuelve el destino de una llamada y verifica su aridad.
    pub fn resolve(&self, call: &Call) -> Result<&'a Function, SemanticError> {
        let function = self
            .functions
            .get(&call.callee)
            .copied()
            .ok_or_else(|| SemanticError::UndefinedFunction(call.callee.clone()))?;

        let (expected, found) = (function.parameters.len(), call.arguments.len());
        if expected != found {
            return Err(SemanticError::Arity {
                callee: call.callee.clone(),
                expected,
                found,
            });
        }

        Ok(function)
    }
}

/// Grafo de llamadas para eliminación de código muerto.
///
/// Cada función registra los nombres de las funciones que invoca
/// mientras se genera su cuerpo. Las raíces son el punto de entrada
/// y toda función con atributo `keep`.
#[derive(Default)]
pub struct CallGraph {
    uses: HashMap<Identifier, BTreeSet<Identifier>>,
    roots: Vec<Identifier>,
}

impl CallGraph {
    pub fn add(&mut self, function: &Function, callees: BTreeSet<Identifier>) {
        if function.is(Attributes::KEEP) || function.name.as_ref() == ENTRY_POINT {
            self.roots.push(function.name.clone());
        }

        self.uses.insert(function.name.clone(), callees);
    }

    /// Agrega una raíz adicional, exista o no la función.
    pub fn root(&mut self, name: &str) {
        self.roots.push(Identifier::from(name));
    }

    /// Conjunto de funciones alcanzables desde alguna raíz.
    pub fn reachable(&self) -> HashSet<Identifier> {
        let mut visited = HashSet::new();
        for root in &self.roots {
            self.mark(root, &mut visited);
        }

        visited
    }

    fn mark(&self, name: &Identifier, visited: &mut HashSet<Identifier>) {
        // Se marca antes de descender para cortar ciclos
        if !visited.insert(name.clone()) {
            return;
        }

        for callee in self.uses.get(name).into_iter().flatten() {
            self.mark(callee, visited);
        }
    }
}
