//! Objetivos de compilación.
//!
//! Un objetivo traduce el AST a su forma textual con [`Target::generate()`]
//! y luego materializa esa forma en alguno de sus modos de salida con
//! [`Target::compile()`]. El modo se elige por la extensión del archivo
//! de salida.

use std::{
    fmt::{self, Display},
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;

use crate::{
    arch::Arch,
    ast::Ast,
    bytecode::{self, EncodeError, LinkError},
    codegen::{self, CodegenError},
    link::{self, LinkOptions, LinkerError},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TargetError {
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Linker(#[from] LinkerError),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Mode `{mode}` is not supported by target `{target}`")]
    UnsupportedMode { target: &'static str, mode: OutputMode },
}

/// Modo de salida.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Texto ensamblador.
    Asm,

    /// Objeto ELF.
    Object,

    /// Ejecutable estático.
    Elf,

    /// Bytecode textual.
    Flb,

    /// Bytecode codificado, antes de enlazar.
    Flenc,

    /// Imagen binaria enlazada.
    Flbb,
}

impl OutputMode {
    const ALL: [OutputMode; 6] = [
        OutputMode::Asm,
        OutputMode::Object,
        OutputMode::Elf,
        OutputMode::Flb,
        OutputMode::Flenc,
        OutputMode::Flbb,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OutputMode::Asm => "asm",
            OutputMode::Object => "o",
            OutputMode::Elf => "elf",
            OutputMode::Flb => "flb",
            OutputMode::Flenc => "flenc",
            OutputMode::Flbb => "flbb",
        }
    }

    /// Modo correspondiente a la extensión de una ruta, sin importar
    /// mayúsculas.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        OutputMode::ALL
            .into_iter()
            .find(|mode| unicase::eq_ascii(mode.name(), extension))
    }
}

impl Display for OutputMode {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

/// Un backend de generación completo.
pub trait Target {
    /// Nombre con el que se selecciona el objetivo.
    fn name(&self) -> &'static str;

    /// Modos de salida aceptados.
    fn modes(&self) -> &'static [OutputMode];

    /// Traduce el AST a la forma textual del objetivo.
    fn generate(&self, ast: &Ast) -> Result<String, TargetError>;

    /// Escribe `text` a `output` en el modo indicado.
    fn compile(&self, mode: OutputMode, output: &Path, text: &str) -> Result<(), TargetError>;

    /// Verifica que el modo sea aceptado.
    fn check_mode(&self, mode: OutputMode) -> Result<(), TargetError> {
        if self.modes().contains(&mode) {
            Ok(())
        } else {
            Err(TargetError::UnsupportedMode {
                target: self.name(),
                mode,
            })
        }
    }
}

/// Selector de objetivo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TargetKind {
    X86_64,
    Riscv64,
    Bytecode,
}

impl TargetKind {
    pub const NAMES: [&'static str; 3] = ["x86_64-linux-nasm", "riscv64-linux-gnu", "bytecode"];

    pub fn name(self) -> &'static str {
        match self {
            TargetKind::X86_64 => Self::NAMES[0],
            TargetKind::Riscv64 => Self::NAMES[1],
            TargetKind::Bytecode => Self::NAMES[2],
        }
    }

    pub fn build(self, options: LinkOptions) -> Box<dyn Target> {
        match self {
            TargetKind::X86_64 => Box::new(Native::new(Arch::X86_64, options)),
            TargetKind::Riscv64 => Box::new(Native::new(Arch::Riscv64, options)),
            TargetKind::Bytecode => Box::new(Bytecode),
        }
    }
}

impl FromStr for TargetKind {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        [TargetKind::X86_64, TargetKind::Riscv64, TargetKind::Bytecode]
            .into_iter()
            .find(|kind| unicase::eq_ascii(kind.name(), string))
            .ok_or(())
    }
}

/// Objetivo de ensamblador nativo.
pub struct Native {
    arch: Arch,
    options: LinkOptions,
}

impl Native {
    pub fn new(arch: Arch, options: LinkOptions) -> Self {
        Native { arch, options }
    }

    fn write_asm(&self, output: &Path, text: &str) -> io::Result<PathBuf> {
        let path = link::sibling(output, self.arch.asm_extension());
        fs::write(&path, text)?;

        Ok(path)
    }
}

impl Target for Native {
    fn name(&self) -> &'static str {
        match self.arch {
            Arch::X86_64 => TargetKind::X86_64.name(),
            Arch::Riscv64 => TargetKind::Riscv64.name(),
        }
    }

    fn modes(&self) -> &'static [OutputMode] {
        &[OutputMode::Asm, OutputMode::Object, OutputMode::Elf]
    }

    fn generate(&self, ast: &Ast) -> Result<String, TargetError> {
        let asm = codegen::generate(ast, self.arch)?;
        Ok(String::from_utf8_lossy(&asm).into_owned())
    }

    fn compile(&self, mode: OutputMode, output: &Path, text: &str) -> Result<(), TargetError> {
        self.check_mode(mode)?;

        match mode {
            OutputMode::Asm => fs::write(output, text)?,

            OutputMode::Object => {
                let asm = self.write_asm(output, text)?;
                link::assemble(self.arch, &asm, output)?;
            }

            _ => {
                let asm = self.write_asm(output, text)?;
                let object = link::sibling(output, "o");

                link::assemble(self.arch, &asm, &object)?;
                link::link(self.arch, &object, output, self.options)?;
            }
        }

        Ok(())
    }
}

/// Objetivo de bytecode para la máquina virtual.
pub struct Bytecode;

impl Target for Bytecode {
    fn name(&self) -> &'static str {
        TargetKind::Bytecode.name()
    }

    fn modes(&self) -> &'static [OutputMode] {
        &[OutputMode::Flb, OutputMode::Flenc, OutputMode::Flbb]
    }

    fn generate(&self, ast: &Ast) -> Result<String, TargetError> {
        let flb = bytecode::generate(ast)?;
        Ok(String::from_utf8_lossy(&flb).into_owned())
    }

    fn compile(&self, mode: OutputMode, output: &Path, text: &str) -> Result<(), TargetError> {
        self.check_mode(mode)?;

        if mode == OutputMode::Flb {
            fs::write(output, text)?;
            return Ok(());
        }

        let items = bytecode::encode(text)?;
        let mut file = BufWriter::new(File::create(output)?);

        if mode == OutputMode::Flenc {
            for item in &items {
                writeln!(file, "{}", item)?;
            }
        } else {
            bytecode::link(&items, &mut file)?;
        }

        file.flush()?;
        Ok(())
    }
}
