//! Construcción de objetos y ejecutables.
//!
//! Una vez que se ha emitido código ensamblador, este debe ser
//! ensamblado y posiblemente enlazado para producir un binario
//! ejecutable. Ambas operaciones se delegan a la toolchain externa
//! de cada arquitectura.

use log::info;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};

use crate::arch::Arch;
use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Opciones a aplicar durante el enlazado.
    pub struct LinkOptions: u32 {
        /// Remover símbolos de depuración del ejecutable final.
        const STRIP = 0x01;
    }
}

/// Un error de ensamblado o enlazado.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LinkerError {
    /// Ocurrió un evento de error de E/S durante la invocación
    /// de comandos externos.
    #[error("I/O error while running `{0}`")]
    Io(&'static str, #[source] std::io::Error),

    /// La herramienta inició su ejecución, pero falló.
    #[error("`{0}` exited with status code {1:?}")]
    Failed(&'static str, ExitStatus),
}

/// Información acerca de la toolchain requerida para cada arquitectura.
struct Parameters {
    /// Comando de ensamblado.
    assembler: &'static str,

    /// Argumentos adicionales al ensamblador.
    assembler_args: &'static [&'static str],

    /// Comando de enlazado.
    linker: &'static str,
}

impl Arch {
    fn toolchain(self) -> Parameters {
        match self {
            Arch::X86_64 => Parameters {
                assembler: "nasm",
                assembler_args: &["-felf64"],
                linker: "gcc",
            },

            Arch::Riscv64 => Parameters {
                assembler: "riscv64-linux-gnu-as",
                assembler_args: &[],
                linker: "riscv64-linux-gnu-gcc",
            },
        }
    }
}

/// Ensambla `input` a un objeto ELF en `output`, con información de depuración.
pub fn assemble(arch: Arch, input: &Path, output: &Path) -> Result<(), LinkerError> {
    let params = arch.toolchain();

    let mut command = Command::new(params.assembler);
    command
        .arg(input)
        .args(params.assembler_args)
        .arg("-o")
        .arg(output)
        .arg("-g");

    run(params.assembler, &mut command)
}

/// Enlaza un objeto a un ejecutable estático.
///
/// El objeto debe exportar `main`; el runtime de C provee `_start`.
pub fn link(arch: Arch, object: &Path, output: &Path, opts: LinkOptions) -> Result<(), LinkerError> {
    let params = arch.toolchain();

    let mut command = Command::new(params.linker);
    command
        .arg(object)
        .arg("-o")
        .arg(output)
        .args(&["--static", "-fno-pie", "-g"]);

    if opts.contains(LinkOptions::STRIP) {
        command.arg("-s");
    }

    run(params.linker, &mut command)
}

/// Ruta hermana de `path` con un sufijo adicional, `a.out` => `a.out.o`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);

    PathBuf::from(name)
}

fn run(tool: &'static str, command: &mut Command) -> Result<(), LinkerError> {
    info!("cmd: {:?}", command);

    let status = command.status().map_err(|error| LinkerError::Io(tool, error))?;
    if status.success() {
        Ok(())
    } else {
        Err(LinkerError::Failed(tool, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_paths_keep_the_full_name() {
        assert_eq!(sibling(Path::new("out/prog"), "asm"), Path::new("out/prog.asm"));
        assert_eq!(sibling(Path::new("prog.elf"), "o"), Path::new("prog.elf.o"));
    }

    #[test]
    fn missing_tools_are_io_errors() {
        let mut command = Command::new("flc-test-no-such-tool");
        assert!(matches!(
            run("flc-test-no-such-tool", &mut command),
            Err(LinkerError::Io("flc-test-no-such-tool", _))
        ));
    }
}
