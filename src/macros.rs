macro_rules! dispatch_arch {
    ($type:ident: $arch:expr => $expr:expr) => {{
        use crate::arch::{Arch, Riscv64, X86_64};

        match $arch {
            Arch::X86_64 => {
                type $type = X86_64;
                $expr
            }

            Arch::Riscv64 => {
                type $type = Riscv64;
                $expr
            }
        }
    }};
}

macro_rules! emit {
    ($output:expr, $opcode:expr) => {
        writeln!($output, "\t{}", $opcode)
    };

    ($output:expr, $opcode:expr, $($format:tt)*) => {{
        write!($output, "\t{:7} ", $opcode)?;
        writeln!($output, $($format)*)
    }};
}
