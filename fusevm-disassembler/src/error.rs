//! Disassembler errors

use fusevm_spec::SpecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisassemblerError {
    #[error("Program length {0} is not a multiple of 4")]
    ProgramLength(usize),

    #[error("Unknown opcode 0x{opcode:02X} at pc {pc}")]
    UnknownOpcode { pc: usize, opcode: u8 },

    #[error("Instruction at pc {pc} runs past the end of the program")]
    Truncated { pc: usize },

    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),
}

pub type Result<T> = std::result::Result<T, DisassemblerError>;
