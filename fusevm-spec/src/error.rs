//! # Error Types for FuseVM bytecode and kernel containers

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    // Container errors
    #[error("Invalid kernel magic: expected 0x4B4D5646, got {0:#010x}")]
    InvalidMagic(u32),

    #[error("Invalid kernel version: expected {expected:#010x}, found {found:#010x}")]
    InvalidVersion { expected: u32, found: u32 },

    #[error("Invalid header size: expected {expected} bytes, found {found} bytes")]
    InvalidHeaderSize { expected: usize, found: usize },

    #[error("Header declares {field} = {declared}, body has {found}")]
    CountMismatch {
        field: &'static str,
        declared: usize,
        found: usize,
    },

    #[error("Kernel body could not be decoded: {0}")]
    Decode(String),

    #[error("Kernel body could not be encoded: {0}")]
    Encode(String),

    // Program errors
    #[error("Program length {0} is not a multiple of 4")]
    ProgramLength(usize),

    #[error("Invalid opcode {opcode:#04x} at pc {pc}")]
    InvalidOpcode { pc: usize, opcode: u8 },

    #[error("Double-width instruction at pc {pc} runs past the end of the program")]
    Truncated { pc: usize },

    #[error("Unknown type code {ch:?} at position {pos} of signature")]
    InvalidTypeCode { pos: usize, ch: char },

    #[error("Constant of type '{found}' does not fit register of type '{expected}'")]
    ConstantType { expected: char, found: char },

    #[error("{0}")]
    Other(String),
}

impl SpecError {
    /// Program counter the error refers to, when it concerns one instruction
    pub fn pc(&self) -> Option<usize> {
        match self {
            SpecError::InvalidOpcode { pc, .. } | SpecError::Truncated { pc } => Some(*pc),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpecError>;
