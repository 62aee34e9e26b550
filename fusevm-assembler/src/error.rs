//! Assembler errors

use fusevm_spec::SpecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error("Syntax error at line {line}, column {column}: {message}")]
    SyntaxError {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Unknown instruction at line {line}: {mnemonic}")]
    UnknownInstruction { line: usize, mnemonic: String },

    #[error("Invalid register at line {line}: {register}")]
    InvalidRegister { line: usize, register: String },

    #[error("Invalid immediate value at line {line}: {message}")]
    InvalidImmediate { line: usize, message: String },

    #[error("Unknown function '{name}' for {mnemonic} at line {line}")]
    UnknownFunction {
        line: usize,
        mnemonic: String,
        name: String,
    },

    #[error("{mnemonic} at line {line} takes {expected} operands, found {found}")]
    OperandCount {
        line: usize,
        mnemonic: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid directive at line {line}: {message}")]
    InvalidDirective { line: usize, message: String },

    #[error("Missing directive: .{0}")]
    MissingDirective(&'static str),

    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),
}

impl AssemblerError {
    /// Source line the error refers to, when there is one
    pub fn line(&self) -> Option<usize> {
        match self {
            AssemblerError::SyntaxError { line, .. }
            | AssemblerError::UnknownInstruction { line, .. }
            | AssemblerError::InvalidRegister { line, .. }
            | AssemblerError::InvalidImmediate { line, .. }
            | AssemblerError::UnknownFunction { line, .. }
            | AssemblerError::OperandCount { line, .. }
            | AssemblerError::InvalidDirective { line, .. } => Some(*line),
            AssemblerError::MissingDirective(_) | AssemblerError::Spec(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssemblerError>;
