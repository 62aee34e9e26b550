//! Runtime error types for FuseVM

use fusevm_spec::{SpecError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Register operand out of bounds at pc {pc}")]
    BadArgument { pc: usize },

    #[error("Invalid opcode at pc {pc}")]
    BadOpcode { pc: usize },

    #[error("Allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Input mismatch: {0}")]
    InputMismatch(String),

    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// Status code reported for this error
    pub fn status(&self) -> ExitStatus {
        match self {
            RuntimeError::BadArgument { pc } => ExitStatus::BadArgument(*pc),
            RuntimeError::BadOpcode { pc } => ExitStatus::BadOpcode(*pc),
            _ => ExitStatus::RuntimeFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Outcome of one evaluation, as reported across the VM boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Success,
    RuntimeFailure,
    /// Register operand out of range at the given pc
    BadArgument(usize),
    /// Unknown opcode at the given pc
    BadOpcode(usize),
}

impl ExitStatus {
    /// Integer code: 0, -1, -2, -3
    pub const fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::RuntimeFailure => -1,
            ExitStatus::BadArgument(_) => -2,
            ExitStatus::BadOpcode(_) => -3,
        }
    }

    pub const fn pc(self) -> Option<usize> {
        match self {
            ExitStatus::BadArgument(pc) | ExitStatus::BadOpcode(pc) => Some(pc),
            _ => None,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

impl<T> From<&Result<T>> for ExitStatus {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ExitStatus::Success,
            Err(e) => e.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_argument_display() {
        let err = RuntimeError::BadArgument { pc: 12 };
        assert_eq!(err.to_string(), "Register operand out of bounds at pc 12");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::RuntimeFailure.code(), -1);
        assert_eq!(ExitStatus::BadArgument(4).code(), -2);
        assert_eq!(ExitStatus::BadOpcode(8).code(), -3);
        assert_eq!(ExitStatus::BadOpcode(8).pc(), Some(8));
        assert_eq!(ExitStatus::RuntimeFailure.pc(), None);
    }

    #[test]
    fn test_status_from_result() {
        let ok: Result<()> = Ok(());
        assert!(ExitStatus::from(&ok).is_success());

        let err: Result<()> = Err(RuntimeError::BadOpcode { pc: 4 });
        assert_eq!(ExitStatus::from(&err), ExitStatus::BadOpcode(4));

        let err: Result<()> = Err(RuntimeError::Allocation { bytes: 1 << 40 });
        assert_eq!(ExitStatus::from(&err), ExitStatus::RuntimeFailure);
    }

    #[test]
    fn test_validation_error_from() {
        let err: RuntimeError = ValidationError::ProgramLength(5).into();
        assert!(err.to_string().contains("not a multiple of 4"));
        assert_eq!(err.status(), ExitStatus::RuntimeFailure);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RuntimeError>();
    }
}
