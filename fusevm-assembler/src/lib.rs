//! FuseVM Assembler
//!
//! Assemble FuseVM assembly language into bytecode programs and kernels.
//!
//! ## Example
//!
//! ```rust
//! use fusevm_assembler::assemble_kernel;
//!
//! let source = r#"
//!     .output d
//!     .inputs d
//!     .temps d
//!     mul_ddd r2, r1, r1
//!     func_ddn r0, r2, sqrt
//! "#;
//!
//! let kernel = assemble_kernel(source).unwrap();
//! assert_eq!(kernel.n_inputs(), 1);
//! ```

pub mod error;
pub mod lexer;
pub mod parser;
pub mod encoder;
pub mod assembler;

pub use error::{AssemblerError, Result};
pub use assembler::{assemble, assemble_kernel};
pub use parser::{parse_instruction, parse_register};
pub use encoder::{encode, resolve};
