//! # FuseVM Specification
//!
//! Bytecode format for fused, block-at-a-time evaluation of numeric array
//! expressions.
//!
//! ## Key Features
//! - 4-byte instructions: opcode byte + up to 3 register operands
//! - Double-width instructions for opcodes with a 4th operand
//! - Typed register file: output, inputs, constants, temporaries
//! - Element types: bool, int32, int64, float32, float64, complex128, string
//! - Six function dispatch families addressed by stable indices
//! - Single trailing reduction (sum, prod, min, max) over one or all axes

pub mod types;
pub mod register;
pub mod opcode;
pub mod functions;
pub mod instruction;
pub mod error;
pub mod program;
pub mod validation;

pub use types::{ArgKind, TypeCode};
pub use register::{RegisterKind, RegisterLayout};
pub use opcode::{Opcode, OpcodeInfo, ReduceOp, OPCODE_TABLE};
pub use functions::FuncFamily;
pub use instruction::Instruction;
pub use error::SpecError;
pub use program::{Constant, Kernel, KernelHeader, Program, ReductionAxis};
pub use validation::{validate, ValidationError};

/// Elements processed per block on the fixed-size fast path
pub const BLOCK_SIZE: usize = 128;

/// Dimension cap used by the reduction-axis wire encoding
pub const MAX_DIMS: u8 = 32;

/// Reduction-axis byte meaning "reduce over all axes"
pub const REDUCE_ALL: u8 = 255;

/// Largest register file a program may declare
pub const MAX_REGISTERS: usize = 255;

/// Width of one instruction slot in bytes
pub const INSTRUCTION_WIDTH: usize = 4;

/// Register index (operand byte)
pub type Reg = u8;
