//! Static program validation
//!
//! Checks a kernel's bytecode against its register signatures before it is
//! ever run. The runtime still bounds-checks on its own, so a program that
//! skipped this step cannot corrupt memory; it just fails later.
//!
//! Checks, in order:
//! - signature structure (register count, input prefix, constant types)
//! - program length is a multiple of 4 and not empty
//! - per instruction: known opcode, reductions only last, double-width
//!   operands inside the program
//! - per operand: register in range with a matching type (int32 and int64
//!   interchangeable), function index inside its family table
//! - destinations are the output or a temporary

use crate::error::SpecError;
use crate::functions::FuncFamily;
use crate::instruction::decode_at;
use crate::opcode::Opcode;
use crate::program::Kernel;
use crate::register::RegisterLayout;
use crate::types::{ArgKind, TypeCode};
use crate::{INSTRUCTION_WIDTH, MAX_REGISTERS};
use thiserror::Error;

/// Validation error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Program length {0} is not a multiple of 4")]
    ProgramLength(usize),

    #[error("Program has no instructions")]
    EmptyProgram,

    #[error("Signature declares {0} registers (maximum {MAX_REGISTERS})")]
    TooManyRegisters(usize),

    #[error("Unknown type code {ch:?} at position {pos} of signature")]
    InvalidTypeCode { pos: usize, ch: char },

    #[error("Input signature {inputs:?} is not a prefix of full signature {full:?} after the output")]
    SignatureMismatch { full: String, inputs: String },

    #[error("Register counts add up to {counted}, full signature has {declared}")]
    RegisterCounts { declared: usize, counted: usize },

    #[error("Constant {index} has type '{found}', its register is '{expected}'")]
    ConstantType {
        index: usize,
        expected: char,
        found: char,
    },

    #[error("Invalid opcode {opcode:#04x} at pc {pc}")]
    InvalidOpcode { pc: usize, opcode: u8 },

    #[error("Reduction {mnemonic} at pc {pc} is not the final instruction")]
    ReductionNotLast { pc: usize, mnemonic: &'static str },

    #[error("Double-width instruction {mnemonic} at pc {pc} runs past the end of the program")]
    Truncated { pc: usize, mnemonic: &'static str },

    #[error("Register {reg} out of range at pc {pc} (register count {count})")]
    RegisterOutOfRange { pc: usize, reg: u8, count: usize },

    #[error("Function index {index} out of range at pc {pc} ({family} table has {len} entries)")]
    FunctionOutOfRange {
        pc: usize,
        family: FuncFamily,
        index: u8,
        len: usize,
    },

    #[error("Operand {position} of {mnemonic} at pc {pc} has type '{found}', expected '{expected}'")]
    TypeMismatch {
        pc: usize,
        mnemonic: &'static str,
        position: usize,
        expected: char,
        found: char,
    },

    #[error("{mnemonic} at pc {pc} writes to read-only register {reg}")]
    ReadOnlyDestination {
        pc: usize,
        mnemonic: &'static str,
        reg: u8,
    },
}

impl ValidationError {
    /// Failing program counter, for per-instruction errors
    pub fn pc(&self) -> Option<usize> {
        use ValidationError::*;
        match self {
            InvalidOpcode { pc, .. }
            | ReductionNotLast { pc, .. }
            | Truncated { pc, .. }
            | RegisterOutOfRange { pc, .. }
            | FunctionOutOfRange { pc, .. }
            | TypeMismatch { pc, .. }
            | ReadOnlyDestination { pc, .. } => Some(*pc),
            _ => None,
        }
    }
}

/// Validate a kernel
pub fn validate(kernel: &Kernel) -> Result<(), ValidationError> {
    check_signatures(&kernel.full_signature, &kernel.input_signature)?;

    let counted = kernel.layout().len();
    if counted != kernel.full_signature.len() {
        return Err(ValidationError::RegisterCounts {
            declared: kernel.full_signature.len(),
            counted,
        });
    }

    let first_const = kernel.layout().first_constant();
    for (index, constant) in kernel.constants.iter().enumerate() {
        let expected = kernel.full_signature[first_const + index];
        let found = constant.type_code();
        if !found.accepts(expected) {
            return Err(ValidationError::ConstantType {
                index,
                expected: expected.to_char(),
                found: found.to_char(),
            });
        }
    }

    check_program(
        kernel.program.as_bytes(),
        &kernel.full_signature,
        Some(kernel.layout()),
    )
}

/// Validate raw bytecode against signature strings, the way a compiler
/// front end hands them over. Destination writability is only checked by
/// [`validate`], which knows the constant count.
pub fn validate_program(code: &[u8], full_signature: &str, input_signature: &str) -> Result<(), ValidationError> {
    let full = parse(full_signature)?;
    let inputs = parse(input_signature)?;
    check_signatures(&full, &inputs)?;
    check_program(code, &full, None)
}

fn parse(sig: &str) -> Result<Vec<TypeCode>, ValidationError> {
    TypeCode::parse_signature(sig).map_err(|(pos, ch)| ValidationError::InvalidTypeCode { pos, ch })
}

fn sig_string(codes: &[TypeCode]) -> String {
    codes.iter().map(|c| c.to_char()).collect()
}

fn check_signatures(full: &[TypeCode], inputs: &[TypeCode]) -> Result<(), ValidationError> {
    if full.len() > MAX_REGISTERS {
        return Err(ValidationError::TooManyRegisters(full.len()));
    }
    let prefix_ok = full.len() > inputs.len() && full[1..=inputs.len()] == *inputs;
    if !prefix_ok {
        return Err(ValidationError::SignatureMismatch {
            full: sig_string(full),
            inputs: sig_string(inputs),
        });
    }
    Ok(())
}

fn check_program(
    code: &[u8],
    full: &[TypeCode],
    layout: Option<RegisterLayout>,
) -> Result<(), ValidationError> {
    let len = code.len();
    if len % INSTRUCTION_WIDTH != 0 {
        return Err(ValidationError::ProgramLength(len));
    }

    let register_count = full.len();
    let mut pc = 0;
    let mut seen_instruction = false;

    while pc < len {
        let byte = code[pc];
        let opcode = Opcode::from_u8(byte).ok_or(ValidationError::InvalidOpcode { pc, opcode: byte })?;
        if opcode == Opcode::Noop {
            pc += INSTRUCTION_WIDTH;
            continue;
        }
        seen_instruction = true;

        let mnemonic = opcode.mnemonic();
        if opcode.is_reduction() && pc != len - INSTRUCTION_WIDTH {
            return Err(ValidationError::ReductionNotLast { pc, mnemonic });
        }

        let inst = decode_at(code, pc).map_err(|e| match e {
            SpecError::InvalidOpcode { pc, opcode } => ValidationError::InvalidOpcode { pc, opcode },
            _ => ValidationError::Truncated { pc, mnemonic },
        })?;

        let family = FuncFamily::of_opcode(opcode);
        for (position, kind) in inst.info().operands().enumerate() {
            let operand = inst.operands[position];
            match kind {
                ArgKind::Reg(expected) => {
                    let Some(&found) = full.get(operand as usize) else {
                        return Err(ValidationError::RegisterOutOfRange {
                            pc,
                            reg: operand,
                            count: register_count,
                        });
                    };
                    if !found.accepts(expected) {
                        return Err(ValidationError::TypeMismatch {
                            pc,
                            mnemonic,
                            position,
                            expected: expected.to_char(),
                            found: found.to_char(),
                        });
                    }
                }
                ArgKind::Index => {
                    // Reduction axes are decoded by the runtime
                    if let Some(family) = family {
                        if operand as usize >= family.len() {
                            return Err(ValidationError::FunctionOutOfRange {
                                pc,
                                family,
                                index: operand,
                                len: family.len(),
                            });
                        }
                    }
                }
                ArgKind::None => {}
            }
        }

        if let Some(layout) = layout {
            let dest = inst.dest();
            let writable = layout
                .kind(dest as usize)
                .map_or(false, |kind| kind.is_writable());
            if !writable {
                return Err(ValidationError::ReadOnlyDestination {
                    pc,
                    mnemonic,
                    reg: dest,
                });
            }
        }

        pc += inst.width();
    }

    if !seen_instruction {
        return Err(ValidationError::EmptyProgram);
    }
    Ok(())
}
