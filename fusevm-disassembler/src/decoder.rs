//! Instruction decoder

use crate::error::{DisassemblerError, Result};
use fusevm_spec::instruction::decode_at;
use fusevm_spec::{Instruction, Opcode, SpecError, INSTRUCTION_WIDTH};

/// One slot of a program listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Instruction(Instruction),
    /// A `noop` slot that is not the continuation of a double-width
    /// instruction
    Noop { pc: usize },
    /// Undecodable slot; the walk resumes at the next slot
    Invalid { pc: usize, error: String },
}

/// Decode the instruction at byte offset `pc`
pub fn decode(code: &[u8], pc: usize) -> Result<Instruction> {
    decode_at(code, pc).map_err(|e| match e {
        SpecError::InvalidOpcode { pc, opcode } => DisassemblerError::UnknownOpcode { pc, opcode },
        SpecError::Truncated { pc } => DisassemblerError::Truncated { pc },
        other => DisassemblerError::Spec(other),
    })
}

/// Decode every slot, keeping going past invalid ones
pub fn decode_all(code: &[u8]) -> Result<Vec<Decoded>> {
    if code.len() % INSTRUCTION_WIDTH != 0 {
        return Err(DisassemblerError::ProgramLength(code.len()));
    }

    let mut out = Vec::with_capacity(code.len() / INSTRUCTION_WIDTH);
    let mut pc = 0;
    while pc < code.len() {
        if code[pc] == Opcode::Noop.to_u8() {
            out.push(Decoded::Noop { pc });
            pc += INSTRUCTION_WIDTH;
            continue;
        }
        match decode(code, pc) {
            Ok(inst) => {
                pc += inst.width();
                out.push(Decoded::Instruction(inst));
            }
            Err(e) => {
                out.push(Decoded::Invalid {
                    pc,
                    error: e.to_string(),
                });
                pc += INSTRUCTION_WIDTH;
            }
        }
    }
    Ok(out)
}
