//! Opcode resolution and byte encoding
//!
//! Operands are checked against the opcode table: register positions take
//! `rN`, the trailing immediate of `func_*` opcodes takes a function name
//! (or a raw index), and the immediate of a reduction takes an axis number
//! or `all`.

use crate::error::{AssemblerError, Result};
use crate::parser::{Operand, ParsedInstruction};
use fusevm_spec::{ArgKind, FuncFamily, Instruction, Opcode, ReductionAxis, MAX_DIMS};

/// Resolve a parsed line into an instruction at byte offset `pc`
pub fn resolve(parsed: &ParsedInstruction, pc: usize) -> Result<Instruction> {
    let line = parsed.line;
    let opcode = Opcode::from_mnemonic(&parsed.mnemonic)
        .filter(|op| *op != Opcode::Noop || parsed.operands.is_empty())
        .ok_or_else(|| AssemblerError::UnknownInstruction {
            line,
            mnemonic: parsed.mnemonic.clone(),
        })?;

    let kinds: Vec<ArgKind> = opcode.info().operands().collect();
    if kinds.len() != parsed.operands.len() {
        return Err(AssemblerError::OperandCount {
            line,
            mnemonic: parsed.mnemonic.clone(),
            expected: kinds.len(),
            found: parsed.operands.len(),
        });
    }

    let mut operands = [0u8; 4];
    for (slot, (kind, operand)) in operands.iter_mut().zip(kinds.iter().zip(&parsed.operands)) {
        *slot = match (kind, operand) {
            (ArgKind::Reg(_), Operand::Register(r)) => *r,
            (ArgKind::Reg(_), other) => {
                return Err(AssemblerError::InvalidRegister {
                    line,
                    register: describe(other),
                })
            }
            (ArgKind::Index, operand) => immediate(parsed, opcode, operand)?,
            (ArgKind::None, _) => 0,
        };
    }
    Ok(Instruction::new(pc, opcode, operands))
}

fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Register(r) => format!("r{}", r),
        Operand::Integer(v) => v.to_string(),
        Operand::Name(n) => n.clone(),
    }
}

fn immediate(parsed: &ParsedInstruction, opcode: Opcode, operand: &Operand) -> Result<u8> {
    let line = parsed.line;
    let bad = |message: String| AssemblerError::InvalidImmediate { line, message };

    if let Some(family) = FuncFamily::of_opcode(opcode) {
        return match operand {
            Operand::Name(name) => family.index_of(name).ok_or_else(|| AssemblerError::UnknownFunction {
                line,
                mnemonic: parsed.mnemonic.clone(),
                name: name.clone(),
            }),
            Operand::Integer(v) => u8::try_from(*v).map_err(|_| bad(format!("function index {} out of range", v))),
            Operand::Register(r) => Err(bad(format!("expected a function name, found r{}", r))),
        };
    }

    match operand {
        Operand::Name(name) if name == "all" => Ok(ReductionAxis::All.encode()),
        Operand::Integer(v) => {
            let max = i64::from(MAX_DIMS);
            // 255 is reserved for `all`
            if *v >= max || *v < max - 254 {
                return Err(bad(format!("axis {} out of range", v)));
            }
            Ok(ReductionAxis::Axis(*v as i32).encode())
        }
        other => Err(bad(format!("expected an axis or 'all', found {}", describe(other)))),
    }
}

/// Encode an instruction to program bytes
pub fn encode(inst: &Instruction) -> Vec<u8> {
    inst.encode()
}
