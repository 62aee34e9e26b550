//! FuseVM instruction format
//!
//! ```text
//! single width:  [opcode][a0][a1][a2]
//! double width:  [opcode][a0][a1][a2] [noop][a3][--][--]
//! ```
//!
//! `a0` is the destination register. Opcodes whose signature has a fourth
//! operand borrow the following slot; its opcode byte is `noop` so a plain
//! slot-by-slot walk never mistakes it for an instruction, and its second
//! byte (offset +5) carries the operand.

use crate::error::{Result, SpecError};
use crate::functions::FuncFamily;
use crate::opcode::{Opcode, OpcodeInfo};
use crate::INSTRUCTION_WIDTH;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Byte offset of the opcode within the program
    pub pc: usize,
    pub opcode: Opcode,
    /// Operand bytes in encoding order, unused positions are 0
    pub operands: [u8; 4],
}

impl Instruction {
    pub fn new(pc: usize, opcode: Opcode, operands: [u8; 4]) -> Self {
        Self {
            pc,
            opcode,
            operands,
        }
    }

    #[inline]
    pub fn info(&self) -> &'static OpcodeInfo {
        self.opcode.info()
    }

    #[inline]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }

    /// Bytes occupied in the program (4 or 8)
    #[inline]
    pub fn width(&self) -> usize {
        if self.info().is_double_width() {
            2 * INSTRUCTION_WIDTH
        } else {
            INSTRUCTION_WIDTH
        }
    }

    /// Operand bytes actually used by this opcode
    pub fn used_operands(&self) -> &[u8] {
        &self.operands[..self.info().operand_count()]
    }

    /// Destination register
    #[inline]
    pub fn dest(&self) -> u8 {
        self.operands[0]
    }

    /// Source register operands (excludes a trailing function index or axis)
    pub fn sources(&self) -> &[u8] {
        let used = self.info().operand_count();
        let end = if self.immediate().is_some() { used - 1 } else { used };
        &self.operands[1..end.max(1)]
    }

    /// Trailing untyped immediate: function index or reduction axis
    pub fn immediate(&self) -> Option<u8> {
        let info = self.info();
        let count = info.operand_count();
        match info.operands().last() {
            Some(crate::ArgKind::Index) => Some(self.operands[count - 1]),
            _ => None,
        }
    }

    /// Function family and index for `func_*` opcodes
    pub fn function(&self) -> Option<(FuncFamily, u8)> {
        let family = FuncFamily::of_opcode(self.opcode)?;
        self.immediate().map(|idx| (family, idx))
    }

    /// Encode back to program bytes
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        encode_into(self.opcode, self.used_operands(), out);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width());
        self.encode_into(&mut out);
        out
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        for (i, op) in self.used_operands().iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, op)?;
        }
        Ok(())
    }
}

/// Append the encoding of `opcode` with `operands` (destination first).
/// Missing operands are zero filled; four-operand opcodes get their
/// continuation slot.
pub fn encode_into(opcode: Opcode, operands: &[u8], out: &mut Vec<u8>) {
    let at = |i: usize| operands.get(i).copied().unwrap_or(0);
    out.extend_from_slice(&[opcode.to_u8(), at(0), at(1), at(2)]);
    if opcode.info().is_double_width() {
        out.extend_from_slice(&[Opcode::Noop.to_u8(), at(3), 0, 0]);
    }
}

/// Decode the instruction starting at byte offset `pc`
pub fn decode_at(code: &[u8], pc: usize) -> Result<Instruction> {
    let slot = code
        .get(pc..pc + INSTRUCTION_WIDTH)
        .ok_or(SpecError::Truncated { pc })?;
    let opcode = Opcode::from_u8(slot[0]).ok_or(SpecError::InvalidOpcode {
        pc,
        opcode: slot[0],
    })?;

    let mut operands = [slot[1], slot[2], slot[3], 0];
    if opcode.info().is_double_width() {
        if pc + 2 * INSTRUCTION_WIDTH > code.len() {
            return Err(SpecError::Truncated { pc });
        }
        operands[3] = code[pc + INSTRUCTION_WIDTH + 1];
    }
    Ok(Instruction::new(pc, opcode, operands))
}

/// Iterator over the instructions of a program, skipping `noop` slots
pub struct Instructions<'a> {
    code: &'a [u8],
    pc: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            pc: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed && self.pc < self.code.len() {
            if self.code[self.pc] == Opcode::Noop.to_u8() {
                self.pc += INSTRUCTION_WIDTH;
                continue;
            }
            return match decode_at(self.code, self.pc) {
                Ok(inst) => {
                    self.pc += inst.width();
                    Some(Ok(inst))
                }
                Err(e) => {
                    self.failed = true;
                    Some(Err(e))
                }
            };
        }
        None
    }
}

/// Decode a whole program, skipping `noop` slots
pub fn decode_program(code: &[u8]) -> Result<Vec<Instruction>> {
    if code.len() % INSTRUCTION_WIDTH != 0 {
        return Err(SpecError::ProgramLength(code.len()));
    }
    Instructions::new(code).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_width() {
        let code = [Opcode::AddDDD.to_u8(), 0, 1, 2];
        let inst = decode_at(&code, 0).unwrap();
        assert_eq!(inst.opcode, Opcode::AddDDD);
        assert_eq!(inst.dest(), 0);
        assert_eq!(inst.sources(), &[1, 2]);
        assert_eq!(inst.immediate(), None);
        assert_eq!(inst.width(), 4);
    }

    #[test]
    fn test_decode_double_width() {
        let mut code = Vec::new();
        encode_into(Opcode::WhereDBDD, &[0, 1, 2, 3], &mut code);
        assert_eq!(code, vec![Opcode::WhereDBDD.to_u8(), 0, 1, 2, 0, 3, 0, 0]);

        let inst = decode_at(&code, 0).unwrap();
        assert_eq!(inst.sources(), &[1, 2, 3]);
        assert_eq!(inst.width(), 8);
    }

    #[test]
    fn test_function_operand() {
        let mut code = Vec::new();
        encode_into(Opcode::FuncDDDN, &[0, 1, 2, 1], &mut code);
        let inst = decode_at(&code, 0).unwrap();
        assert_eq!(inst.sources(), &[1, 2]);
        assert_eq!(inst.function(), Some((FuncFamily::DDD, 1)));

        let code = [Opcode::FuncFFN.to_u8(), 0, 1, 5];
        let inst = decode_at(&code, 0).unwrap();
        assert_eq!(inst.sources(), &[1]);
        assert_eq!(inst.function(), Some((FuncFamily::FF, 5)));
    }

    #[test]
    fn test_reduction_axis_operand() {
        let code = [Opcode::SumDDN.to_u8(), 0, 1, 255];
        let inst = decode_at(&code, 0).unwrap();
        assert_eq!(inst.sources(), &[1]);
        assert_eq!(inst.immediate(), Some(255));
    }

    #[test]
    fn test_truncated_double_width() {
        let code = [Opcode::WhereDBDD.to_u8(), 0, 1, 2];
        assert!(matches!(decode_at(&code, 0), Err(SpecError::Truncated { pc: 0 })));
    }

    #[test]
    fn test_decode_program_skips_noops() {
        let mut code = vec![0, 0, 0, 0];
        encode_into(Opcode::WhereDBDD, &[0, 1, 2, 3], &mut code);
        encode_into(Opcode::NegDD, &[0, 0], &mut code);
        let insts = decode_program(&code).unwrap();
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].pc, 4);
        assert_eq!(insts[1].pc, 12);
    }

    #[test]
    fn test_decode_program_rejects_bad_length() {
        assert!(matches!(decode_program(&[1, 0, 0]), Err(SpecError::ProgramLength(3))));
    }

    #[test]
    fn test_invalid_opcode() {
        let code = [200, 0, 0, 0];
        assert!(matches!(
            decode_at(&code, 0),
            Err(SpecError::InvalidOpcode { pc: 0, opcode: 200 })
        ));
    }

    #[test]
    fn test_encode_roundtrip_display() {
        let inst = Instruction::new(0, Opcode::MulDDD, [3, 1, 2, 0]);
        assert_eq!(inst.to_string(), "mul_ddd 3, 1, 2");
        assert_eq!(inst.encode(), vec![Opcode::MulDDD.to_u8(), 3, 1, 2]);
    }
}
