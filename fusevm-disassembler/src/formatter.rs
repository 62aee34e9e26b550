//! Instruction formatting to assembly text

use fusevm_spec::{ArgKind, Constant, FuncFamily, Instruction, ReductionAxis};

/// Format instruction as assembly text, e.g. `func_ddn r0, r1, sqrt`
pub fn format_instruction(inst: &Instruction) -> String {
    let mut out = String::from(inst.mnemonic());
    for (i, kind) in inst.info().operands().enumerate() {
        out.push_str(if i == 0 { " " } else { ", " });
        out.push_str(&format_operand(inst, kind, inst.operands[i]));
    }
    out
}

fn format_operand(inst: &Instruction, kind: ArgKind, byte: u8) -> String {
    match kind {
        ArgKind::Reg(_) | ArgKind::None => format_reg(byte),
        ArgKind::Index => {
            if let Some(family) = FuncFamily::of_opcode(inst.opcode) {
                // Out-of-range indices stay numeric so the text reassembles
                family
                    .name_of(byte)
                    .map_or_else(|| byte.to_string(), str::to_string)
            } else if inst.opcode.is_reduction() {
                ReductionAxis::decode(byte).to_string()
            } else {
                byte.to_string()
            }
        }
    }
}

/// Format register operand
pub fn format_reg(reg: u8) -> String {
    format!("r{}", reg)
}

/// Constant literal in assembler syntax
pub fn format_constant(constant: &Constant) -> String {
    match constant {
        Constant::Str(bytes) => quote_bytes(bytes),
        Constant::Complex(re, im) => format!("({:?}, {:?})", re, im),
        other => other.to_string(),
    }
}

/// Double-quoted string with `\\`, `\"` and `\xNN` escapes
pub fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('"');
    out
}
