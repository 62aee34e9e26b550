//! Main disassembler logic

use crate::decoder::{decode_all, Decoded};
use crate::error::Result;
use crate::formatter::{format_constant, format_instruction};
use fusevm_spec::{Kernel, Program, TypeCode, INSTRUCTION_WIDTH};
use std::fmt::Write;

/// Disassemble a program into an annotated listing
pub fn disassemble(program: &Program) -> Result<String> {
    let code = program.as_bytes();
    let slots = decode_all(code)?;

    let mut output = String::new();
    output.push_str("# FuseVM Disassembly\n");
    let _ = writeln!(
        output,
        "# Code size: {} bytes ({} slots)",
        code.len(),
        code.len() / INSTRUCTION_WIDTH
    );
    output.push('\n');

    for slot in &slots {
        let (pc, text) = match slot {
            Decoded::Instruction(inst) => (inst.pc, format_instruction(inst)),
            Decoded::Noop { pc } => (*pc, "noop".to_string()),
            Decoded::Invalid { pc, error } => (*pc, format!("# ERROR: {}", error)),
        };
        let bytes = &code[pc..pc + INSTRUCTION_WIDTH];
        let _ = writeln!(
            output,
            "{:04x}:  {:02x} {:02x} {:02x} {:02x}  {}",
            pc, bytes[0], bytes[1], bytes[2], bytes[3], text
        );
    }

    Ok(output)
}

fn type_list(codes: &[TypeCode]) -> String {
    codes.iter().map(|c| c.to_char()).collect()
}

/// Disassemble a kernel into source the assembler accepts: register
/// directives followed by the instructions
pub fn disassemble_kernel(kernel: &Kernel) -> Result<String> {
    let slots = decode_all(kernel.program.as_bytes())?;
    let first_const = 1 + kernel.n_inputs();
    let first_temp = first_const + kernel.n_constants();

    let mut output = String::new();
    if let Some(out) = kernel.output_type() {
        let _ = writeln!(output, ".output {}", out);
    }
    if !kernel.input_signature.is_empty() {
        let _ = writeln!(output, ".inputs {}", type_list(&kernel.input_signature));
    }
    for (constant, code) in kernel
        .constants
        .iter()
        .zip(kernel.full_signature.get(first_const..).unwrap_or_default())
    {
        let _ = writeln!(output, ".const {} {}", code, format_constant(constant));
    }
    if let Some(temps) = kernel.full_signature.get(first_temp..) {
        if !temps.is_empty() {
            let _ = writeln!(output, ".temps {}", type_list(temps));
        }
    }
    output.push('\n');

    for slot in &slots {
        match slot {
            Decoded::Instruction(inst) => {
                let _ = writeln!(output, "    {}", format_instruction(inst));
            }
            Decoded::Noop { .. } => output.push_str("    noop\n"),
            Decoded::Invalid { pc, error } => {
                let _ = writeln!(output, "    # ERROR at {:04x}: {}", pc, error);
            }
        }
    }
    Ok(output)
}
