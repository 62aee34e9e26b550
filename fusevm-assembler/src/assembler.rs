//! Main assembler logic

use crate::encoder::resolve;
use crate::error::{AssemblerError, Result};
use crate::parser::{parse, Directive, Statement};
use fusevm_spec::{Constant, Kernel, Program, TypeCode};

fn encode_instructions(statements: &[Statement]) -> Result<Vec<u8>> {
    let mut code = Vec::new();
    for statement in statements {
        if let Statement::Instruction(parsed) = statement {
            let inst = resolve(parsed, code.len())?;
            inst.encode_into(&mut code);
        }
    }
    Ok(code)
}

/// Assemble source code into a program. Directives are accepted and
/// ignored.
pub fn assemble(source: &str) -> Result<Program> {
    let statements = parse(source)?;
    Ok(Program::new(encode_instructions(&statements)?))
}

/// Assemble source code with register directives into a kernel
pub fn assemble_kernel(source: &str) -> Result<Kernel> {
    let statements = parse(source)?;

    let mut output: Option<TypeCode> = None;
    let mut inputs: Vec<TypeCode> = Vec::new();
    let mut constants: Vec<(TypeCode, Constant)> = Vec::new();
    let mut temps: Vec<TypeCode> = Vec::new();

    for statement in &statements {
        let Statement::Directive { line, directive } = statement else {
            continue;
        };
        match directive {
            Directive::Output(code) => {
                if output.replace(*code).is_some() {
                    return Err(AssemblerError::InvalidDirective {
                        line: *line,
                        message: ".output given twice".to_string(),
                    });
                }
            }
            Directive::Inputs(codes) => inputs.extend_from_slice(codes),
            Directive::Const(code, value) => constants.push((*code, value.clone())),
            Directive::Temps(codes) => temps.extend_from_slice(codes),
        }
    }
    let output = output.ok_or(AssemblerError::MissingDirective("output"))?;

    let full: String = std::iter::once(output)
        .chain(inputs.iter().copied())
        .chain(constants.iter().map(|(code, _)| *code))
        .chain(temps.iter().copied())
        .map(TypeCode::to_char)
        .collect();
    let input_sig: String = inputs.iter().map(|c| c.to_char()).collect();
    let values = constants.into_iter().map(|(_, value)| value).collect();

    let code = encode_instructions(&statements)?;
    Ok(Kernel::new(code, &full, &input_sig, values)?)
}
