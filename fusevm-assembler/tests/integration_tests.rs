//! Integration tests for the FuseVM assembler
//!
//! Tests the complete assembly workflow including:
//! - Instruction parsing and encoding for every opcode
//! - Function names and reduction axes
//! - Register directives and kernel construction

use fusevm_assembler::{assemble, assemble_kernel, encode, parse_instruction, parse_register, resolve};
use fusevm_spec::{validate, Constant, FuncFamily, Opcode, TypeCode, OPCODE_TABLE};
use fusevm_spec::{ArgKind, ReductionAxis};

// ============================================================================
// Basic Assembly Tests
// ============================================================================

#[test]
fn test_assemble_empty_program() {
    let program = assemble("").unwrap();
    assert!(program.is_empty());
}

#[test]
fn test_assemble_comments_only() {
    let source = r#"
        # This is a comment
        # Another comment
    "#;
    let program = assemble(source).unwrap();
    assert!(program.is_empty());
}

#[test]
fn test_assemble_multiple_instructions() {
    let source = r#"
        add_lll r3, r1, r2
        mul_lll r3, r3, r3
        sub_lll r0, r3, r1   # trailing comment
    "#;
    let program = assemble(source).unwrap();
    assert_eq!(program.len(), 12);
    assert_eq!(program.decode().unwrap().len(), 3);
}

#[test]
fn test_mnemonics_are_case_insensitive() {
    let lower = assemble("add_ddd r0, r1, r2").unwrap();
    let upper = assemble("ADD_DDD r0, r1, r2").unwrap();
    assert_eq!(lower, upper);
}

// ============================================================================
// Opcode Table Coverage
// ============================================================================

/// Source text for an opcode with every operand filled in
fn sample_line(info: &fusevm_spec::OpcodeInfo) -> String {
    let operands: Vec<String> = info
        .operands()
        .enumerate()
        .map(|(i, kind)| match kind {
            ArgKind::Index if info.opcode.is_reduction() => "all".to_string(),
            ArgKind::Index => "0".to_string(),
            _ => format!("r{}", i),
        })
        .collect();
    if operands.is_empty() {
        info.mnemonic.to_string()
    } else {
        format!("{} {}", info.mnemonic, operands.join(", "))
    }
}

#[test]
fn test_every_opcode_assembles() {
    for info in OPCODE_TABLE {
        let line = sample_line(info);
        let parsed = parse_instruction(&line).unwrap_or_else(|e| panic!("{}: {}", line, e));
        let inst = resolve(&parsed, 0).unwrap_or_else(|e| panic!("{}: {}", line, e));
        assert_eq!(inst.opcode, info.opcode);
        assert_eq!(encode(&inst).len(), inst.width());
    }
}

// ============================================================================
// Immediates
// ============================================================================

#[test]
fn test_every_function_name_resolves() {
    for family in FuncFamily::ALL {
        let mnemonic = match family {
            FuncFamily::FF => "func_ffn r0, r1",
            FuncFamily::FFF => "func_fffn r0, r1, r2",
            FuncFamily::DD => "func_ddn r0, r1",
            FuncFamily::DDD => "func_dddn r0, r1, r2",
            FuncFamily::CC => "func_ccn r0, r1",
            FuncFamily::CCC => "func_cccn r0, r1, r2",
        };
        for (index, name) in family.names().iter().enumerate() {
            let inst = resolve(&parse_instruction(&format!("{}, {}", mnemonic, name)).unwrap(), 0).unwrap();
            assert_eq!(inst.function(), Some((family, index as u8)));
        }
    }
}

#[test]
fn test_reduction_axes() {
    let program = assemble("sum_ddn r0, r1, all\n").unwrap();
    assert_eq!(program.reduction_axis(), Some(ReductionAxis::All));

    let program = assemble("max_lln r0, r1, 2\n").unwrap();
    assert_eq!(program.reduction_axis(), Some(ReductionAxis::Axis(2)));

    let program = assemble("min_iin r0, r1, -2\n").unwrap();
    assert_eq!(program.reduction_axis(), Some(ReductionAxis::Axis(-2)));
}

#[test]
fn test_parse_register_range() {
    assert_eq!(parse_register("r7").unwrap(), 7);
    assert!(parse_register("r999").is_err());
}

// ============================================================================
// Kernel Directives
// ============================================================================

#[test]
fn test_kernel_polynomial() {
    // out = 3 * x * x + 1
    let source = r#"
        .output d
        .inputs d
        .const d 3.0
        .const d 1.0
        .temps d
            mul_ddd r4, r1, r1
            mul_ddd r4, r4, r2
            add_ddd r0, r4, r3
    "#;
    let kernel = assemble_kernel(source).unwrap();
    assert_eq!(kernel.full_signature.len(), 5);
    assert_eq!(kernel.input_signature, vec![TypeCode::Double]);
    assert_eq!(kernel.constants, vec![Constant::Double(3.0), Constant::Double(1.0)]);
    validate(&kernel).unwrap();
}

#[test]
fn test_kernel_directive_forms() {
    let source = r#"
        .output b
        .inputs s
        .inputs s
        .const s "abc"
        eq_bss r0, r1, r3
    "#;
    let kernel = assemble_kernel(source).unwrap();
    assert_eq!(kernel.input_signature, vec![TypeCode::Str, TypeCode::Str]);
    assert_eq!(kernel.constants, vec![Constant::Str(b"abc".to_vec())]);
    assert_eq!(kernel.n_temps, 0);
    validate(&kernel).unwrap();
}

#[test]
fn test_kernel_all_constant_types() {
    let source = r#"
        .output d
        .const b true
        .const i -5
        .const l 0x10
        .const f 1.5
        .const d -2e3
        .const c (0.5, -1)
        .const s "x\ty"
        copy_dd r0, r5
    "#;
    let kernel = assemble_kernel(source).unwrap();
    assert_eq!(
        kernel.constants,
        vec![
            Constant::Bool(true),
            Constant::Int(-5),
            Constant::Long(16),
            Constant::Float(1.5),
            Constant::Double(-2000.0),
            Constant::Complex(0.5, -1.0),
            Constant::Str(b"x\ty".to_vec()),
        ]
    );
    validate(&kernel).unwrap();
}

#[test]
fn test_kernel_reduction_is_last() {
    let source = r#"
        .output d
        .inputs d
        .temps d
            mul_ddd r2, r1, r1
            sum_ddn r0, r2, 0
    "#;
    let kernel = assemble_kernel(source).unwrap();
    assert!(kernel.is_reduction());
    assert_eq!(kernel.program.reduction(), Some(Opcode::SumDDN));
    validate(&kernel).unwrap();
}
