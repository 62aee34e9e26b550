//! Integration tests for the FuseVM runtime
//!
//! Kernels are written in assembly and evaluated through the engine.

use fusevm_assembler::assemble_kernel;
use fusevm_runtime::{Array, Engine, EngineConfig, Operand};
use fusevm_spec::Kernel;
use num_complex::Complex64;

fn kernel(source: &str) -> Kernel {
    assemble_kernel(source).unwrap()
}

fn serial() -> Engine {
    Engine::new(EngineConfig::serial()).unwrap()
}

// ============================================================================
// Arithmetic
// ============================================================================

#[test]
fn test_polynomial() {
    // 3 * x * x + 1
    let k = kernel(
        r#"
        .output d
        .inputs d
        .const d 3.0
        .const d 1.0
        .temps d
            mul_ddd r4, r1, r1
            mul_ddd r4, r4, r2
            add_ddd r0, r4, r3
        "#,
    );
    let x = Array::from_vec(vec![0.0, 1.0, 2.0, -3.0]);
    let out = serial().evaluate(&k, &[&x]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[1.0, 4.0, 13.0, 28.0]);
}

#[test]
fn test_integer_division_and_modulo() {
    let div = kernel(".output l\n.inputs ll\ndiv_lll r0, r1, r2\n");
    let rem = kernel(".output l\n.inputs ll\nmod_lll r0, r1, r2\n");
    let a = Array::from_vec(vec![7i64, -7, 5, -7]);
    let b = Array::from_vec(vec![2i64, 2, 0, 3]);

    let q = serial().evaluate(&div, &[&a, &b]).unwrap();
    assert_eq!(q.as_slice::<i64>().unwrap(), &[3, -3, 0, -2]);

    // Floored: the result takes the sign of the divisor
    let r = serial().evaluate(&rem, &[&a, &b]).unwrap();
    assert_eq!(r.as_slice::<i64>().unwrap(), &[1, 1, 0, 2]);

    let b = Array::from_vec(vec![-3i64, 3, -3, -3]);
    let r = serial().evaluate(&rem, &[&a, &b]).unwrap();
    assert_eq!(r.as_slice::<i64>().unwrap(), &[-2, 2, -1, -1]);
}

#[test]
fn test_integer_power() {
    let k = kernel(".output l\n.inputs ll\npow_lll r0, r1, r2\n");
    let base = Array::from_vec(vec![2i64, -1, -1, 1, 3, 5]);
    let exp = Array::from_vec(vec![-1i64, -3, -2, -5, 4, 0]);
    let out = serial().evaluate(&k, &[&base, &exp]).unwrap();
    assert_eq!(out.as_slice::<i64>().unwrap(), &[0, -1, 1, 1, 81, 1]);
}

#[test]
fn test_int32_wraps() {
    let k = kernel(".output i\n.inputs ii\nadd_iii r0, r1, r2\n");
    let a = Array::from_vec(vec![i32::MAX, i32::MIN]);
    let b = Array::from_vec(vec![1i32, -1]);
    let out = serial().evaluate(&k, &[&a, &b]).unwrap();
    assert_eq!(out.as_slice::<i32>().unwrap(), &[i32::MIN, i32::MAX]);
}

#[test]
fn test_float_modulo_follows_divisor_sign() {
    let k = kernel(".output d\n.inputs dd\nmod_ddd r0, r1, r2\n");
    let a = Array::from_vec(vec![7.5, -7.5]);
    let b = Array::from_vec(vec![2.0, 2.0]);
    let out = serial().evaluate(&k, &[&a, &b]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[1.5, 0.5]);
}

#[test]
fn test_casts_and_ones_like() {
    let k = kernel(
        r#"
        .output d
        .inputs l
        .temps d
            cast_dl r2, r1
            ones_like_dd r0, r2
            add_ddd r0, r0, r2
        "#,
    );
    let a = Array::from_vec(vec![1i64, -4, 10]);
    let out = serial().evaluate(&k, &[&a]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[2.0, -3.0, 11.0]);
}

// ============================================================================
// Comparisons and selection
// ============================================================================

#[test]
fn test_where_selects_maximum() {
    let k = kernel(
        r#"
        .output d
        .inputs dd
        .temps b
            ge_bdd r3, r1, r2
            where_dbdd r0, r3, r1, r2
        "#,
    );
    let a = Array::from_vec(vec![1.0, 5.0, -2.0, 4.0]);
    let b = Array::from_vec(vec![3.0, 2.0, -1.0, 4.0]);
    let out = serial().evaluate(&k, &[&a, &b]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[3.0, 5.0, -1.0, 4.0]);
}

#[test]
fn test_bool_logic() {
    let k = kernel(
        r#"
        .output b
        .inputs bb
        .temps b
            and_bbb r3, r1, r2
            invert_bb r3, r3
            or_bbb r0, r3, r1
        "#,
    );
    let a = Array::from_vec(vec![true, true, false, false]);
    let b = Array::from_vec(vec![true, false, true, false]);
    let out = serial().evaluate(&k, &[&a, &b]).unwrap();
    assert_eq!(out.as_slice::<bool>().unwrap(), &[true, true, true, true]);
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn test_function_calls() {
    let k = kernel(
        r#"
        .output d
        .inputs dd
        .temps d
            func_ddn r3, r1, sqrt
            func_dddn r0, r3, r2, arctan2
        "#,
    );
    let a = Array::from_vec(vec![4.0, 9.0]);
    let b = Array::from_vec(vec![2.0, 0.0]);
    let out = serial().evaluate(&k, &[&a, &b]).unwrap();
    let values = out.as_slice::<f64>().unwrap();
    assert!((values[0] - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    assert!((values[1] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
}

#[test]
fn test_float32_functions() {
    let k = kernel(".output f\n.inputs f\nfunc_ffn r0, r1, floor\n");
    let a = Array::from_vec(vec![1.5f32, -1.5, 2.0]);
    let out = serial().evaluate(&k, &[&a]).unwrap();
    assert_eq!(out.as_slice::<f32>().unwrap(), &[1.0, -2.0, 2.0]);
}

// ============================================================================
// Complex
// ============================================================================

#[test]
fn test_complex_arithmetic() {
    let k = kernel(
        r#"
        .output c
        .inputs dd
        .temps c
            complex_cdd r3, r1, r2
            mul_ccc r0, r3, r3
        "#,
    );
    let re = Array::from_vec(vec![1.0, 0.0]);
    let im = Array::from_vec(vec![2.0, 1.0]);
    let out = serial().evaluate(&k, &[&re, &im]).unwrap();
    assert_eq!(
        out.as_slice::<Complex64>().unwrap(),
        &[Complex64::new(-3.0, 4.0), Complex64::new(-1.0, 0.0)]
    );
}

#[test]
fn test_complex_parts_and_abs() {
    let k = kernel(
        r#"
        .output d
        .inputs c
        .temps cd
            func_ccn r2, r1, absolute
            real_dc r0, r2
            imag_dc r3, r1
            add_ddd r0, r0, r3
        "#,
    );
    let z = Array::from_vec(vec![Complex64::new(3.0, 4.0), Complex64::new(0.0, -2.0)]);
    let out = serial().evaluate(&k, &[&z]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[9.0, 0.0]);
}

#[test]
fn test_complex_power_by_zero() {
    let k = kernel(
        r#"
        .output c
        .inputs c
        .const c (0, 0)
            func_cccn r0, r1, r2, pow
        "#,
    );
    let z = Array::from_vec(vec![Complex64::new(0.0, 0.0), Complex64::new(2.0, -1.0)]);
    let out = serial().evaluate(&k, &[&z]).unwrap();
    assert_eq!(
        out.as_slice::<Complex64>().unwrap(),
        &[Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)]
    );
}

// ============================================================================
// Strings
// ============================================================================

#[test]
fn test_string_comparison_pads_with_nul() {
    let eq = kernel(".output b\n.inputs ss\neq_bss r0, r1, r2\n");
    let gt = kernel(".output b\n.inputs ss\ngt_bss r0, r1, r2\n");
    let a = Array::strings(&["ab", "abc", "b"]);
    let b = Array::strings(&["ab", "ab", "a"]);

    let out = serial().evaluate(&eq, &[&a, &b]).unwrap();
    assert_eq!(out.as_slice::<bool>().unwrap(), &[true, false, false]);

    let out = serial().evaluate(&gt, &[&a, &b]).unwrap();
    assert_eq!(out.as_slice::<bool>().unwrap(), &[false, true, true]);
}

#[test]
fn test_string_constant() {
    let k = kernel(".output b\n.inputs s\n.const s \"m\"\nge_bss r0, r1, r2\n");
    let a = Array::strings(&["a", "m", "zz", "ma"]);
    let out = serial().evaluate(&k, &[&a]).unwrap();
    assert_eq!(out.as_slice::<bool>().unwrap(), &[false, true, true, true]);
}

#[test]
fn test_string_copy() {
    let k = kernel(".output s\n.inputs s\ncopy_ss r0, r1\n");
    let a = Array::strings(&["one", "three", ""]);
    let out = serial().evaluate(&k, &[&a]).unwrap();
    assert_eq!(out.str_width(), 5);
    assert_eq!(out.str_at(0), Some(&b"one"[..]));
    assert_eq!(out.str_at(1), Some(&b"three"[..]));
    assert_eq!(out.str_at(2), Some(&b""[..]));
}

// ============================================================================
// Broadcasting
// ============================================================================

#[test]
fn test_broadcast_column_and_row() {
    let k = kernel(".output l\n.inputs ll\nmul_lll r0, r1, r2\n");
    let col = Array::from_shape_vec(&[3, 1], vec![1i64, 2, 3]).unwrap();
    let row = Array::from_vec(vec![1i64, 10, 100, 1000]);
    let out = serial().evaluate(&k, &[&col, &row]).unwrap();
    assert_eq!(out.shape(), &[3, 4]);
    assert_eq!(
        out.as_slice::<i64>().unwrap(),
        &[1, 10, 100, 1000, 2, 20, 200, 2000, 3, 30, 300, 3000]
    );
}

#[test]
fn test_broadcast_scalar() {
    let k = kernel(".output d\n.inputs dd\nsub_ddd r0, r1, r2\n");
    let x = Array::from_vec(vec![1.0, 2.0, 3.0]);
    let s = Array::scalar(0.5f64);
    let out = serial().evaluate(&k, &[&x, &s]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[0.5, 1.5, 2.5]);
}

#[test]
fn test_scalar_inputs_give_scalar_output() {
    let k = kernel(".output d\n.inputs dd\nadd_ddd r0, r1, r2\n");
    let out = serial()
        .evaluate(&k, &[&Array::scalar(1.0f64), &Array::scalar(2.0f64)])
        .unwrap();
    assert!(out.shape().is_empty());
    assert_eq!(out.as_slice::<f64>().unwrap(), &[3.0]);
}

#[test]
fn test_many_blocks_with_tail() {
    let k = kernel(".output l\n.inputs l\n.const l 1\nadd_lll r0, r1, r2\n");
    let n = 128 * 3 + 17;
    let a = Array::from_vec((0..n as i64).collect::<Vec<_>>());
    let out = serial().evaluate(&k, &[&a]).unwrap();
    let expected: Vec<i64> = (1..=n as i64).collect();
    assert_eq!(out.as_slice::<i64>().unwrap(), expected.as_slice());
}

// ============================================================================
// Special shapes
// ============================================================================

#[test]
fn test_program_without_inputs() {
    let k = kernel(
        r#"
        .output d
        .const d 2.0
        .const d 3.5
            mul_ddd r0, r1, r2
        "#,
    );
    let out = serial().evaluate(&k, &[]).unwrap();
    assert!(out.shape().is_empty());
    assert_eq!(out.as_slice::<f64>().unwrap(), &[7.0]);
}

#[test]
fn test_empty_input() {
    let k = kernel(".output d\n.inputs dd\nadd_ddd r0, r1, r2\n");
    let a = Array::from_shape_vec::<f64>(&[0, 3], vec![]).unwrap();
    let b = Array::from_vec(vec![1.0, 2.0, 3.0]);
    let out = serial().evaluate(&k, &[&a, &b]).unwrap();
    assert_eq!(out.shape(), &[0, 3]);
    assert!(out.is_empty());
}

// ============================================================================
// Output aliasing
// ============================================================================

#[test]
fn test_output_as_input() {
    // a = a + a
    let k = kernel(".output d\n.inputs dd\nadd_ddd r0, r1, r2\n");
    let mut a = Array::from_vec((0..300).map(f64::from).collect::<Vec<_>>());
    serial()
        .evaluate_into(&k, &[Operand::Output, Operand::Output], &mut a)
        .unwrap();
    let expected: Vec<f64> = (0..300).map(|i| 2.0 * f64::from(i)).collect();
    assert_eq!(a.as_slice::<f64>().unwrap(), expected.as_slice());
}

#[test]
fn test_output_register_read_back() {
    // out = (2x)^2, reading r0 after writing it
    let k = kernel(
        r#"
        .output d
        .inputs d
            add_ddd r0, r1, r1
            mul_ddd r0, r0, r0
        "#,
    );
    let x = Array::from_vec(vec![1.0, -2.0, 0.5]);
    let out = serial().evaluate(&k, &[&x]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[4.0, 16.0, 1.0]);
}

#[test]
fn test_evaluate_into_existing_output() {
    let k = kernel(".output d\n.inputs d\nneg_dd r0, r1\n");
    let x = Array::from_vec(vec![1.0, 2.0]);
    let mut out = Array::from_vec(vec![9.0, 9.0]);
    serial().evaluate_into(&k, &[Operand::from(&x)], &mut out).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[-1.0, -2.0]);
}
