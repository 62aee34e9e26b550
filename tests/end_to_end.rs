//! End-to-end integration tests for the FuseVM toolchain
//!
//! These tests verify the complete workflow:
//! 1. Assemble source code into a Kernel
//! 2. Serialize it to the container format and load it back
//! 3. Evaluate it over arrays
//! 4. Disassemble the kernel back to source and evaluate again

use fusevm_assembler::assemble_kernel;
use fusevm_disassembler::disassemble_kernel;
use fusevm_runtime::{Array, Engine, EngineConfig};
use fusevm_spec::Kernel;
use num_complex::Complex64;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Assemble, pass through the container format and the disassembler, and
/// check every stage yields the same kernel
fn load(source: &str) -> Kernel {
    init_tracing();
    let kernel = assemble_kernel(source).unwrap();

    let bytes = kernel.to_bytes().unwrap();
    let loaded = Kernel::from_bytes(&bytes).unwrap();
    assert_eq!(loaded, kernel);

    let text = disassemble_kernel(&loaded).unwrap();
    let reassembled = assemble_kernel(&text).unwrap();
    assert_eq!(reassembled, kernel, "{}", text);
    reassembled
}

fn engine() -> Engine {
    Engine::new(EngineConfig::default().with_threads(4)).unwrap()
}

// ============================================================================
// Assemble -> Evaluate Tests
// ============================================================================

#[test]
fn test_kinetic_energy() {
    // 0.5 * m * v^2
    let kernel = load(
        r#"
        # kinetic energy
        .output d
        .inputs dd
        .const d 0.5
        .temps d
            mul_ddd r4, r2, r2
            mul_ddd r4, r4, r1
            mul_ddd r0, r4, r3
        "#,
    );
    let m = Array::from_vec(vec![2.0, 1.0, 4.0]);
    let v = Array::from_vec(vec![3.0, 10.0, 0.5]);
    let out = engine().evaluate(&kernel, &[&m, &v]).unwrap();
    assert_eq!(out.as_slice::<f64>().unwrap(), &[9.0, 50.0, 0.5]);
}

#[test]
fn test_clipped_ramp() {
    // clip(x, lo, hi) with two selects
    let kernel = load(
        r#"
        .output l
        .inputs l
        .const l 0
        .const l 100
        .temps b
            gt_bll r4, r3, r1
            where_lbll r0, r4, r1, r3
            gt_bll r4, r0, r2
            where_lbll r0, r4, r0, r2
        "#,
    );
    let x = Array::from_vec(vec![-50i64, 0, 42, 100, 1000]);
    let out = engine().evaluate(&kernel, &[&x]).unwrap();
    assert_eq!(out.as_slice::<i64>().unwrap(), &[0, 0, 42, 100, 100]);
}

#[test]
fn test_complex_rotation() {
    // z * exp(i * theta)
    let kernel = load(
        r#"
        .output c
        .inputs cd
        .const d 0.0
        .temps c
            complex_cdd r4, r3, r2
            func_ccn r4, r4, exp
            mul_ccc r0, r1, r4
        "#,
    );
    let z = Array::from_vec(vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 2.0)]);
    let theta = Array::from_vec(vec![std::f64::consts::FRAC_PI_2, std::f64::consts::PI]);
    let out = engine().evaluate(&kernel, &[&z, &theta]).unwrap();
    let values = out.as_slice::<Complex64>().unwrap();
    assert!((values[0] - Complex64::new(0.0, 1.0)).norm() < 1e-12);
    assert!((values[1] - Complex64::new(0.0, -2.0)).norm() < 1e-12);
}

#[test]
fn test_string_filter() {
    let kernel = load(
        r#"
        .output b
        .inputs s
        .const s "m"
        .const s "t"
        .temps bb
            ge_bss r4, r1, r2
            gt_bss r5, r3, r1
            and_bbb r0, r4, r5
        "#,
    );
    let words = Array::strings(&["apple", "melon", "peach", "tomato", "zebra", "m"]);
    let out = engine().evaluate(&kernel, &[&words]).unwrap();
    assert_eq!(
        out.as_slice::<bool>().unwrap(),
        &[false, true, true, false, false, true]
    );
}

#[test]
fn test_mean_of_rows() {
    let kernel = load(
        r#"
        .output d
        .inputs d
        .const d 0.25
        .temps d
            mul_ddd r3, r1, r2
            sum_ddn r0, r3, 1
        "#,
    );
    let grid = Array::from_shape_vec(&[3, 4], (0..12).map(f64::from).collect::<Vec<_>>()).unwrap();
    let out = engine().evaluate(&kernel, &[&grid]).unwrap();
    assert_eq!(out.shape(), &[3]);
    assert_eq!(out.as_slice::<f64>().unwrap(), &[1.5, 5.5, 9.5]);
}

#[test]
fn test_large_evaluation_uses_pool() {
    let kernel = load(
        r#"
        .output d
        .inputs dd
            func_dddn r0, r1, r2, arctan2
        "#,
    );
    let n = 100_000;
    let y = Array::from_vec((0..n).map(|i| f64::from(i % 360) - 180.0).collect::<Vec<_>>());
    let x = Array::from_vec(vec![1.0; n as usize]);

    let parallel = engine().evaluate(&kernel, &[&y, &x]).unwrap();
    let serial = Engine::new(EngineConfig::serial())
        .unwrap()
        .evaluate(&kernel, &[&y, &x])
        .unwrap();
    assert_eq!(parallel, serial);
}

// ============================================================================
// Top-level Helper
// ============================================================================

#[test]
fn test_evaluate_helper() {
    let kernel = load(".output l\n.inputs l\nmax_lln r0, r1, all\n");
    let a = Array::from_vec(vec![4i64, 9, -1]);
    let out = fusevm_runtime::evaluate(&kernel, &[&a]).unwrap();
    assert_eq!(out.as_slice::<i64>().unwrap(), &[9]);
}
