//! # FuseVM Runtime
//!
//! Evaluate FuseVM kernels over N-dimensional arrays, one block of elements
//! at a time.
//!
//! Every instruction runs as a tight loop over a block (128 elements by
//! default), so intermediate results stay in small per-thread register
//! columns instead of full-size temporaries.
//!
//! ## Features
//!
//! - **Typed register file**: output, inputs, constants and temporaries
//! - **Block interpreter**: fixed-size fast path plus a runtime-length path
//! - **Broadcasting**: inputs of different shapes over one iteration shape
//! - **Reductions**: sum, prod, min, max over one axis or all axes
//! - **Parallel evaluation**: large element-wise kernels on a worker pool
//! - **Output aliasing**: an input may be the output array itself
//!
//! ## Example
//!
//! ```rust,no_run
//! use fusevm_runtime::{Array, Engine, EngineConfig};
//! use fusevm_spec::instruction::encode_into;
//! use fusevm_spec::{Kernel, Opcode};
//!
//! let mut code = Vec::new();
//! encode_into(Opcode::MulDDD, &[0, 1, 2], &mut code);
//! let kernel = Kernel::new(code, "ddd", "dd", vec![]).unwrap();
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let a = Array::from_vec(vec![1.0, 2.0, 3.0]);
//! let b = Array::from_vec(vec![4.0, 5.0, 6.0]);
//! let out = engine.evaluate(&kernel, &[&a, &b]).unwrap();
//! println!("{:?}", out.as_slice::<f64>());
//! ```

pub mod array;
pub mod column;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod error;
pub mod interp;
pub mod iter;
pub mod parallel;
pub mod plan;
pub mod registers;

pub use array::{Array, Operand};
pub use column::{Column, ColumnMut, ColumnRef, Element};
pub use config::{EngineConfig, MAX_THREADS};
pub use engine::Engine;
pub use error::{ExitStatus, Result, RuntimeError};
pub use interp::{stringcmp, Accumulate, VmParams};
pub use iter::NdIter;
pub use parallel::{Rendezvous, WorkerPool};
pub use plan::{DefaultPolicy, ExecutionPlan, PlanInput, PlanPolicy, ReduceTarget};
pub use registers::RegisterFile;

/// Evaluate a kernel with a default engine
///
/// Builds an engine from [`EngineConfig::from_env`] for the single call.
pub fn evaluate(kernel: &fusevm_spec::Kernel, inputs: &[&Array]) -> Result<Array> {
    Engine::new(EngineConfig::from_env())?.evaluate(kernel, inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusevm_spec::instruction::encode_into;
    use fusevm_spec::{Kernel, Opcode};

    #[test]
    fn test_public_exports() {
        let _ = EngineConfig::default();
        let _ = ExitStatus::Success;
        let _ = DefaultPolicy;
        assert_eq!(stringcmp(b"ab", b"abc"), -1);
    }

    #[test]
    fn test_evaluate_helper() {
        let mut code = Vec::new();
        encode_into(Opcode::MulDDD, &[0, 1, 2], &mut code);
        let kernel = Kernel::new(code, "ddd", "dd", vec![]).unwrap();
        let a = Array::from_vec(vec![1.0, 2.0, 3.0]);
        let b = Array::from_vec(vec![4.0, 5.0, 6.0]);
        let out = evaluate(&kernel, &[&a, &b]).unwrap();
        assert_eq!(out.as_slice::<f64>(), Some(&[4.0, 10.0, 18.0][..]));
    }
}
