//! Evaluation engine
//!
//! Owns the configuration, the worker pool, the plan policy and a cache of
//! kernels that already passed validation. One call to
//! [`Engine::evaluate_into`] checks the operands against the kernel,
//! derives the broadcast shape, asks the policy for a plan and runs it.

use crate::array::{Array, Operand};
use crate::column::Column;
use crate::config::{EngineConfig, MAX_THREADS};
use crate::driver::{self, Evaluation, OutputSink, Source, ThreadState};
use crate::error::{Result, RuntimeError};
use crate::interp::{identity, Accumulate, VmParams};
use crate::iter::{broadcast_shape, broadcast_strides, contiguous_strides, NdIter};
use crate::parallel::WorkerPool;
use crate::plan::{DefaultPolicy, ExecutionPlan, PlanInput, PlanPolicy, ReduceTarget};
use fusevm_spec::{Kernel, ReductionAxis, TypeCode};
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

/// Shapes derived from a kernel and its operand shapes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Geometry {
    /// Broadcast iteration shape
    shape: Vec<usize>,
    reduction: Option<ReduceTarget>,
    /// Shape of the result
    out_shape: Vec<usize>,
}

impl Geometry {
    fn new(kernel: &Kernel, shapes: &[&[usize]]) -> Result<Self> {
        let shape = broadcast_shape(shapes.iter().copied())?;
        let reduction = match kernel.program.reduction_axis() {
            None => None,
            Some(ReductionAxis::All) => Some(ReduceTarget::All),
            Some(axis @ ReductionAxis::Axis(a)) => match axis.index(shape.len()) {
                Some(i) => Some(ReduceTarget::Axis(i)),
                None => {
                    return Err(RuntimeError::Shape(format!(
                        "reduction axis {} out of bounds for {} dimensions",
                        a,
                        shape.len()
                    )))
                }
            },
        };
        let out_shape = match reduction {
            None => shape.clone(),
            Some(ReduceTarget::All) => Vec::new(),
            Some(ReduceTarget::Axis(axis)) => {
                let mut s = shape.clone();
                s.remove(axis);
                s
            }
        };
        Ok(Self {
            shape,
            reduction,
            out_shape,
        })
    }
}

/// Block-interpreting evaluation engine
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    pool: WorkerPool,
    policy: Box<dyn PlanPolicy>,
    validated: Mutex<HashSet<[u8; 32]>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.num_threads)?;
        Ok(Self {
            config,
            pool,
            policy: Box::new(DefaultPolicy),
            validated: Mutex::new(HashSet::new()),
        })
    }

    /// Replace the plan policy
    pub fn with_policy(mut self, policy: impl PlanPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn num_threads(&self) -> usize {
        self.pool.threads()
    }

    /// Resize the worker pool. Returns the previous thread count.
    pub fn set_num_threads(&mut self, threads: usize) -> Result<usize> {
        if threads == 0 || threads > MAX_THREADS {
            return Err(RuntimeError::Other(format!(
                "thread count must be between 1 and {}, got {}",
                MAX_THREADS, threads
            )));
        }
        let previous = self.pool.threads();
        if threads != previous {
            self.pool = WorkerPool::new(threads)?;
            debug!(previous, threads, "worker pool resized");
        }
        self.config.num_threads = threads;
        Ok(previous)
    }

    /// Validate a kernel once; later calls with the same digest are free
    pub fn validate(&self, kernel: &Kernel) -> Result<()> {
        let digest = kernel.digest();
        if self.validated.lock().contains(&digest) {
            debug!(digest = %hex_prefix(&digest), "validation cache hit");
            return Ok(());
        }
        fusevm_spec::validate(kernel)?;
        self.validated.lock().insert(digest);
        Ok(())
    }

    /// Evaluate into a freshly allocated array
    pub fn evaluate(&self, kernel: &Kernel, inputs: &[&Array]) -> Result<Array> {
        let shapes: Vec<&[usize]> = inputs.iter().map(|a| a.shape()).collect();
        let geometry = Geometry::new(kernel, &shapes)?;
        let code = output_code(kernel)?;
        let widths: Vec<usize> = inputs.iter().map(|a| a.str_width()).collect();
        let width = kernel.string_widths(&widths).first().copied().unwrap_or(0);

        let mut out = Array::zeros_with_width(code, width, &geometry.out_shape)?;
        let operands: Vec<Operand<'_>> = inputs.iter().map(|&a| Operand::Array(a)).collect();
        self.evaluate_into(kernel, &operands, &mut out)?;
        Ok(out)
    }

    /// Evaluate into an existing array. [`Operand::Output`] reads `out`
    /// itself as an input.
    pub fn evaluate_into(&self, kernel: &Kernel, operands: &[Operand<'_>], out: &mut Array) -> Result<()> {
        self.validate(kernel)?;
        check_operands(kernel, operands, out)?;

        let aliased = operands.iter().any(|o| matches!(o, Operand::Output));
        if aliased && kernel.is_reduction() {
            return Err(RuntimeError::Unsupported(
                "a reduction cannot read its own output".to_string(),
            ));
        }

        let out_shape = out.shape().to_vec();
        let shapes: Vec<&[usize]> = operands
            .iter()
            .map(|o| match o {
                Operand::Array(a) => a.shape(),
                Operand::Output => out_shape.as_slice(),
            })
            .collect();
        let geometry = Geometry::new(kernel, &shapes)?;
        if geometry.out_shape != out_shape {
            return Err(RuntimeError::Shape(format!(
                "output has shape {:?}, expected {:?}",
                out_shape, geometry.out_shape
            )));
        }

        let plan = self.policy.plan(
            &PlanInput {
                shape: &geometry.shape,
                n_inputs: operands.len(),
                reduction: geometry.reduction,
            },
            &self.config,
        );
        check_plan(plan, &geometry)?;
        debug!(%plan, shape = ?geometry.shape, "evaluation plan");

        // Reductions accumulate into an identity-filled output
        if let Some(op) = kernel.program.reduction().and_then(|op| op.reduce_op()) {
            let code = out.type_code();
            let value = identity(op, code).ok_or_else(|| {
                RuntimeError::Unsupported(format!("no {:?} identity for type '{}'", op, code))
            })?;
            let filled = Column::filled(&value, code, out.str_width(), out.len())?;
            *out.column_mut() = filled;
        }

        let mut io = Vec::with_capacity(operands.len());
        let mut widths = Vec::with_capacity(operands.len());
        for o in operands {
            match o {
                Operand::Array(a) => {
                    io.push((a.type_code(), a.str_width()));
                    widths.push(a.str_width());
                }
                Operand::Output => {
                    io.push((out.type_code(), out.str_width()));
                    widths.push(out.str_width());
                }
            }
        }
        let params = VmParams::new(kernel, self.config.block_size, self.config.bounds_check, &widths);
        let mut state = ThreadState::new(kernel, &params, &io, (out.type_code(), out.str_width()))?;

        let sources: Vec<Source<'_>> = operands
            .iter()
            .map(|o| match o {
                Operand::Array(a) => Source::Array(a.view()),
                Operand::Output => Source::Output,
            })
            .collect();
        let mut input_strides = Vec::with_capacity(shapes.len());
        for s in &shapes {
            let strides = broadcast_strides(s, &contiguous_strides(s), &geometry.shape).ok_or_else(|| {
                RuntimeError::Shape(format!("operand of shape {:?} does not broadcast to {:?}", s, geometry.shape))
            })?;
            input_strides.push(strides);
        }

        let block = self.config.block_size;
        let mut ev = Evaluation {
            params: &params,
            sources: &sources,
            accumulate: None,
        };

        match plan {
            ExecutionPlan::Empty => Ok(()),
            ExecutionPlan::Constant => {
                if out.len() != 1 {
                    return Err(RuntimeError::Shape(format!(
                        "a program without inputs needs a one-element output, got {}",
                        out.len()
                    )));
                }
                if geometry.reduction.is_some() {
                    ev.accumulate = Some(Accumulate::Stride0);
                }
                let mut it = NdIter::new(&[], vec![Vec::new()], block)?;
                let mut sink = OutputSink::new(out.column_mut().view_mut());
                driver::run_plain(&ev, &mut state, &mut it, &mut sink)
            }
            ExecutionPlan::Serial => {
                let mut it = plain_iter(&geometry.shape, input_strides, block)?;
                let mut sink = OutputSink::new(out.column_mut().view_mut());
                driver::run_plain(&ev, &mut state, &mut it, &mut sink)
            }
            ExecutionPlan::Parallel { threads } => {
                let it = plain_iter(&geometry.shape, input_strides, block)?;
                self.pool.run_plain(
                    &ev,
                    &mut state,
                    &it,
                    out.column_mut().view_mut(),
                    threads,
                    self.config.tasks_per_thread,
                )
            }
            ExecutionPlan::ReduceFull => {
                ev.accumulate = Some(Accumulate::Stride0);
                let mut strides = vec![vec![0; geometry.shape.len()]];
                strides.extend(input_strides);
                let mut it = NdIter::new(&geometry.shape, strides, block)?;
                let mut sink = OutputSink::new(out.column_mut().view_mut());
                driver::run_plain(&ev, &mut state, &mut it, &mut sink)
            }
            ExecutionPlan::ReduceInner { axis } => {
                ev.accumulate = Some(Accumulate::Stride0);
                let split = AxisSplit::new(&geometry, axis, input_strides);
                let outer = NdIter::new(&split.groups, split.group_strides, block)?;
                let inner_strides = split.axis_strides.iter().map(|&s| vec![s]).collect();
                let mut inner = NdIter::new(&[split.axis_len], inner_strides, block)?;
                let mut sink = OutputSink::new(out.column_mut().view_mut());
                driver::run_reduce_inner(&ev, &mut state, &outer, &mut inner, &mut sink)
            }
            ExecutionPlan::ReduceOuter { axis } => {
                ev.accumulate = Some(Accumulate::Elementwise);
                let split = AxisSplit::new(&geometry, axis, input_strides);
                let mut groups = NdIter::new(&split.groups, split.group_strides, block)?;
                let mut sink = OutputSink::new(out.column_mut().view_mut());
                driver::run_reduce_outer(&ev, &mut state, split.axis_len, &split.axis_strides, &mut groups, &mut sink)
            }
        }
    }
}

/// Operand strides of a reduction split into the reduced axis and the
/// remaining group dimensions. Operand 0 is the output.
struct AxisSplit {
    groups: Vec<usize>,
    group_strides: Vec<Vec<usize>>,
    axis_len: usize,
    axis_strides: Vec<usize>,
}

impl AxisSplit {
    fn new(geometry: &Geometry, axis: usize, input_strides: Vec<Vec<usize>>) -> Self {
        let mut groups = geometry.shape.clone();
        let axis_len = groups.remove(axis);

        let mut group_strides = Vec::with_capacity(input_strides.len() + 1);
        let mut axis_strides = Vec::with_capacity(input_strides.len() + 1);
        group_strides.push(contiguous_strides(&geometry.out_shape));
        axis_strides.push(0);
        for mut s in input_strides {
            axis_strides.push(s.remove(axis));
            group_strides.push(s);
        }
        Self {
            groups,
            group_strides,
            axis_len,
            axis_strides,
        }
    }
}

fn plain_iter(shape: &[usize], input_strides: Vec<Vec<usize>>, block: usize) -> Result<NdIter> {
    let mut strides = Vec::with_capacity(input_strides.len() + 1);
    strides.push(contiguous_strides(shape));
    strides.extend(input_strides);
    NdIter::new(shape, strides, block)
}

fn output_code(kernel: &Kernel) -> Result<TypeCode> {
    kernel
        .output_type()
        .ok_or_else(|| RuntimeError::InputMismatch("kernel declares no output register".to_string()))
}

fn check_operands(kernel: &Kernel, operands: &[Operand<'_>], out: &Array) -> Result<()> {
    if operands.len() != kernel.n_inputs() {
        return Err(RuntimeError::InputMismatch(format!(
            "kernel takes {} inputs, got {}",
            kernel.n_inputs(),
            operands.len()
        )));
    }
    for (i, (operand, &expected)) in operands.iter().zip(&kernel.input_signature).enumerate() {
        let code = match operand {
            Operand::Array(a) => a.type_code(),
            Operand::Output => out.type_code(),
        };
        if !code.accepts(expected) {
            return Err(RuntimeError::InputMismatch(format!(
                "input {} has type '{}', kernel expects '{}'",
                i, code, expected
            )));
        }
    }
    let expected = output_code(kernel)?;
    if !out.type_code().accepts(expected) {
        return Err(RuntimeError::InputMismatch(format!(
            "output has type '{}', kernel produces '{}'",
            out.type_code(),
            expected
        )));
    }
    Ok(())
}

/// Reject plans from a custom policy that do not fit the program
fn check_plan(plan: ExecutionPlan, geometry: &Geometry) -> Result<()> {
    let fits = match (plan, geometry.reduction) {
        (ExecutionPlan::Constant | ExecutionPlan::Empty, _) => true,
        (ExecutionPlan::Serial | ExecutionPlan::Parallel { .. }, None) => true,
        (ExecutionPlan::ReduceFull, Some(ReduceTarget::All)) => true,
        (ExecutionPlan::ReduceFull, Some(ReduceTarget::Axis(_))) => geometry.shape.len() <= 1,
        (ExecutionPlan::ReduceInner { axis } | ExecutionPlan::ReduceOuter { axis }, Some(ReduceTarget::Axis(a))) => {
            axis == a
        }
        _ => false,
    };
    if fits {
        Ok(())
    } else {
        Err(RuntimeError::Unsupported(format!(
            "plan {} does not fit this program",
            plan
        )))
    }
}

fn hex_prefix(digest: &[u8; 32]) -> String {
    digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
}
