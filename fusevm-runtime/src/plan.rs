//! Execution plan selection

use crate::config::EngineConfig;
use std::fmt;

/// Strategy for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// No inputs: one single-element block
    Constant,
    /// Some input has no elements
    Empty,
    Serial,
    Parallel { threads: usize },
    /// Reduce every element into one output value
    ReduceFull,
    /// Walk each output group's reduction axis in turn
    ReduceInner { axis: usize },
    /// Walk the (short) reduction axis outside, all groups inside
    ReduceOuter { axis: usize },
}

impl ExecutionPlan {
    pub fn is_reduction(&self) -> bool {
        matches!(
            self,
            ExecutionPlan::ReduceFull | ExecutionPlan::ReduceInner { .. } | ExecutionPlan::ReduceOuter { .. }
        )
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPlan::Constant => write!(f, "constant"),
            ExecutionPlan::Empty => write!(f, "empty"),
            ExecutionPlan::Serial => write!(f, "serial"),
            ExecutionPlan::Parallel { threads } => write!(f, "parallel({})", threads),
            ExecutionPlan::ReduceFull => write!(f, "reduce-full"),
            ExecutionPlan::ReduceInner { axis } => write!(f, "reduce-inner(axis {})", axis),
            ExecutionPlan::ReduceOuter { axis } => write!(f, "reduce-outer(axis {})", axis),
        }
    }
}

/// Reduction target, already resolved against the iteration shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceTarget {
    All,
    Axis(usize),
}

/// Shape metadata a policy decides from
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    /// Broadcast iteration shape
    pub shape: &'a [usize],
    pub n_inputs: usize,
    pub reduction: Option<ReduceTarget>,
}

impl PlanInput<'_> {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Maps shape metadata to an execution plan
pub trait PlanPolicy: Send + Sync + fmt::Debug {
    fn plan(&self, input: &PlanInput<'_>, config: &EngineConfig) -> ExecutionPlan;
}

/// Thresholds from [`EngineConfig`]: parallel above `parallel_threshold`
/// elements, outer reduction loop below `reduction_threshold`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl PlanPolicy for DefaultPolicy {
    fn plan(&self, input: &PlanInput<'_>, config: &EngineConfig) -> ExecutionPlan {
        let size = input.size();
        if input.n_inputs == 0 {
            return ExecutionPlan::Constant;
        }
        if size == 0 {
            return ExecutionPlan::Empty;
        }

        match input.reduction {
            Some(ReduceTarget::All) => ExecutionPlan::ReduceFull,
            Some(ReduceTarget::Axis(_)) if input.shape.len() <= 1 => ExecutionPlan::ReduceFull,
            Some(ReduceTarget::Axis(axis)) => {
                if input.shape[axis] < config.reduction_threshold {
                    ExecutionPlan::ReduceOuter { axis }
                } else {
                    ExecutionPlan::ReduceInner { axis }
                }
            }
            None => {
                let block = config.block_size.max(1);
                if config.num_threads <= 1 || size < config.parallel_threshold {
                    ExecutionPlan::Serial
                } else {
                    let threads = config.num_threads.min(size.div_ceil(block));
                    if threads <= 1 {
                        ExecutionPlan::Serial
                    } else {
                        ExecutionPlan::Parallel { threads }
                    }
                }
            }
        }
    }
}
