//! Reference array-iteration service
//!
//! Walks a common iteration shape in C order, one block at a time. Each
//! operand is described by a base offset and one element stride per
//! dimension (0 along broadcast dimensions). For every block the iterator
//! tells how each operand can be reached:
//!
//! - `Strided { start, step }`: elements `start + k * step`, which the
//!   driver reads directly when `step == 1`
//! - `Gather`: arbitrary offsets, produced by [`NdIter::gather_offsets`]
//!   and staged through a buffer
//!
//! Ranged mode restricts iteration to a flat sub-range `[start, end)`,
//! which is how parallel tasks and reduction groups are carved out.

use crate::error::{Result, RuntimeError};

/// One block of the flat iteration space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Flat index of the first element
    pub start: usize,
    pub len: usize,
}

/// How an operand's elements for one block are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Strided { start: usize, step: usize },
    Gather,
}

/// Align `array_shape` to the right of `target` and return per-dimension
/// strides over the target shape. Size-1 and missing dimensions get
/// stride 0. `None` when the shapes are incompatible.
pub fn broadcast_strides(array_shape: &[usize], array_strides: &[usize], target: &[usize]) -> Option<Vec<usize>> {
    if array_shape.len() > target.len() || array_shape.len() != array_strides.len() {
        return None;
    }
    let offset = target.len() - array_shape.len();
    let mut strides = vec![0; target.len()];
    for (i, (&dim, &stride)) in array_shape.iter().zip(array_strides).enumerate() {
        let t = target[offset + i];
        if dim == t {
            strides[offset + i] = if dim == 1 { 0 } else { stride };
        } else if dim != 1 {
            return None;
        }
    }
    Some(strides)
}

/// Broadcast shape of several operand shapes
pub fn broadcast_shape<'a>(shapes: impl IntoIterator<Item = &'a [usize]>) -> Result<Vec<usize>> {
    let mut out: Vec<usize> = Vec::new();
    for shape in shapes {
        if shape.len() > out.len() {
            let mut grown = vec![1; shape.len() - out.len()];
            grown.extend_from_slice(&out);
            out = grown;
        }
        let offset = out.len() - shape.len();
        for (i, &d) in shape.iter().enumerate() {
            let o = &mut out[offset + i];
            if *o == 1 {
                *o = d;
            } else if d != 1 && d != *o {
                return Err(RuntimeError::Shape(format!(
                    "operands could not be broadcast together: {:?}",
                    shape
                )));
            }
        }
    }
    Ok(out)
}

/// C-order strides of a contiguous array, in elements
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut step = 1usize;
    for (s, &d) in strides.iter_mut().zip(shape).rev() {
        *s = step;
        step = step.saturating_mul(d.max(1));
    }
    strides
}

#[derive(Debug, Clone)]
struct OperandState {
    base: usize,
    strides: Vec<usize>,
    /// `Some(step)` when offset = base + flat * step over the whole shape
    flat_step: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct NdIter {
    shape: Vec<usize>,
    operands: Vec<OperandState>,
    block_size: usize,
    size: usize,
    start: usize,
    end: usize,
    pos: usize,
}

impl NdIter {
    /// Iterator over `shape` for operands with the given element strides
    /// (one stride per dimension of `shape`)
    pub fn new(shape: &[usize], strides: Vec<Vec<usize>>, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(RuntimeError::Other("block size must be positive".to_string()));
        }
        let size = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| RuntimeError::Shape(format!("shape {:?} overflows", shape)))?;
        let contiguous = contiguous_strides(shape);

        let mut operands = Vec::with_capacity(strides.len());
        for s in strides {
            if s.len() != shape.len() {
                return Err(RuntimeError::Shape(format!(
                    "operand has {} strides for {} dimensions",
                    s.len(),
                    shape.len()
                )));
            }
            let flat_step = flat_step(shape, &s, &contiguous);
            operands.push(OperandState {
                base: 0,
                strides: s,
                flat_step,
            });
        }

        Ok(Self {
            shape: shape.to_vec(),
            operands,
            block_size,
            size,
            start: 0,
            end: size,
            pos: 0,
        })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total element count of the iteration shape
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn n_operands(&self) -> usize {
        self.operands.len()
    }

    /// Elements left in the current range
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    /// Restrict iteration to flat indices `[start, end)` and rewind
    pub fn set_range(&mut self, start: usize, end: usize) -> Result<()> {
        if start > end || end > self.size {
            return Err(RuntimeError::Other(format!(
                "range [{}, {}) outside iteration size {}",
                start, end, self.size
            )));
        }
        self.start = start;
        self.end = end;
        self.pos = start;
        Ok(())
    }

    pub fn range(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Rewind to the start of the current range
    pub fn reset(&mut self) {
        self.pos = self.start;
    }

    /// Move every operand's base offset and rewind
    pub fn reset_base_pointers(&mut self, bases: &[usize]) -> Result<()> {
        if bases.len() != self.operands.len() {
            return Err(RuntimeError::Other(format!(
                "{} base pointers for {} operands",
                bases.len(),
                self.operands.len()
            )));
        }
        for (op, &base) in self.operands.iter_mut().zip(bases) {
            op.base = base;
        }
        self.reset();
        Ok(())
    }

    /// Next block of at most `block_size` elements
    pub fn next_block(&mut self) -> Option<BlockSpan> {
        if self.pos >= self.end {
            return None;
        }
        let len = self.block_size.min(self.end - self.pos);
        let span = BlockSpan { start: self.pos, len };
        self.pos += len;
        Some(span)
    }

    /// Element offset of `op` at flat index `flat`
    pub fn offset(&self, op: usize, flat: usize) -> usize {
        let state = &self.operands[op];
        if let Some(step) = state.flat_step {
            return state.base + flat * step;
        }
        let mut rem = flat;
        let mut offset = state.base;
        for (&dim, &stride) in self.shape.iter().zip(&state.strides).rev() {
            if dim == 0 {
                break;
            }
            offset += (rem % dim) * stride;
            rem /= dim;
        }
        offset
    }

    /// Layout of operand `op` within `block`
    pub fn access(&self, op: usize, block: &BlockSpan) -> Access {
        let state = &self.operands[op];
        if let Some(step) = state.flat_step {
            return Access::Strided {
                start: state.base + block.start * step,
                step,
            };
        }
        match (self.shape.last(), state.strides.last()) {
            (Some(&inner), Some(&step)) if inner > 0 && block.start % inner + block.len <= inner => {
                Access::Strided {
                    start: self.offset(op, block.start),
                    step,
                }
            }
            _ => Access::Gather,
        }
    }

    /// Offsets of every element of `block` for operand `op`
    pub fn gather_offsets(&self, op: usize, block: &BlockSpan, out: &mut Vec<usize>) {
        out.clear();
        if block.len == 0 {
            return;
        }
        let state = &self.operands[op];
        let ndim = self.shape.len();

        // Odometer over the multi-index of block.start
        let mut index = vec![0usize; ndim];
        let mut rem = block.start;
        for k in (0..ndim).rev() {
            let dim = self.shape[k].max(1);
            index[k] = rem % dim;
            rem /= dim;
        }
        let mut offset = self.offset(op, block.start);

        for i in 0..block.len {
            out.push(offset);
            if i + 1 == block.len {
                break;
            }
            for k in (0..ndim).rev() {
                index[k] += 1;
                offset += state.strides[k];
                if index[k] < self.shape[k] {
                    break;
                }
                offset -= index[k] * state.strides[k];
                index[k] = 0;
            }
        }
    }
}

/// `Some(step)` when the operand's offset is `flat * step` with step 0 or 1
fn flat_step(shape: &[usize], strides: &[usize], contiguous: &[usize]) -> Option<usize> {
    let relevant = || shape.iter().zip(strides).zip(contiguous).filter(|((&d, _), _)| d > 1);
    if relevant().all(|((_, &s), _)| s == 0) {
        Some(0)
    } else if relevant().all(|((_, &s), &c)| s == c) {
        Some(1)
    } else {
        None
    }
}
