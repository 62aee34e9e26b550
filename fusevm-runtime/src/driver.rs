//! Sequential block driver
//!
//! Pulls blocks from an [`NdIter`], stages inputs that are not contiguous,
//! and runs the interpreter on each block. Operand 0 of the iterator is the
//! output, operands `1..=n` are the inputs.
//!
//! Plans:
//! - plain: one pass over all blocks
//! - full reduction: same loop, output stride 0 everywhere
//! - inner reduction: for each output group, walk the reduction axis
//! - outer reduction: for each position along a short axis, walk all groups

use crate::column::{Column, ColumnMut, ColumnRef};
use crate::error::{Result, RuntimeError};
use crate::interp::{run_block, run_block_fixed, Accumulate, BlockIo, VmParams};
use crate::iter::{Access, BlockSpan, NdIter};
use crate::registers::RegisterFile;
use fusevm_spec::{Kernel, TypeCode, BLOCK_SIZE};
use tracing::trace;

/// Where an input's data comes from
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Array(ColumnRef<'a>),
    /// The output array, read before each block overwrites it
    Output,
}

/// Destination of the current task. `data` covers output elements
/// `base..base + data.len()`.
#[derive(Debug)]
pub struct OutputSink<'o> {
    pub data: ColumnMut<'o>,
    pub base: usize,
}

impl<'o> OutputSink<'o> {
    pub fn new(data: ColumnMut<'o>) -> Self {
        Self { data, base: 0 }
    }
}

/// Per-evaluation inputs shared by every block
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'p, 'a> {
    pub params: &'p VmParams,
    pub sources: &'p [Source<'a>],
    pub accumulate: Option<Accumulate>,
}

impl Evaluation<'_, '_> {
    fn output_aliased(&self) -> bool {
        self.sources.iter().any(|s| matches!(s, Source::Output))
    }
}

/// Buffers owned by one thread for the length of an evaluation
#[derive(Debug)]
pub struct ThreadState {
    pub regs: RegisterFile,
    staging: Vec<Column>,
    scratch: Column,
    offsets: Vec<usize>,
    out_offsets: Vec<usize>,
}

impl ThreadState {
    /// `inputs` and `output` give the element type and string width of
    /// each host operand
    pub fn new(
        kernel: &Kernel,
        params: &VmParams,
        inputs: &[(TypeCode, usize)],
        output: (TypeCode, usize),
    ) -> Result<Self> {
        let block = params.block_size();
        let regs = RegisterFile::new(kernel, params.string_widths(), block)?;
        let staging = inputs
            .iter()
            .map(|&(code, width)| Column::zeros(code, width, block))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            regs,
            staging,
            scratch: Column::zeros(output.0, output.1, block)?,
            offsets: Vec::with_capacity(block),
            out_offsets: Vec::with_capacity(block),
        })
    }

    pub fn try_clone(&self) -> Result<Self> {
        let fresh = |c: &Column| Column::zeros(c.type_code(), c.str_width(), c.len());
        Ok(Self {
            regs: self.regs.try_clone()?,
            staging: self.staging.iter().map(fresh).collect::<Result<Vec<_>>>()?,
            scratch: fresh(&self.scratch)?,
            offsets: Vec::with_capacity(self.offsets.capacity()),
            out_offsets: Vec::with_capacity(self.out_offsets.capacity()),
        })
    }
}

/// How one input reaches the interpreter for the current block
enum Staged<'a> {
    /// Contiguous slice of the host array
    Direct(ColumnRef<'a>),
    /// Contiguous slice of the output sink, starting at this sink index
    Sink(usize),
    /// Copied into the thread's staging column
    Buffered,
}

enum OutTarget {
    Direct { start: usize, len: usize },
    Scratch,
}

fn fill_offsets(it: &NdIter, op: usize, block: &BlockSpan, access: Access, out: &mut Vec<usize>) {
    match access {
        Access::Strided { start, step } => {
            out.clear();
            out.extend((0..block.len).map(|k| start + k * step));
        }
        Access::Gather => it.gather_offsets(op, block, out),
    }
}

fn rebase(offsets: &mut [usize], base: usize) -> Result<()> {
    for o in offsets.iter_mut() {
        *o = o.checked_sub(base).ok_or_else(|| {
            RuntimeError::Other(format!("offset {} precedes output chunk at {}", o, base))
        })?;
    }
    Ok(())
}

fn out_of_range(what: &str) -> RuntimeError {
    RuntimeError::Other(format!("{} offsets outside their array", what))
}

/// Run the interpreter over one block
fn exec_block(
    ev: &Evaluation<'_, '_>,
    state: &mut ThreadState,
    it: &NdIter,
    block: BlockSpan,
    sink: &mut OutputSink<'_>,
) -> Result<()> {
    let len = block.len;
    let aliased = ev.output_aliased();
    let ThreadState {
        regs,
        staging,
        scratch,
        offsets,
        out_offsets,
    } = state;

    // Pass 1: stage everything that cannot be viewed in place
    let mut staged = Vec::with_capacity(ev.sources.len());
    for (i, source) in ev.sources.iter().enumerate() {
        let op = i + 1;
        let access = it.access(op, &block);
        let entry = match (*source, access) {
            (Source::Array(col), Access::Strided { start, step: 1 }) => {
                Staged::Direct(col.slice(start, start + len))
            }
            (Source::Output, Access::Strided { start, step: 1 }) if start >= sink.base => {
                Staged::Sink(start - sink.base)
            }
            (source, access) => {
                fill_offsets(it, op, &block, access, offsets);
                let buffer = staging
                    .get_mut(i)
                    .ok_or_else(|| RuntimeError::InputMismatch(format!("no staging for input {}", op)))?;
                let src = match source {
                    Source::Array(col) => col,
                    Source::Output => {
                        rebase(offsets, sink.base)?;
                        sink.data.as_ref()
                    }
                };
                if !buffer.head_mut(len).gather(src, offsets.iter().copied()) {
                    return Err(out_of_range("input"));
                }
                Staged::Buffered
            }
        };
        staged.push(entry);
    }

    // Output placement
    let out_access = it.access(0, &block);
    let target = match (ev.accumulate, out_access) {
        (Some(Accumulate::Stride0), Access::Strided { start, step: 0 }) if !aliased => OutTarget::Direct {
            start: start.checked_sub(sink.base).ok_or_else(|| out_of_range("output"))?,
            len: 1,
        },
        (Some(Accumulate::Stride0), _) => {
            return Err(RuntimeError::Unsupported(
                "reduction output must have stride 0 along the reduced axis".to_string(),
            ))
        }
        (_, Access::Strided { start, step: 1 }) if !aliased => OutTarget::Direct {
            start: start.checked_sub(sink.base).ok_or_else(|| out_of_range("output"))?,
            len,
        },
        (_, access) => {
            fill_offsets(it, 0, &block, access, out_offsets);
            rebase(out_offsets, sink.base)?;
            if ev.accumulate.is_some() && !scratch.head_mut(len).gather(sink.data.as_ref(), out_offsets.iter().copied()) {
                return Err(out_of_range("output"));
            }
            OutTarget::Scratch
        }
    };

    // Pass 2: views and execution
    match target {
        OutTarget::Scratch => {
            let sink_view = if aliased { Some(sink.data.as_ref()) } else { None };
            let views = build_views(&staged, staging, sink_view, len)?;
            let io = BlockIo {
                inputs: &views,
                output: scratch.head_mut(len),
                accumulate: ev.accumulate,
            };
            dispatch_block(ev.params, regs, io, len)?;
        }
        OutTarget::Direct { start, len: out_len } => {
            let views = build_views(&staged, staging, None, len)?;
            let io = BlockIo {
                inputs: &views,
                output: sink.data.reborrow().slice(start, start + out_len),
                accumulate: ev.accumulate,
            };
            dispatch_block(ev.params, regs, io, len)?;
        }
    }

    if let OutTarget::Scratch = target {
        if !sink.data.scatter(scratch.head(len), out_offsets.iter().copied()) {
            return Err(out_of_range("output"));
        }
    }
    Ok(())
}

fn build_views<'v>(
    staged: &[Staged<'v>],
    staging: &'v [Column],
    sink: Option<ColumnRef<'v>>,
    len: usize,
) -> Result<Vec<ColumnRef<'v>>> {
    staged
        .iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            Staged::Direct(view) => Ok(*view),
            Staged::Sink(start) => sink
                .map(|s| s.slice(*start, start + len))
                .ok_or_else(|| out_of_range("input")),
            Staged::Buffered => staging
                .get(i)
                .map(|c| c.head(len))
                .ok_or_else(|| out_of_range("input")),
        })
        .collect()
}

#[inline]
fn dispatch_block(params: &VmParams, regs: &mut RegisterFile, io: BlockIo<'_, '_>, len: usize) -> Result<()> {
    if len == BLOCK_SIZE {
        run_block_fixed::<BLOCK_SIZE>(params, regs, io)
    } else {
        run_block(params, regs, io, len)
    }
}

/// Run every remaining block of `it`
pub fn run_plain(
    ev: &Evaluation<'_, '_>,
    state: &mut ThreadState,
    it: &mut NdIter,
    sink: &mut OutputSink<'_>,
) -> Result<()> {
    while let Some(block) = it.next_block() {
        exec_block(ev, state, it, block, sink)?;
    }
    Ok(())
}

/// Inner accumulation loop: `outer` enumerates output groups, `inner`
/// walks the reduction axis of one group after its base pointers are moved
/// to that group
pub fn run_reduce_inner(
    ev: &Evaluation<'_, '_>,
    state: &mut ThreadState,
    outer: &NdIter,
    inner: &mut NdIter,
    sink: &mut OutputSink<'_>,
) -> Result<()> {
    let mut bases = vec![0; outer.n_operands()];
    trace!(groups = outer.size(), axis_len = inner.size(), "inner reduction");
    for group in 0..outer.size() {
        for (op, base) in bases.iter_mut().enumerate() {
            *base = outer.offset(op, group);
        }
        inner.reset_base_pointers(&bases)?;
        run_plain(ev, state, inner, sink)?;
    }
    Ok(())
}

/// Outer accumulation loop: for each position `j` along the reduction axis,
/// `inner` walks every group with operand bases at `j * axis_strides[op]`
pub fn run_reduce_outer(
    ev: &Evaluation<'_, '_>,
    state: &mut ThreadState,
    axis_len: usize,
    axis_strides: &[usize],
    inner: &mut NdIter,
    sink: &mut OutputSink<'_>,
) -> Result<()> {
    let mut bases = vec![0; axis_strides.len()];
    trace!(groups = inner.size(), axis_len, "outer reduction");
    for j in 0..axis_len {
        for (base, &stride) in bases.iter_mut().zip(axis_strides) {
            *base = j * stride;
        }
        inner.reset_base_pointers(&bases)?;
        run_plain(ev, state, inner, sink)?;
    }
    Ok(())
}
