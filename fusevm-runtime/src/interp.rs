//! Block interpreter
//!
//! Executes every instruction of a kernel over one block of `n` elements
//! before moving on to the next block. Each opcode is a whole-block loop
//! over typed register views.
//!
//! ## Operands
//!
//! - Register 0 is the block's output view
//! - Registers `1..=n_inputs` are the block's input views
//! - Constants and temporaries live in the [`RegisterFile`]
//!
//! A destination that is also read by its own instruction is first copied to
//! a shadow column, and the aliased sources read the shadow.

use crate::column::{copy_str, Column, ColumnMut, ColumnRef, Element};
use crate::dispatch;
use crate::error::{Result, RuntimeError};
use crate::registers::RegisterFile;
use fusevm_spec::instruction::decode_at;
use fusevm_spec::{
    Constant, Instruction, Kernel, Opcode, ReduceOp, RegisterKind, RegisterLayout, SpecError,
    TypeCode, INSTRUCTION_WIDTH,
};
use num_complex::Complex64;
use std::mem;
use tracing::warn;

/// Pre-decoded program entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exec(Instruction),
    /// Unknown opcode byte; reached only if every earlier instruction ran
    Invalid { pc: usize },
    /// Four-operand instruction cut off by the end of the program
    Truncated { pc: usize },
}

/// How the final reduction combines into the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulate {
    /// Every element folds into `output[0]`
    Stride0,
    /// `output[i]` combines with element `i`
    Elementwise,
}

/// Read-only execution descriptor shared by every thread of one evaluation
#[derive(Debug, Clone)]
pub struct VmParams {
    ops: Vec<Op>,
    layout: RegisterLayout,
    block_size: usize,
    bounds_check: bool,
    string_widths: Vec<usize>,
}

impl VmParams {
    /// Decode `kernel` for execution. `input_widths` are the byte widths of
    /// string inputs, in input order.
    pub fn new(kernel: &Kernel, block_size: usize, bounds_check: bool, input_widths: &[usize]) -> Self {
        Self {
            ops: predecode(kernel.program.as_bytes()),
            layout: kernel.layout(),
            block_size,
            bounds_check,
            string_widths: kernel.string_widths(input_widths),
        }
    }

    #[inline]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    #[inline]
    pub fn layout(&self) -> RegisterLayout {
        self.layout
    }

    /// Register count `R`
    #[inline]
    pub fn register_count(&self) -> usize {
        self.layout.len()
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn bounds_check(&self) -> bool {
        self.bounds_check
    }

    pub fn string_widths(&self) -> &[usize] {
        &self.string_widths
    }
}

/// Decode every slot up front, skipping `noop`. An undecodable slot ends
/// the list; it is reported only when execution reaches it.
pub fn predecode(code: &[u8]) -> Vec<Op> {
    let mut ops = Vec::with_capacity(code.len() / INSTRUCTION_WIDTH);
    let mut pc = 0;
    while pc < code.len() {
        if code[pc] == Opcode::Noop.to_u8() {
            pc += INSTRUCTION_WIDTH;
            continue;
        }
        match decode_at(code, pc) {
            Ok(inst) => {
                pc += inst.width();
                ops.push(Op::Exec(inst));
            }
            Err(SpecError::InvalidOpcode { pc, .. }) => {
                ops.push(Op::Invalid { pc });
                break;
            }
            Err(_) => {
                ops.push(Op::Truncated { pc });
                break;
            }
        }
    }
    ops
}

/// Input and output views of one block
#[derive(Debug)]
pub struct BlockIo<'a, 'b> {
    pub inputs: &'b [ColumnRef<'a>],
    pub output: ColumnMut<'b>,
    /// Set for reduction kernels
    pub accumulate: Option<Accumulate>,
}

/// Run the program over a block of exactly `N` elements. Element-wise
/// loops get `N` as their trip count.
pub fn run_block_fixed<const N: usize>(
    params: &VmParams,
    regs: &mut RegisterFile,
    io: BlockIo<'_, '_>,
) -> Result<()> {
    run::<N>(params, regs, io, N)
}

/// Run the program over a block of `n` elements (`n <= block_size`)
pub fn run_block(
    params: &VmParams,
    regs: &mut RegisterFile,
    io: BlockIo<'_, '_>,
    n: usize,
) -> Result<()> {
    run::<RUNTIME_LEN>(params, regs, io, n)
}

/// Lane count marking a block length known only at run time
const RUNTIME_LEN: usize = 0;

#[inline(always)]
fn run<const N: usize>(params: &VmParams, regs: &mut RegisterFile, io: BlockIo<'_, '_>, n: usize) -> Result<()> {
    let (columns, shadow) = regs.split();
    let mut frame = Frame::<N> {
        inputs: io.inputs,
        output: io.output,
        columns,
        shadow,
        layout: params.layout,
        n,
    };
    let last = params.ops.len().saturating_sub(1);

    for (i, op) in params.ops.iter().enumerate() {
        let inst = match *op {
            Op::Exec(inst) => inst,
            Op::Invalid { pc } | Op::Truncated { pc } => {
                warn!(pc, "invalid opcode");
                return Err(RuntimeError::BadOpcode { pc });
            }
        };

        if params.bounds_check {
            let r = params.register_count();
            let in_range = |reg: &u8| (*reg as usize) < r;
            if !in_range(&inst.dest()) || !inst.sources().iter().all(in_range) {
                warn!(
                    pc = inst.pc,
                    instruction = %fusevm_disassembler::format_instruction(&inst),
                    registers = r,
                    "register operand out of bounds"
                );
                return Err(RuntimeError::BadArgument { pc: inst.pc });
            }
        }

        let accumulate = if inst.opcode.is_reduction() {
            match io.accumulate {
                Some(mode) if i == last => Some(mode),
                _ => {
                    warn!(pc = inst.pc, mnemonic = inst.mnemonic(), "reduction outside final position");
                    return Err(RuntimeError::BadOpcode { pc: inst.pc });
                }
            }
        } else {
            None
        };

        frame.execute(&inst, accumulate).map_err(|e| {
            warn!(
                pc = inst.pc,
                instruction = %fusevm_disassembler::format_instruction(&inst),
                error = %e,
                "instruction failed"
            );
            e
        })?;
    }
    Ok(())
}

/// Element-wise loops. With `N > 0` and operands of exactly `N` elements
/// the loop runs over fixed-size arrays; otherwise it zips the slices.
#[inline(always)]
fn map1<const N: usize, A: Copy, R>(out: &mut [R], a: &[A], op: impl Fn(A) -> R) {
    if N != RUNTIME_LEN {
        if let (Ok(out), Ok(a)) = (<&mut [R; N]>::try_from(&mut *out), <&[A; N]>::try_from(a)) {
            for (o, &a) in out.iter_mut().zip(a) {
                *o = op(a);
            }
            return;
        }
    }
    for (o, &a) in out.iter_mut().zip(a) {
        *o = op(a);
    }
}

#[inline(always)]
fn map2<const N: usize, A: Copy, B: Copy, R>(out: &mut [R], a: &[A], b: &[B], op: impl Fn(A, B) -> R) {
    if N != RUNTIME_LEN {
        if let (Ok(out), Ok(a), Ok(b)) = (
            <&mut [R; N]>::try_from(&mut *out),
            <&[A; N]>::try_from(a),
            <&[B; N]>::try_from(b),
        ) {
            for ((o, &a), &b) in out.iter_mut().zip(a).zip(b) {
                *o = op(a, b);
            }
            return;
        }
    }
    for ((o, &a), &b) in out.iter_mut().zip(a).zip(b) {
        *o = op(a, b);
    }
}

#[inline(always)]
fn map3<const N: usize, C: Copy, A: Copy, B: Copy, R>(
    out: &mut [R],
    c: &[C],
    a: &[A],
    b: &[B],
    op: impl Fn(C, A, B) -> R,
) {
    if N != RUNTIME_LEN {
        if let (Ok(out), Ok(c), Ok(a), Ok(b)) = (
            <&mut [R; N]>::try_from(&mut *out),
            <&[C; N]>::try_from(c),
            <&[A; N]>::try_from(a),
            <&[B; N]>::try_from(b),
        ) {
            for (((o, &c), &a), &b) in out.iter_mut().zip(c).zip(a).zip(b) {
                *o = op(c, a, b);
            }
            return;
        }
    }
    for (((o, &c), &a), &b) in out.iter_mut().zip(c).zip(a).zip(b) {
        *o = op(c, a, b);
    }
}

#[inline(always)]
fn map2_in_place<const N: usize, T: Copy>(acc: &mut [T], a: &[T], op: impl Fn(T, T) -> T) {
    if N != RUNTIME_LEN {
        if let (Ok(acc), Ok(a)) = (<&mut [T; N]>::try_from(&mut *acc), <&[T; N]>::try_from(a)) {
            for (x, &y) in acc.iter_mut().zip(a) {
                *x = op(*x, y);
            }
            return;
        }
    }
    for (x, &y) in acc.iter_mut().zip(a) {
        *x = op(*x, y);
    }
}

/// Mutable state of one block execution
struct Frame<'r, 'a, 'b, const N: usize> {
    inputs: &'b [ColumnRef<'a>],
    output: ColumnMut<'b>,
    columns: &'r mut [Column],
    shadow: &'r mut Column,
    layout: RegisterLayout,
    n: usize,
}

const EMPTY: ColumnRef<'static> = ColumnRef::Bool(&[]);

/// Resolve a source register to a view of at most `n` elements
#[allow(clippy::too_many_arguments)]
fn resolve<'x>(
    reg: u8,
    dest: usize,
    n: usize,
    layout: RegisterLayout,
    inputs: &'x [ColumnRef<'_>],
    output: Option<ColumnRef<'x>>,
    columns: &'x [Column],
    shadow: &'x Column,
) -> Option<ColumnRef<'x>> {
    let reg = reg as usize;
    if reg == dest {
        return Some(shadow.head(n));
    }
    match layout.kind(reg)? {
        RegisterKind::Output => output.map(|o| o.head(n)),
        RegisterKind::Input => inputs.get(reg - 1).map(|i| i.head(n)),
        RegisterKind::Constant | RegisterKind::Temp => columns.get(reg).map(|c| c.head(n)),
    }
}

impl<'r, 'a, 'b, const N: usize> Frame<'r, 'a, 'b, N> {
    /// Split the destination from the sources of `inst` and run `f` over
    /// them. `f` returns `None` when an operand has the wrong type.
    fn apply<F>(&mut self, inst: &Instruction, f: F) -> Result<()>
    where
        F: FnOnce(ColumnMut<'_>, [ColumnRef<'_>; 3]) -> Option<()>,
    {
        let pc = inst.pc;
        let bad = || RuntimeError::BadArgument { pc };
        let dest = inst.dest() as usize;
        let sources = inst.sources();
        let n = self.n;

        let kind = self.layout.kind(dest).ok_or_else(bad)?;
        if !kind.is_writable() || dest >= self.columns.len() {
            return Err(bad());
        }
        let aliased = sources.iter().any(|&s| s as usize == dest);

        let layout = self.layout;
        let Frame {
            inputs,
            output,
            columns,
            shadow,
            ..
        } = self;
        let inputs: &[ColumnRef<'_>] = inputs;

        if dest == 0 {
            if aliased {
                shadow.assign_from(output.as_ref().head(n));
            }
            let mut srcs = [EMPTY; 3];
            for (slot, &reg) in srcs.iter_mut().zip(sources) {
                *slot = resolve(reg, dest, n, layout, inputs, None, columns, shadow).ok_or_else(bad)?;
            }
            return f(output.reborrow().head(n), srcs).ok_or_else(bad);
        }

        let mut target = mem::take(&mut columns[dest]);
        if aliased {
            shadow.assign_from(target.head(n));
        }
        let result = {
            let mut srcs = [EMPTY; 3];
            let mut missing = false;
            for (slot, &reg) in srcs.iter_mut().zip(sources) {
                match resolve(reg, dest, n, layout, inputs, Some(output.as_ref()), columns, shadow) {
                    Some(view) => *slot = view,
                    None => missing = true,
                }
            }
            if missing {
                None
            } else {
                f(target.head_mut(n), srcs)
            }
        };
        columns[dest] = target;
        result.ok_or_else(bad)
    }

    fn unary<A: Element, R: Element>(&mut self, inst: &Instruction, op: impl Fn(A) -> R) -> Result<()> {
        self.apply(inst, |out, src| {
            let a = A::fetch(src[0])?;
            R::store(out, |o| map1::<N, _, _>(o, &a, &op))
        })
    }

    fn binary<A: Element, B: Element, R: Element>(
        &mut self,
        inst: &Instruction,
        op: impl Fn(A, B) -> R,
    ) -> Result<()> {
        self.apply(inst, |out, src| {
            let a = A::fetch(src[0])?;
            let b = B::fetch(src[1])?;
            R::store(out, |o| map2::<N, _, _, _>(o, &a, &b, &op))
        })
    }

    /// `where_*`: select from the second or third operand by a bool mask
    fn select<T: Element>(&mut self, inst: &Instruction) -> Result<()> {
        self.apply(inst, |out, src| {
            let cond = bool::fetch(src[0])?;
            let a = T::fetch(src[1])?;
            let b = T::fetch(src[2])?;
            T::store(out, |o| map3::<N, _, _, _, _>(o, &cond, &a, &b, |c, a, b| if c { a } else { b }))
        })
    }

    /// Call a table function over whole-block slices
    fn call_unary<T: Element>(
        &mut self,
        inst: &Instruction,
        call: fn(u8, &[T], &mut [T]) -> Option<()>,
    ) -> Result<()> {
        let idx = inst.immediate().unwrap_or(u8::MAX);
        self.apply(inst, |out, src| {
            let a = T::fetch(src[0])?;
            T::store(out, |o| call(idx, &a, o))?
        })
    }

    fn call_binary<T: Element>(
        &mut self,
        inst: &Instruction,
        call: fn(u8, &[T], &[T], &mut [T]) -> Option<()>,
    ) -> Result<()> {
        let idx = inst.immediate().unwrap_or(u8::MAX);
        self.apply(inst, |out, src| {
            let a = T::fetch(src[0])?;
            let b = T::fetch(src[1])?;
            T::store(out, |o| call(idx, &a, &b, o))?
        })
    }

    /// Fold the source into the output with `combine`
    fn fold<T: Element>(&mut self, inst: &Instruction, mode: Accumulate, combine: impl Fn(T, T) -> T) -> Result<()> {
        self.apply(inst, |out, src| {
            let a = T::fetch(src[0])?;
            T::store(out, |o| match mode {
                Accumulate::Stride0 => {
                    if let Some(acc) = o.first_mut() {
                        *acc = a.iter().fold(*acc, |x, &y| combine(x, y));
                    }
                }
                Accumulate::Elementwise => map2_in_place::<N, _>(o, &a, &combine),
            })
        })
    }

    fn copy_strings(&mut self, inst: &Instruction) -> Result<()> {
        self.apply(inst, |out, src| match (out, src[0]) {
            (ColumnMut::Str { width: dw, data: dst }, ColumnRef::Str { width: sw, data: s }) => {
                for (d, s) in dst.chunks_exact_mut(dw.max(1)).zip(s.chunks_exact(sw.max(1))) {
                    copy_str(d, s);
                }
                Some(())
            }
            _ => None,
        })
    }

    fn compare_str(&mut self, inst: &Instruction, test: fn(i32) -> bool) -> Result<()> {
        self.apply(inst, |out, src| {
            let (
                ColumnRef::Str { width: aw, data: a },
                ColumnRef::Str { width: bw, data: b },
            ) = (src[0], src[1])
            else {
                return None;
            };
            bool::store(out, |o| {
                let pairs = a.chunks_exact(aw.max(1)).zip(b.chunks_exact(bw.max(1)));
                for (o, (x, y)) in o.iter_mut().zip(pairs) {
                    *o = test(stringcmp(x, y));
                }
            })
        })
    }

    fn execute(&mut self, inst: &Instruction, accumulate: Option<Accumulate>) -> Result<()> {
        use Opcode::*;

        match inst.opcode {
            Noop => Ok(()),

            // ========== Bool ==========
            CopyBB => self.unary::<bool, bool>(inst, |a| a),
            InvertBB => self.unary::<bool, bool>(inst, |a| !a),
            AndBBB => self.binary::<bool, bool, bool>(inst, |a, b| a & b),
            OrBBB => self.binary::<bool, bool, bool>(inst, |a, b| a | b),
            EqBBB => self.binary::<bool, bool, bool>(inst, |a, b| a == b),
            NeBBB => self.binary::<bool, bool, bool>(inst, |a, b| a != b),

            // ========== Comparisons ==========
            GtBII => self.binary::<i32, i32, bool>(inst, |a, b| a > b),
            GeBII => self.binary::<i32, i32, bool>(inst, |a, b| a >= b),
            EqBII => self.binary::<i32, i32, bool>(inst, |a, b| a == b),
            NeBII => self.binary::<i32, i32, bool>(inst, |a, b| a != b),
            GtBLL => self.binary::<i64, i64, bool>(inst, |a, b| a > b),
            GeBLL => self.binary::<i64, i64, bool>(inst, |a, b| a >= b),
            EqBLL => self.binary::<i64, i64, bool>(inst, |a, b| a == b),
            NeBLL => self.binary::<i64, i64, bool>(inst, |a, b| a != b),
            GtBFF => self.binary::<f32, f32, bool>(inst, |a, b| a > b),
            GeBFF => self.binary::<f32, f32, bool>(inst, |a, b| a >= b),
            EqBFF => self.binary::<f32, f32, bool>(inst, |a, b| a == b),
            NeBFF => self.binary::<f32, f32, bool>(inst, |a, b| a != b),
            GtBDD => self.binary::<f64, f64, bool>(inst, |a, b| a > b),
            GeBDD => self.binary::<f64, f64, bool>(inst, |a, b| a >= b),
            EqBDD => self.binary::<f64, f64, bool>(inst, |a, b| a == b),
            NeBDD => self.binary::<f64, f64, bool>(inst, |a, b| a != b),
            GtBSS => self.compare_str(inst, |c| c > 0),
            GeBSS => self.compare_str(inst, |c| c >= 0),
            EqBSS => self.compare_str(inst, |c| c == 0),
            NeBSS => self.compare_str(inst, |c| c != 0),

            // ========== Int32 ==========
            CastIB => self.unary::<bool, i32>(inst, i32::from),
            CopyII => self.unary::<i32, i32>(inst, |a| a),
            OnesLikeII => self.unary::<i32, i32>(inst, |_| 1),
            NegII => self.unary::<i32, i32>(inst, i32::wrapping_neg),
            AddIII => self.binary::<i32, i32, i32>(inst, i32::wrapping_add),
            SubIII => self.binary::<i32, i32, i32>(inst, i32::wrapping_sub),
            MulIII => self.binary::<i32, i32, i32>(inst, i32::wrapping_mul),
            DivIII => self.binary::<i32, i32, i32>(inst, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
            PowIII => self.binary::<i32, i32, i32>(inst, |a, b| ipow(a as i64, b as i64) as i32),
            ModIII => self.binary::<i32, i32, i32>(inst, |a, b| imod(a as i64, b as i64) as i32),
            WhereIBII => self.select::<i32>(inst),

            // ========== Int64 ==========
            CastLI => self.unary::<i32, i64>(inst, i64::from),
            CopyLL => self.unary::<i64, i64>(inst, |a| a),
            OnesLikeLL => self.unary::<i64, i64>(inst, |_| 1),
            NegLL => self.unary::<i64, i64>(inst, i64::wrapping_neg),
            AddLLL => self.binary::<i64, i64, i64>(inst, i64::wrapping_add),
            SubLLL => self.binary::<i64, i64, i64>(inst, i64::wrapping_sub),
            MulLLL => self.binary::<i64, i64, i64>(inst, i64::wrapping_mul),
            DivLLL => self.binary::<i64, i64, i64>(inst, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
            PowLLL => self.binary::<i64, i64, i64>(inst, ipow),
            ModLLL => self.binary::<i64, i64, i64>(inst, imod),
            WhereLBLL => self.select::<i64>(inst),

            // ========== Float32 ==========
            CastFI => self.unary::<i32, f32>(inst, |a| a as f32),
            CastFL => self.unary::<i64, f32>(inst, |a| a as f32),
            CopyFF => self.unary::<f32, f32>(inst, |a| a),
            OnesLikeFF => self.unary::<f32, f32>(inst, |_| 1.0),
            NegFF => self.unary::<f32, f32>(inst, |a| -a),
            AddFFF => self.binary::<f32, f32, f32>(inst, |a, b| a + b),
            SubFFF => self.binary::<f32, f32, f32>(inst, |a, b| a - b),
            MulFFF => self.binary::<f32, f32, f32>(inst, |a, b| a * b),
            DivFFF => self.binary::<f32, f32, f32>(inst, |a, b| a / b),
            PowFFF => self.binary::<f32, f32, f32>(inst, f32::powf),
            ModFFF => self.binary::<f32, f32, f32>(inst, |a, b| a - (a / b).floor() * b),
            SqrtFF => self.unary::<f32, f32>(inst, f32::sqrt),
            WhereFBFF => self.select::<f32>(inst),
            FuncFFN => self.call_unary::<f32>(inst, dispatch::call_ff),
            FuncFFFN => self.call_binary::<f32>(inst, dispatch::call_fff),

            // ========== Float64 ==========
            CastDI => self.unary::<i32, f64>(inst, f64::from),
            CastDL => self.unary::<i64, f64>(inst, |a| a as f64),
            CastDF => self.unary::<f32, f64>(inst, f64::from),
            CopyDD => self.unary::<f64, f64>(inst, |a| a),
            OnesLikeDD => self.unary::<f64, f64>(inst, |_| 1.0),
            NegDD => self.unary::<f64, f64>(inst, |a| -a),
            AddDDD => self.binary::<f64, f64, f64>(inst, |a, b| a + b),
            SubDDD => self.binary::<f64, f64, f64>(inst, |a, b| a - b),
            MulDDD => self.binary::<f64, f64, f64>(inst, |a, b| a * b),
            DivDDD => self.binary::<f64, f64, f64>(inst, |a, b| a / b),
            PowDDD => self.binary::<f64, f64, f64>(inst, f64::powf),
            ModDDD => self.binary::<f64, f64, f64>(inst, |a, b| a - (a / b).floor() * b),
            SqrtDD => self.unary::<f64, f64>(inst, f64::sqrt),
            WhereDBDD => self.select::<f64>(inst),
            FuncDDN => self.call_unary::<f64>(inst, dispatch::call_dd),
            FuncDDDN => self.call_binary::<f64>(inst, dispatch::call_ddd),

            // ========== Complex ==========
            EqBCC => self.binary::<Complex64, Complex64, bool>(inst, |a, b| a == b),
            NeBCC => self.binary::<Complex64, Complex64, bool>(inst, |a, b| a != b),
            CastCI => self.unary::<i32, Complex64>(inst, |a| Complex64::new(a as f64, 0.0)),
            CastCL => self.unary::<i64, Complex64>(inst, |a| Complex64::new(a as f64, 0.0)),
            CastCF => self.unary::<f32, Complex64>(inst, |a| Complex64::new(a as f64, 0.0)),
            CastCD => self.unary::<f64, Complex64>(inst, |a| Complex64::new(a, 0.0)),
            OnesLikeCC => self.unary::<Complex64, Complex64>(inst, |_| Complex64::new(1.0, 0.0)),
            CopyCC => self.unary::<Complex64, Complex64>(inst, |a| a),
            NegCC => self.unary::<Complex64, Complex64>(inst, |a| -a),
            AddCCC => self.binary::<Complex64, Complex64, Complex64>(inst, |a, b| a + b),
            SubCCC => self.binary::<Complex64, Complex64, Complex64>(inst, |a, b| a - b),
            MulCCC => self.binary::<Complex64, Complex64, Complex64>(inst, |a, b| a * b),
            DivCCC => self.binary::<Complex64, Complex64, Complex64>(inst, |a, b| a / b),
            WhereCBCC => self.select::<Complex64>(inst),
            FuncCCN => self.call_unary::<Complex64>(inst, dispatch::call_cc),
            FuncCCCN => self.call_binary::<Complex64>(inst, dispatch::call_ccc),
            RealDC => self.unary::<Complex64, f64>(inst, |a| a.re),
            ImagDC => self.unary::<Complex64, f64>(inst, |a| a.im),
            ComplexCDD => self.binary::<f64, f64, Complex64>(inst, Complex64::new),

            // ========== String ==========
            CopySS => self.copy_strings(inst),

            // ========== Reductions ==========
            SumIIN | SumLLN | SumFFN | SumDDN | SumCCN | ProdIIN | ProdLLN | ProdFFN | ProdDDN
            | ProdCCN | MinIIN | MinLLN | MinFFN | MinDDN | MaxIIN | MaxLLN | MaxFFN | MaxDDN => {
                let mode = accumulate.ok_or(RuntimeError::BadOpcode { pc: inst.pc })?;
                self.reduce(inst, mode)
            }
        }
    }

    fn reduce(&mut self, inst: &Instruction, mode: Accumulate) -> Result<()> {
        use Opcode::*;

        match inst.opcode {
            SumIIN => self.fold::<i32>(inst, mode, i32::wrapping_add),
            SumLLN => self.fold::<i64>(inst, mode, i64::wrapping_add),
            SumFFN => self.fold::<f32>(inst, mode, |a, b| a + b),
            SumDDN => self.fold::<f64>(inst, mode, |a, b| a + b),
            SumCCN => self.fold::<Complex64>(inst, mode, |a, b| a + b),
            ProdIIN => self.fold::<i32>(inst, mode, i32::wrapping_mul),
            ProdLLN => self.fold::<i64>(inst, mode, i64::wrapping_mul),
            ProdFFN => self.fold::<f32>(inst, mode, |a, b| a * b),
            ProdDDN => self.fold::<f64>(inst, mode, |a, b| a * b),
            ProdCCN => self.fold::<Complex64>(inst, mode, |a, b| a * b),
            MinIIN => self.fold::<i32>(inst, mode, Ord::min),
            MinLLN => self.fold::<i64>(inst, mode, Ord::min),
            MinFFN => self.fold::<f32>(inst, mode, nan_min),
            MinDDN => self.fold::<f64>(inst, mode, nan_min),
            MaxIIN => self.fold::<i32>(inst, mode, Ord::max),
            MaxLLN => self.fold::<i64>(inst, mode, Ord::max),
            MaxFFN => self.fold::<f32>(inst, mode, nan_max),
            MaxDDN => self.fold::<f64>(inst, mode, nan_max),
            _ => Err(RuntimeError::BadOpcode { pc: inst.pc }),
        }
    }
}

#[inline]
fn is_nan<T: PartialOrd>(x: &T) -> bool {
    x.partial_cmp(x).is_none()
}

/// Minimum that propagates NaN from either side
#[inline]
fn nan_min<T: PartialOrd + Copy>(a: T, b: T) -> T {
    if is_nan(&a) {
        a
    } else if is_nan(&b) || b < a {
        b
    } else {
        a
    }
}

#[inline]
fn nan_max<T: PartialOrd + Copy>(a: T, b: T) -> T {
    if is_nan(&a) {
        a
    } else if is_nan(&b) || b > a {
        b
    } else {
        a
    }
}

/// Integer power. Negative exponents truncate toward zero, so only bases
/// of magnitude one give a nonzero result.
fn ipow(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        return match base {
            1 => 1,
            -1 if exp % 2 == 0 => 1,
            -1 => -1,
            _ => 0,
        };
    }
    let mut result: i64 = 1;
    let mut base = base;
    let mut exp = exp as u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    result
}

/// Floored modulo: the result takes the sign of the divisor; zero divisor
/// gives 0
fn imod(a: i64, b: i64) -> i64 {
    if b == 0 {
        return 0;
    }
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

/// Compare two NUL-padded strings as if both had the longer width.
/// Bytes compare as unsigned values, so `0x80` sorts after `b'a'`.
/// Returns -1, 0 or 1.
pub fn stringcmp(a: &[u8], b: &[u8]) -> i32 {
    let width = a.len().max(b.len());
    for i in 0..width {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return if x < y { -1 } else { 1 };
        }
    }
    0
}

/// Starting value of a reduction accumulator
pub fn identity(op: ReduceOp, code: TypeCode) -> Option<Constant> {
    use TypeCode::*;

    Some(match (op, code) {
        (ReduceOp::Sum, Int) => Constant::Int(0),
        (ReduceOp::Sum, Long) => Constant::Long(0),
        (ReduceOp::Sum, Float) => Constant::Float(0.0),
        (ReduceOp::Sum, Double) => Constant::Double(0.0),
        (ReduceOp::Sum, Complex) => Constant::Complex(0.0, 0.0),
        (ReduceOp::Prod, Int) => Constant::Int(1),
        (ReduceOp::Prod, Long) => Constant::Long(1),
        (ReduceOp::Prod, Float) => Constant::Float(1.0),
        (ReduceOp::Prod, Double) => Constant::Double(1.0),
        (ReduceOp::Prod, Complex) => Constant::Complex(1.0, 0.0),
        (ReduceOp::Min, Int) => Constant::Int(i32::MAX),
        (ReduceOp::Min, Long) => Constant::Long(i64::MAX),
        (ReduceOp::Min, Float) => Constant::Float(f32::INFINITY),
        (ReduceOp::Min, Double) => Constant::Double(f64::INFINITY),
        (ReduceOp::Max, Int) => Constant::Int(i32::MIN),
        (ReduceOp::Max, Long) => Constant::Long(i64::MIN),
        (ReduceOp::Max, Float) => Constant::Float(f32::NEG_INFINITY),
        (ReduceOp::Max, Double) => Constant::Double(f64::NEG_INFINITY),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusevm_spec::instruction::encode_into;

    fn program(insts: &[(Opcode, &[u8])]) -> Vec<u8> {
        let mut code = Vec::new();
        for (op, args) in insts {
            encode_into(*op, args, &mut code);
        }
        code
    }

    fn setup(code: Vec<u8>, full: &str, inputs: &str, constants: Vec<Constant>, n: usize) -> (VmParams, RegisterFile) {
        let kernel = Kernel::new(code, full, inputs, constants).unwrap();
        let params = VmParams::new(&kernel, n, true, &[]);
        let regs = RegisterFile::new(&kernel, params.string_widths(), n).unwrap();
        (params, regs)
    }

    #[test]
    fn test_add_mul_chain() {
        // out = (a + b) * 2
        let code = program(&[
            (Opcode::AddDDD, &[4, 1, 2]),
            (Opcode::MulDDD, &[0, 4, 3]),
        ]);
        let (params, mut regs) = setup(code, "ddddd", "dd", vec![Constant::Double(2.0)], 3);

        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        let mut out = [0.0; 3];
        let inputs = [ColumnRef::Double(&a), ColumnRef::Double(&b)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        run_block_fixed::<3>(&params, &mut regs, io).unwrap();
        assert_eq!(out, [22.0, 44.0, 66.0]);
    }

    #[test]
    fn test_dest_aliases_source() {
        // t = a; t = t * t; out = t + t
        let code = program(&[
            (Opcode::CopyDD, &[2, 1]),
            (Opcode::MulDDD, &[2, 2, 2]),
            (Opcode::AddDDD, &[0, 2, 2]),
        ]);
        let (params, mut regs) = setup(code, "ddd", "d", vec![], 2);
        let a = [3.0, -4.0];
        let mut out = [0.0; 2];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        run_block(&params, &mut regs, io, 2).unwrap();
        assert_eq!(out, [18.0, 32.0]);
    }

    #[test]
    fn test_bounds_check_reports_pc() {
        let code = program(&[
            (Opcode::CopyDD, &[2, 1]),
            (Opcode::AddDDD, &[0, 2, 9]),
        ]);
        let (params, mut regs) = setup(code, "ddd", "d", vec![], 1);
        let a = [1.0];
        let mut out = [0.0];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        let err = run_block(&params, &mut regs, io, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::BadArgument { pc: 4 }));
    }

    #[test]
    fn test_unchecked_out_of_range_is_still_reported() {
        let code = program(&[(Opcode::AddDDD, &[0, 1, 200])]);
        let kernel = Kernel::new(code, "dd", "d", vec![]).unwrap();
        let params = VmParams::new(&kernel, 1, false, &[]);
        let mut regs = RegisterFile::new(&kernel, params.string_widths(), 1).unwrap();
        let a = [1.0];
        let mut out = [0.0];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        let err = run_block(&params, &mut regs, io, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::BadArgument { pc: 0 }));
        assert_eq!(out, [0.0]);
    }

    #[test]
    fn test_bad_opcode_after_valid_instructions() {
        let mut code = program(&[(Opcode::CopyDD, &[0, 1])]);
        code.extend_from_slice(&[250, 0, 0, 0]);
        let (params, mut regs) = setup(code, "dd", "d", vec![], 1);
        let a = [5.0];
        let mut out = [0.0];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        let err = run_block(&params, &mut regs, io, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::BadOpcode { pc: 4 }));
        assert_eq!(out, [5.0]);
    }

    #[test]
    fn test_write_to_input_rejected() {
        let code = program(&[(Opcode::CopyDD, &[1, 1])]);
        let (params, mut regs) = setup(code, "dd", "d", vec![], 1);
        let a = [5.0];
        let mut out = [0.0];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        assert!(run_block(&params, &mut regs, io, 1).is_err());
    }

    #[test]
    fn test_integer_semantics() {
        assert_eq!(imod(-7, 3), 2);
        assert_eq!(imod(7, -3), -2);
        assert_eq!(imod(7, 0), 0);
        assert_eq!(ipow(2, 10), 1024);
        assert_eq!(ipow(2, -1), 0);
        assert_eq!(ipow(-1, -3), -1);
        assert_eq!(ipow(-1, -2), 1);
        assert_eq!(ipow(1, -5), 1);
        assert_eq!(ipow(0, 0), 1);
    }

    #[test]
    fn test_int_div_by_zero_and_overflow() {
        let code = program(&[(Opcode::DivIII, &[0, 1, 2])]);
        let (params, mut regs) = setup(code, "iii", "ii", vec![], 3);
        let a = [7, i32::MIN, 9];
        let b = [0, -1, 2];
        let mut out = [99; 3];
        let inputs = [ColumnRef::Int(&a), ColumnRef::Int(&b)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Int(&mut out),
            accumulate: None,
        };
        run_block(&params, &mut regs, io, 3).unwrap();
        assert_eq!(out, [0, i32::MIN, 4]);
    }

    #[test]
    fn test_int_long_interchangeable() {
        // int64 register holding data read by an int32 opcode
        let code = program(&[(Opcode::AddIII, &[0, 1, 1])]);
        let (params, mut regs) = setup(code, "ll", "l", vec![], 2);
        let a = [3i64, -4];
        let mut out = [0i64; 2];
        let inputs = [ColumnRef::Long(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Long(&mut out),
            accumulate: None,
        };
        run_block(&params, &mut regs, io, 2).unwrap();
        assert_eq!(out, [6, -8]);
    }

    #[test]
    fn test_where_and_compare() {
        let code = program(&[
            (Opcode::GtBDD, &[3, 1, 2]),
            (Opcode::WhereDBDD, &[0, 3, 1, 2]),
        ]);
        let (params, mut regs) = setup(code, "dddb", "dd", vec![], 3);
        let a = [1.0, 5.0, 3.0];
        let b = [2.0, 4.0, 3.0];
        let mut out = [0.0; 3];
        let inputs = [ColumnRef::Double(&a), ColumnRef::Double(&b)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        run_block(&params, &mut regs, io, 3).unwrap();
        assert_eq!(out, [2.0, 5.0, 3.0]);
    }

    #[test]
    fn test_function_call() {
        let sqrt = fusevm_spec::FuncFamily::DD.index_of("sqrt").unwrap();
        let code = program(&[(Opcode::FuncDDN, &[0, 1, sqrt])]);
        let (params, mut regs) = setup(code, "dd", "d", vec![], 2);
        let a = [4.0, 25.0];
        let mut out = [0.0; 2];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        run_block(&params, &mut regs, io, 2).unwrap();
        assert_eq!(out, [2.0, 5.0]);
    }

    #[test]
    fn test_stringcmp() {
        assert_eq!(stringcmp(b"ab", b"abc"), -1);
        assert_eq!(stringcmp(b"abc", b"ab"), 1);
        assert_eq!(stringcmp(b"ab\0", b"ab"), 0);
        assert_eq!(stringcmp(b"b", b"abc"), 1);
        // unsigned bytes
        assert_eq!(stringcmp(&[0x80], b"a"), 1);
        assert_eq!(stringcmp(b"a", &[0xff, 0]), -1);
    }

    #[test]
    fn test_string_compare_opcode() {
        let code = program(&[(Opcode::EqBSS, &[0, 1, 2])]);
        let (params, mut regs) = setup(code, "bss", "ss", vec![], 2);
        let a = Column::strings(&["ab", "xy"], 2);
        let b = Column::strings(&["ab", "xyz"], 3);
        let mut out = [false; 2];
        let inputs = [a.view(), b.view()];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Bool(&mut out),
            accumulate: None,
        };
        run_block(&params, &mut regs, io, 2).unwrap();
        assert_eq!(out, [true, false]);
    }

    #[test]
    fn test_reduction_stride0_and_elementwise() {
        let code = program(&[(Opcode::SumDDN, &[0, 1, 255])]);
        let (params, mut regs) = setup(code, "dd", "d", vec![], 4);
        let a = [1.0, 2.0, 3.0, 4.0];
        let inputs = [ColumnRef::Double(&a)];

        let mut acc = [10.0];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut acc),
            accumulate: Some(Accumulate::Stride0),
        };
        run_block(&params, &mut regs, io, 4).unwrap();
        assert_eq!(acc, [20.0]);

        let mut acc = [1.0; 4];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut acc),
            accumulate: Some(Accumulate::Elementwise),
        };
        run_block(&params, &mut regs, io, 4).unwrap();
        assert_eq!(acc, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_fixed_block_matches_runtime_block() {
        // out = where(a > b, a * 2, b)
        let code = program(&[
            (Opcode::GtBDD, &[4, 1, 2]),
            (Opcode::MulDDD, &[5, 1, 3]),
            (Opcode::WhereDBDD, &[0, 4, 5, 2]),
        ]);
        let (params, mut regs) = setup(code, "ddddbd", "dd", vec![Constant::Double(2.0)], 4);
        let a = [1.0, 5.0, -2.0, 8.0];
        let b = [3.0, 4.0, -3.0, 8.0];
        let inputs = [ColumnRef::Double(&a), ColumnRef::Double(&b)];

        let mut fixed = [0.0; 4];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut fixed),
            accumulate: None,
        };
        run_block_fixed::<4>(&params, &mut regs, io).unwrap();

        let mut dynamic = [0.0; 4];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut dynamic),
            accumulate: None,
        };
        run_block(&params, &mut regs, io, 4).unwrap();

        assert_eq!(fixed, [3.0, 10.0, -4.0, 8.0]);
        assert_eq!(fixed, dynamic);
    }

    #[test]
    fn test_fixed_block_elementwise_accumulate() {
        let code = program(&[(Opcode::ProdDDN, &[0, 1, 0])]);
        let (params, mut regs) = setup(code, "dd", "d", vec![], 4);
        let a = [1.0, 2.0, 3.0, 4.0];
        let inputs = [ColumnRef::Double(&a)];
        let mut acc = [2.0; 4];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut acc),
            accumulate: Some(Accumulate::Elementwise),
        };
        run_block_fixed::<4>(&params, &mut regs, io).unwrap();
        assert_eq!(acc, [2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_reduction_without_accumulate_mode() {
        let code = program(&[(Opcode::SumDDN, &[0, 1, 255])]);
        let (params, mut regs) = setup(code, "dd", "d", vec![], 1);
        let a = [1.0];
        let mut out = [0.0];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut out),
            accumulate: None,
        };
        let err = run_block(&params, &mut regs, io, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::BadOpcode { pc: 0 }));
    }

    #[test]
    fn test_min_max_propagate_nan() {
        let code = program(&[(Opcode::MaxDDN, &[0, 1, 255])]);
        let (params, mut regs) = setup(code, "dd", "d", vec![], 3);
        let a = [1.0, f64::NAN, 3.0];
        let mut acc = [f64::NEG_INFINITY];
        let inputs = [ColumnRef::Double(&a)];
        let io = BlockIo {
            inputs: &inputs,
            output: ColumnMut::Double(&mut acc),
            accumulate: Some(Accumulate::Stride0),
        };
        run_block(&params, &mut regs, io, 3).unwrap();
        assert!(acc[0].is_nan());
    }

    #[test]
    fn test_identities() {
        assert_eq!(identity(ReduceOp::Sum, TypeCode::Double), Some(Constant::Double(0.0)));
        assert_eq!(identity(ReduceOp::Prod, TypeCode::Int), Some(Constant::Int(1)));
        assert_eq!(identity(ReduceOp::Min, TypeCode::Long), Some(Constant::Long(i64::MAX)));
        assert_eq!(identity(ReduceOp::Max, TypeCode::Complex), None);
    }

    #[test]
    fn test_predecode_skips_noops() {
        let mut code = vec![0, 0, 0, 0];
        encode_into(Opcode::FuncDDDN, &[0, 1, 2, 1], &mut code);
        let ops = predecode(&code);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], Op::Exec(inst) if inst.pc == 4 && inst.operands[3] == 1));

        let ops = predecode(&[Opcode::FuncDDDN.to_u8(), 0, 1, 2]);
        assert_eq!(ops, vec![Op::Truncated { pc: 0 }]);
    }
}
