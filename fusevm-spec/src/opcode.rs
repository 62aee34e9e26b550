//! # FuseVM Opcode Table
//!
//! Every opcode is described exactly once, in [`OPCODE_TABLE`]: mnemonic,
//! return type and up to three argument kinds. Everything else (arity,
//! instruction width, reduction membership, validator rules) is derived from
//! that table.
//!
//! ## Opcode Layout
//!
//! - 0x00: noop
//! - 0x01-0x1A: bool ops and comparisons (`gt`, `ge`, `eq`, `ne`)
//! - 0x1B-0x30: int32 / int64 arithmetic
//! - 0x31-0x4F: float32 / float64 arithmetic and function calls
//! - 0x50-0x63: complex arithmetic, `real`, `imag`, `complex`, `copy_ss`
//! - 0x64-0x75: reductions (sum, prod, min, max)
//!
//! Mnemonic suffixes spell the signature: return type first, then arguments,
//! `n` for an untyped immediate (function index or reduction axis).

use crate::types::{ArgKind, TypeCode};
use serde::{Deserialize, Serialize};
use std::fmt;

const X: ArgKind = ArgKind::None;
const N: ArgKind = ArgKind::Index;
const B: ArgKind = ArgKind::Reg(TypeCode::Bool);
const I: ArgKind = ArgKind::Reg(TypeCode::Int);
const L: ArgKind = ArgKind::Reg(TypeCode::Long);
const F: ArgKind = ArgKind::Reg(TypeCode::Float);
const D: ArgKind = ArgKind::Reg(TypeCode::Double);
const C: ArgKind = ArgKind::Reg(TypeCode::Complex);
const S: ArgKind = ArgKind::Reg(TypeCode::Str);

/// Static description of one opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    /// Kind of the destination operand
    pub ret: ArgKind,
    /// Kinds of the source operands
    pub args: [ArgKind; 3],
}

impl OpcodeInfo {
    /// Operand kinds in encoding order: destination first, then sources
    pub fn operands(&self) -> impl Iterator<Item = ArgKind> + '_ {
        std::iter::once(self.ret)
            .chain(self.args.iter().copied())
            .take_while(|k| !k.is_none())
    }

    /// Number of operand bytes (destination included)
    pub fn operand_count(&self) -> usize {
        self.operands().count()
    }

    /// Instructions with four operands spill into a second slot
    pub fn is_double_width(&self) -> bool {
        self.operand_count() > 3
    }

    /// Full signature string, e.g. `"dddn"` for `func_dddn`
    pub fn signature(&self) -> String {
        self.operands().map(ArgKind::to_char).collect()
    }
}

macro_rules! define_opcodes {
    ($($variant:ident = $code:literal, $name:literal, $ret:expr, [$a1:expr, $a2:expr, $a3:expr];)+) => {
        /// Instruction opcode (one byte)
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Opcode {
            $($variant = $code,)+
        }

        /// The opcode table, indexed by opcode byte
        pub static OPCODE_TABLE: &[OpcodeInfo] = &[
            $(OpcodeInfo {
                opcode: Opcode::$variant,
                mnemonic: $name,
                ret: $ret,
                args: [$a1, $a2, $a3],
            },)+
        ];
    };
}

define_opcodes! {
    Noop = 0, "noop", X, [X, X, X];

    // ========== Bool ==========
    CopyBB = 1, "copy_bb", B, [B, X, X];
    InvertBB = 2, "invert_bb", B, [B, X, X];
    AndBBB = 3, "and_bbb", B, [B, B, X];
    OrBBB = 4, "or_bbb", B, [B, B, X];
    EqBBB = 5, "eq_bbb", B, [B, B, X];
    NeBBB = 6, "ne_bbb", B, [B, B, X];

    // ========== Comparisons ==========
    GtBII = 7, "gt_bii", B, [I, I, X];
    GeBII = 8, "ge_bii", B, [I, I, X];
    EqBII = 9, "eq_bii", B, [I, I, X];
    NeBII = 10, "ne_bii", B, [I, I, X];
    GtBLL = 11, "gt_bll", B, [L, L, X];
    GeBLL = 12, "ge_bll", B, [L, L, X];
    EqBLL = 13, "eq_bll", B, [L, L, X];
    NeBLL = 14, "ne_bll", B, [L, L, X];
    GtBFF = 15, "gt_bff", B, [F, F, X];
    GeBFF = 16, "ge_bff", B, [F, F, X];
    EqBFF = 17, "eq_bff", B, [F, F, X];
    NeBFF = 18, "ne_bff", B, [F, F, X];
    GtBDD = 19, "gt_bdd", B, [D, D, X];
    GeBDD = 20, "ge_bdd", B, [D, D, X];
    EqBDD = 21, "eq_bdd", B, [D, D, X];
    NeBDD = 22, "ne_bdd", B, [D, D, X];
    GtBSS = 23, "gt_bss", B, [S, S, X];
    GeBSS = 24, "ge_bss", B, [S, S, X];
    EqBSS = 25, "eq_bss", B, [S, S, X];
    NeBSS = 26, "ne_bss", B, [S, S, X];

    // ========== Int32 ==========
    CastIB = 27, "cast_ib", I, [B, X, X];
    CopyII = 28, "copy_ii", I, [I, X, X];
    OnesLikeII = 29, "ones_like_ii", I, [I, X, X];
    NegII = 30, "neg_ii", I, [I, X, X];
    AddIII = 31, "add_iii", I, [I, I, X];
    SubIII = 32, "sub_iii", I, [I, I, X];
    MulIII = 33, "mul_iii", I, [I, I, X];
    DivIII = 34, "div_iii", I, [I, I, X];
    PowIII = 35, "pow_iii", I, [I, I, X];
    ModIII = 36, "mod_iii", I, [I, I, X];
    WhereIBII = 37, "where_ibii", I, [B, I, I];

    // ========== Int64 ==========
    CastLI = 38, "cast_li", L, [I, X, X];
    CopyLL = 39, "copy_ll", L, [L, X, X];
    OnesLikeLL = 40, "ones_like_ll", L, [L, X, X];
    NegLL = 41, "neg_ll", L, [L, X, X];
    AddLLL = 42, "add_lll", L, [L, L, X];
    SubLLL = 43, "sub_lll", L, [L, L, X];
    MulLLL = 44, "mul_lll", L, [L, L, X];
    DivLLL = 45, "div_lll", L, [L, L, X];
    PowLLL = 46, "pow_lll", L, [L, L, X];
    ModLLL = 47, "mod_lll", L, [L, L, X];
    WhereLBLL = 48, "where_lbll", L, [B, L, L];

    // ========== Float32 ==========
    CastFI = 49, "cast_fi", F, [I, X, X];
    CastFL = 50, "cast_fl", F, [L, X, X];
    CopyFF = 51, "copy_ff", F, [F, X, X];
    OnesLikeFF = 52, "ones_like_ff", F, [F, X, X];
    NegFF = 53, "neg_ff", F, [F, X, X];
    AddFFF = 54, "add_fff", F, [F, F, X];
    SubFFF = 55, "sub_fff", F, [F, F, X];
    MulFFF = 56, "mul_fff", F, [F, F, X];
    DivFFF = 57, "div_fff", F, [F, F, X];
    PowFFF = 58, "pow_fff", F, [F, F, X];
    ModFFF = 59, "mod_fff", F, [F, F, X];
    SqrtFF = 60, "sqrt_ff", F, [F, X, X];
    WhereFBFF = 61, "where_fbff", F, [B, F, F];
    FuncFFN = 62, "func_ffn", F, [F, N, X];
    FuncFFFN = 63, "func_fffn", F, [F, F, N];

    // ========== Float64 ==========
    CastDI = 64, "cast_di", D, [I, X, X];
    CastDL = 65, "cast_dl", D, [L, X, X];
    CastDF = 66, "cast_df", D, [F, X, X];
    CopyDD = 67, "copy_dd", D, [D, X, X];
    OnesLikeDD = 68, "ones_like_dd", D, [D, X, X];
    NegDD = 69, "neg_dd", D, [D, X, X];
    AddDDD = 70, "add_ddd", D, [D, D, X];
    SubDDD = 71, "sub_ddd", D, [D, D, X];
    MulDDD = 72, "mul_ddd", D, [D, D, X];
    DivDDD = 73, "div_ddd", D, [D, D, X];
    PowDDD = 74, "pow_ddd", D, [D, D, X];
    ModDDD = 75, "mod_ddd", D, [D, D, X];
    SqrtDD = 76, "sqrt_dd", D, [D, X, X];
    WhereDBDD = 77, "where_dbdd", D, [B, D, D];
    FuncDDN = 78, "func_ddn", D, [D, N, X];
    FuncDDDN = 79, "func_dddn", D, [D, D, N];

    // ========== Complex ==========
    EqBCC = 80, "eq_bcc", B, [C, C, X];
    NeBCC = 81, "ne_bcc", B, [C, C, X];
    CastCI = 82, "cast_ci", C, [I, X, X];
    CastCL = 83, "cast_cl", C, [L, X, X];
    CastCF = 84, "cast_cf", C, [F, X, X];
    CastCD = 85, "cast_cd", C, [D, X, X];
    OnesLikeCC = 86, "ones_like_cc", C, [C, X, X];
    CopyCC = 87, "copy_cc", C, [C, X, X];
    NegCC = 88, "neg_cc", C, [C, X, X];
    AddCCC = 89, "add_ccc", C, [C, C, X];
    SubCCC = 90, "sub_ccc", C, [C, C, X];
    MulCCC = 91, "mul_ccc", C, [C, C, X];
    DivCCC = 92, "div_ccc", C, [C, C, X];
    WhereCBCC = 93, "where_cbcc", C, [B, C, C];
    FuncCCN = 94, "func_ccn", C, [C, N, X];
    FuncCCCN = 95, "func_cccn", C, [C, C, N];
    RealDC = 96, "real_dc", D, [C, X, X];
    ImagDC = 97, "imag_dc", D, [C, X, X];
    ComplexCDD = 98, "complex_cdd", C, [D, D, X];

    // ========== String ==========
    CopySS = 99, "copy_ss", S, [S, X, X];

    // ========== Reductions (final instruction only) ==========
    SumIIN = 100, "sum_iin", I, [I, N, X];
    SumLLN = 101, "sum_lln", L, [L, N, X];
    SumFFN = 102, "sum_ffn", F, [F, N, X];
    SumDDN = 103, "sum_ddn", D, [D, N, X];
    SumCCN = 104, "sum_ccn", C, [C, N, X];
    ProdIIN = 105, "prod_iin", I, [I, N, X];
    ProdLLN = 106, "prod_lln", L, [L, N, X];
    ProdFFN = 107, "prod_ffn", F, [F, N, X];
    ProdDDN = 108, "prod_ddn", D, [D, N, X];
    ProdCCN = 109, "prod_ccn", C, [C, N, X];
    MinIIN = 110, "min_iin", I, [I, N, X];
    MinLLN = 111, "min_lln", L, [L, N, X];
    MinFFN = 112, "min_ffn", F, [F, N, X];
    MinDDN = 113, "min_ddn", D, [D, N, X];
    MaxIIN = 114, "max_iin", I, [I, N, X];
    MaxLLN = 115, "max_lln", L, [L, N, X];
    MaxFFN = 116, "max_ffn", F, [F, N, X];
    MaxDDN = 117, "max_ddn", D, [D, N, X];
}

/// Reduction family of a reduction opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

impl Opcode {
    /// First opcode of the reduction range
    pub const FIRST_REDUCTION: u8 = Opcode::SumIIN as u8;

    /// Try to convert from u8
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        OPCODE_TABLE.get(value as usize).map(|info| info.opcode)
    }

    /// Convert to u8
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Static description of this opcode
    #[inline]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_TABLE[self as usize]
    }

    #[inline]
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Look an opcode up by mnemonic
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        OPCODE_TABLE
            .iter()
            .find(|info| info.mnemonic == name)
            .map(|info| info.opcode)
    }

    /// Check if this opcode belongs to the reduction range
    #[inline]
    pub const fn is_reduction(self) -> bool {
        self as u8 >= Self::FIRST_REDUCTION
    }

    /// Reduction family, `None` for element-wise opcodes
    pub fn reduce_op(self) -> Option<ReduceOp> {
        use Opcode::*;
        match self {
            SumIIN | SumLLN | SumFFN | SumDDN | SumCCN => Some(ReduceOp::Sum),
            ProdIIN | ProdLLN | ProdFFN | ProdDDN | ProdCCN => Some(ReduceOp::Prod),
            MinIIN | MinLLN | MinFFN | MinDDN => Some(ReduceOp::Min),
            MaxIIN | MaxLLN | MaxFFN | MaxDDN => Some(ReduceOp::Max),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
