//! Function dispatch tables for `func_*` opcodes
//!
//! Each table lists implementations in the order of the matching name list
//! in [`fusevm_spec::functions`]. The portable tables hold per-element
//! functions. With the `vml` feature the interpreter calls bulk tables that
//! process a whole block per call; `fmod` has no bulk entry and always runs
//! as a portable loop.

use num_complex::Complex64;
use std::f64::consts::LN_10;

/// Per-element function types
pub type FuncFF = fn(f32) -> f32;
pub type FuncFFF = fn(f32, f32) -> f32;
pub type FuncDD = fn(f64) -> f64;
pub type FuncDDD = fn(f64, f64) -> f64;
pub type FuncCC = fn(Complex64) -> Complex64;
pub type FuncCCC = fn(Complex64, Complex64) -> Complex64;

macro_rules! real_unary_table {
    ($name:ident, $t:ty) => {
        pub static $name: [fn($t) -> $t; 22] = [
            <$t>::sqrt,
            <$t>::sin,
            <$t>::cos,
            <$t>::tan,
            <$t>::asin,
            <$t>::acos,
            <$t>::atan,
            <$t>::sinh,
            <$t>::cosh,
            <$t>::tanh,
            <$t>::asinh,
            <$t>::acosh,
            <$t>::atanh,
            <$t>::ln,
            <$t>::ln_1p,
            <$t>::log10,
            <$t>::exp,
            <$t>::exp_m1,
            <$t>::abs,
            |x| x,
            <$t>::ceil,
            <$t>::floor,
        ];
    };
}

real_unary_table!(FF_TABLE, f32);
real_unary_table!(DD_TABLE, f64);

pub static FFF_TABLE: [FuncFFF; 2] = [|a, b| a % b, f32::atan2];
pub static DDD_TABLE: [FuncDDD; 2] = [|a, b| a % b, f64::atan2];

pub static CC_TABLE: [FuncCC; 20] = [
    Complex64::sqrt,
    Complex64::sin,
    Complex64::cos,
    Complex64::tan,
    Complex64::asin,
    Complex64::acos,
    Complex64::atan,
    Complex64::sinh,
    Complex64::cosh,
    Complex64::tanh,
    Complex64::asinh,
    Complex64::acosh,
    Complex64::atanh,
    Complex64::ln,
    c_log1p,
    c_log10,
    Complex64::exp,
    c_expm1,
    c_abs,
    c_conj,
];

pub static CCC_TABLE: [FuncCCC; 1] = [c_pow];

fn c_log1p(z: Complex64) -> Complex64 {
    (z + 1.0).ln()
}

fn c_log10(z: Complex64) -> Complex64 {
    z.ln() / LN_10
}

fn c_expm1(z: Complex64) -> Complex64 {
    z.exp() - 1.0
}

fn c_abs(z: Complex64) -> Complex64 {
    Complex64::new(z.norm(), 0.0)
}

fn c_conj(z: Complex64) -> Complex64 {
    z.conj()
}

/// Complex power with exact results for a zero exponent and a zero base
pub fn c_pow(a: Complex64, b: Complex64) -> Complex64 {
    if b.re == 0.0 && b.im == 0.0 {
        return Complex64::new(1.0, 0.0);
    }
    if a.re == 0.0 && a.im == 0.0 {
        if b.re > 0.0 && b.im == 0.0 {
            return Complex64::new(0.0, 0.0);
        }
        return Complex64::new(f64::NAN, f64::NAN);
    }
    a.powc(b)
}

#[cfg(feature = "vml")]
mod bulk {
    //! Block-at-a-time variants. Each entry applies its function to the
    //! overlap of the input and output slices.

    use super::*;

    pub type BulkFF = fn(&[f32], &mut [f32]);
    pub type BulkDD = fn(&[f64], &mut [f64]);
    pub type BulkDDD = fn(&[f64], &[f64], &mut [f64]);
    pub type BulkFFF = fn(&[f32], &[f32], &mut [f32]);
    pub type BulkCC = fn(&[Complex64], &mut [Complex64]);
    pub type BulkCCC = fn(&[Complex64], &[Complex64], &mut [Complex64]);

    macro_rules! bulk_unary {
        ($table:ident, $t:ty, $len:literal, [$($i:literal),+]) => {
            pub static $table: [fn(&[$t], &mut [$t]); $len] = [$(
                |a, out| {
                    let f = super::$table[$i];
                    for (o, &x) in out.iter_mut().zip(a) {
                        *o = f(x);
                    }
                },
            )+];
        };
    }

    macro_rules! bulk_binary {
        ($table:ident, $t:ty, $len:literal, [$($i:literal),+]) => {
            pub static $table: [fn(&[$t], &[$t], &mut [$t]); $len] = [$(
                |a, b, out| {
                    let f = super::$table[$i];
                    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
                        *o = f(x, y);
                    }
                },
            )+];
        };
    }

    bulk_unary!(FF_TABLE, f32, 22, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21]);
    bulk_unary!(DD_TABLE, f64, 22, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21]);
    bulk_unary!(CC_TABLE, Complex64, 20, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19]);
    // fmod (index 0) never goes through the bulk path
    bulk_binary!(FFF_TABLE, f32, 2, [0, 1]);
    bulk_binary!(DDD_TABLE, f64, 2, [0, 1]);
    bulk_binary!(CCC_TABLE, Complex64, 1, [0]);
}

#[cfg(feature = "vml")]
pub use bulk::{BulkCC, BulkCCC, BulkDD, BulkDDD, BulkFF, BulkFFF};

/// Index of `fmod` in the binary real tables
const FMOD: usize = 0;

#[cfg(not(feature = "vml"))]
#[inline]
fn map_unary<T: Copy>(f: fn(T) -> T, a: &[T], out: &mut [T]) {
    for (o, &x) in out.iter_mut().zip(a) {
        *o = f(x);
    }
}

#[inline]
fn map_binary<T: Copy>(f: fn(T, T) -> T, a: &[T], b: &[T], out: &mut [T]) {
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = f(x, y);
    }
}

macro_rules! entry_unary {
    ($(#[$doc:meta])* $fn_name:ident, $t:ty, $table:ident) => {
        $(#[$doc])*
        pub fn $fn_name(idx: u8, a: &[$t], out: &mut [$t]) -> Option<()> {
            let idx = idx as usize;
            #[cfg(feature = "vml")]
            {
                let f = bulk::$table.get(idx)?;
                f(a, out);
            }
            #[cfg(not(feature = "vml"))]
            {
                map_unary(*$table.get(idx)?, a, out);
            }
            Some(())
        }
    };
}

macro_rules! entry_binary {
    ($(#[$doc:meta])* $fn_name:ident, $t:ty, $table:ident, $portable_only:expr) => {
        $(#[$doc])*
        pub fn $fn_name(idx: u8, a: &[$t], b: &[$t], out: &mut [$t]) -> Option<()> {
            let idx = idx as usize;
            let portable_only: fn(usize) -> bool = $portable_only;
            if cfg!(feature = "vml") && !portable_only(idx) {
                #[cfg(feature = "vml")]
                {
                    let f = bulk::$table.get(idx)?;
                    f(a, b, out);
                    return Some(());
                }
            }
            map_binary(*$table.get(idx)?, a, b, out);
            Some(())
        }
    };
}

entry_unary!(
    /// Apply float32 unary function `idx`; `None` when the index is out of range
    call_ff, f32, FF_TABLE
);
entry_unary!(call_dd, f64, DD_TABLE);
entry_unary!(call_cc, Complex64, CC_TABLE);
entry_binary!(call_fff, f32, FFF_TABLE, |idx| idx == FMOD);
entry_binary!(
    /// Apply float64 binary function `idx`. `fmod` always takes the
    /// portable loop.
    call_ddd, f64, DDD_TABLE, |idx| idx == FMOD
);
entry_binary!(call_ccc, Complex64, CCC_TABLE, |_| false);
