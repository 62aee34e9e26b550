//! Typed register storage
//!
//! A [`Column`] owns the elements of one register (or one host array);
//! [`ColumnRef`] and [`ColumnMut`] are borrowed views of the same shape.
//! The [`Element`] trait maps a Rust scalar type onto its column variant.

use crate::error::{Result, RuntimeError};
use fusevm_spec::{Constant, TypeCode};
use num_complex::Complex64;
use std::borrow::Cow;
use std::fmt;

/// Owned, typed storage
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Bool(Vec<bool>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Complex(Vec<Complex64>),
    /// Fixed-width strings, `width` bytes each, NUL padded
    Str { width: usize, data: Vec<u8> },
}

/// Shared view of a column
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnRef<'a> {
    Bool(&'a [bool]),
    Int(&'a [i32]),
    Long(&'a [i64]),
    Float(&'a [f32]),
    Double(&'a [f64]),
    Complex(&'a [Complex64]),
    Str { width: usize, data: &'a [u8] },
}

/// Exclusive view of a column
#[derive(Debug)]
pub enum ColumnMut<'a> {
    Bool(&'a mut [bool]),
    Int(&'a mut [i32]),
    Long(&'a mut [i64]),
    Float(&'a mut [f32]),
    Double(&'a mut [f64]),
    Complex(&'a mut [Complex64]),
    Str { width: usize, data: &'a mut [u8] },
}

/// Apply the same expression to every non-string variant
macro_rules! each_numeric {
    ($value:expr, $ty:ident, |$v:ident| $body:expr, |$w:ident, $d:ident| $str_body:expr) => {
        match $value {
            $ty::Bool($v) => $body,
            $ty::Int($v) => $body,
            $ty::Long($v) => $body,
            $ty::Float($v) => $body,
            $ty::Double($v) => $body,
            $ty::Complex($v) => $body,
            $ty::Str { width: $w, data: $d } => $str_body,
        }
    };
}

/// Pair up same-typed destination and source variants
macro_rules! zip_variants {
    ($dst:expr, $src:expr, |$d:ident, $s:ident| $body:expr, |$dw:ident, $dd:ident, $sw:ident, $sd:ident| $str_body:expr) => {
        match ($dst, $src) {
            (ColumnMut::Bool($d), ColumnRef::Bool($s)) => $body,
            (ColumnMut::Int($d), ColumnRef::Int($s)) => $body,
            (ColumnMut::Long($d), ColumnRef::Long($s)) => $body,
            (ColumnMut::Float($d), ColumnRef::Float($s)) => $body,
            (ColumnMut::Double($d), ColumnRef::Double($s)) => $body,
            (ColumnMut::Complex($d), ColumnRef::Complex($s)) => $body,
            (
                ColumnMut::Str { width: $dw, data: $dd },
                ColumnRef::Str { width: $sw, data: $sd },
            ) => $str_body,
            _ => false,
        }
    };
}

fn try_vec<T: Clone>(value: T, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| RuntimeError::Allocation {
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    v.resize(len, value);
    Ok(v)
}

/// Copy one fixed-width string into another, truncating or NUL padding
#[inline]
pub fn copy_str(dst: &mut [u8], src: &[u8]) {
    let k = dst.len().min(src.len());
    dst[..k].copy_from_slice(&src[..k]);
    dst[k..].fill(0);
}

impl Default for Column {
    fn default() -> Self {
        Column::Bool(Vec::new())
    }
}

impl Column {
    /// Zero-filled column of `len` elements. `width` is only used for
    /// strings and is raised to at least 1.
    pub fn zeros(code: TypeCode, width: usize, len: usize) -> Result<Self> {
        Ok(match code {
            TypeCode::Bool => Column::Bool(try_vec(false, len)?),
            TypeCode::Int => Column::Int(try_vec(0, len)?),
            TypeCode::Long => Column::Long(try_vec(0, len)?),
            TypeCode::Float => Column::Float(try_vec(0.0, len)?),
            TypeCode::Double => Column::Double(try_vec(0.0, len)?),
            TypeCode::Complex => Column::Complex(try_vec(Complex64::new(0.0, 0.0), len)?),
            TypeCode::Str => {
                let width = width.max(1);
                Column::Str {
                    width,
                    data: try_vec(0u8, len.saturating_mul(width))?,
                }
            }
        })
    }

    /// Column of `len` copies of a constant, stored as `code`. int32 and
    /// int64 constants convert into each other; other mismatches fail.
    pub fn filled(constant: &Constant, code: TypeCode, width: usize, len: usize) -> Result<Self> {
        let mismatch = || {
            RuntimeError::InputMismatch(format!(
                "constant {} cannot fill a register of type '{}'",
                constant, code
            ))
        };
        Ok(match code {
            TypeCode::Bool => Column::Bool(try_vec(bool::from_constant(constant).ok_or_else(mismatch)?, len)?),
            TypeCode::Int => Column::Int(try_vec(i32::from_constant(constant).ok_or_else(mismatch)?, len)?),
            TypeCode::Long => Column::Long(try_vec(i64::from_constant(constant).ok_or_else(mismatch)?, len)?),
            TypeCode::Float => Column::Float(try_vec(f32::from_constant(constant).ok_or_else(mismatch)?, len)?),
            TypeCode::Double => Column::Double(try_vec(f64::from_constant(constant).ok_or_else(mismatch)?, len)?),
            TypeCode::Complex => {
                Column::Complex(try_vec(Complex64::from_constant(constant).ok_or_else(mismatch)?, len)?)
            }
            TypeCode::Str => {
                let Constant::Str(bytes) = constant else {
                    return Err(mismatch());
                };
                let width = width.max(bytes.len()).max(1);
                let mut data = try_vec(0u8, len.saturating_mul(width))?;
                for item in data.chunks_exact_mut(width) {
                    copy_str(item, bytes);
                }
                Column::Str { width, data }
            }
        })
    }

    /// Column holding fixed-width strings built from byte slices
    pub fn strings<S: AsRef<[u8]>>(items: &[S], width: usize) -> Self {
        let width = width.max(1);
        let mut data = vec![0u8; items.len() * width];
        for (dst, src) in data.chunks_exact_mut(width).zip(items) {
            copy_str(dst, src.as_ref());
        }
        Column::Str { width, data }
    }

    pub fn type_code(&self) -> TypeCode {
        self.view().type_code()
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// String width, 0 for other types
    pub fn str_width(&self) -> usize {
        match self {
            Column::Str { width, .. } => *width,
            _ => 0,
        }
    }

    pub fn view(&self) -> ColumnRef<'_> {
        each_numeric!(self, Column, |v| v.as_slice().into(), |w, d| ColumnRef::Str {
            width: *w,
            data: d.as_slice(),
        })
    }

    pub fn view_mut(&mut self) -> ColumnMut<'_> {
        match self {
            Column::Bool(v) => ColumnMut::Bool(v),
            Column::Int(v) => ColumnMut::Int(v),
            Column::Long(v) => ColumnMut::Long(v),
            Column::Float(v) => ColumnMut::Float(v),
            Column::Double(v) => ColumnMut::Double(v),
            Column::Complex(v) => ColumnMut::Complex(v),
            Column::Str { width, data } => ColumnMut::Str {
                width: *width,
                data,
            },
        }
    }

    /// First `n` elements (fewer if the column is shorter)
    #[inline]
    pub fn head(&self, n: usize) -> ColumnRef<'_> {
        self.view().head(n)
    }

    #[inline]
    pub fn head_mut(&mut self, n: usize) -> ColumnMut<'_> {
        self.view_mut().head(n)
    }

    /// Make this column an exact copy of `src`, reusing the allocation when
    /// the element type already matches
    pub fn assign_from(&mut self, src: ColumnRef<'_>) {
        match (self, src) {
            (Column::Bool(d), ColumnRef::Bool(s)) => refill(d, s),
            (Column::Int(d), ColumnRef::Int(s)) => refill(d, s),
            (Column::Long(d), ColumnRef::Long(s)) => refill(d, s),
            (Column::Float(d), ColumnRef::Float(s)) => refill(d, s),
            (Column::Double(d), ColumnRef::Double(s)) => refill(d, s),
            (Column::Complex(d), ColumnRef::Complex(s)) => refill(d, s),
            (Column::Str { width, data }, ColumnRef::Str { width: w, data: s }) => {
                *width = w;
                refill(data, s);
            }
            (this, src) => *this = src.to_column(),
        }
    }
}

#[inline]
fn refill<T: Copy>(dst: &mut Vec<T>, src: &[T]) {
    dst.clear();
    dst.extend_from_slice(src);
}

impl<'a> ColumnRef<'a> {
    pub fn type_code(&self) -> TypeCode {
        match self {
            ColumnRef::Bool(_) => TypeCode::Bool,
            ColumnRef::Int(_) => TypeCode::Int,
            ColumnRef::Long(_) => TypeCode::Long,
            ColumnRef::Float(_) => TypeCode::Float,
            ColumnRef::Double(_) => TypeCode::Double,
            ColumnRef::Complex(_) => TypeCode::Complex,
            ColumnRef::Str { .. } => TypeCode::Str,
        }
    }

    pub fn len(&self) -> usize {
        each_numeric!(self, ColumnRef, |v| v.len(), |w, d| d.len() / (*w).max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements `start..end`, clamped to the column
    pub fn slice(self, start: usize, end: usize) -> ColumnRef<'a> {
        fn clamp<T>(s: &[T], start: usize, end: usize) -> &[T] {
            let end = end.min(s.len());
            &s[start.min(end)..end]
        }
        match self {
            ColumnRef::Bool(v) => ColumnRef::Bool(clamp(v, start, end)),
            ColumnRef::Int(v) => ColumnRef::Int(clamp(v, start, end)),
            ColumnRef::Long(v) => ColumnRef::Long(clamp(v, start, end)),
            ColumnRef::Float(v) => ColumnRef::Float(clamp(v, start, end)),
            ColumnRef::Double(v) => ColumnRef::Double(clamp(v, start, end)),
            ColumnRef::Complex(v) => ColumnRef::Complex(clamp(v, start, end)),
            ColumnRef::Str { width, data } => {
                let w = width.max(1);
                ColumnRef::Str {
                    width,
                    data: clamp(data, start.saturating_mul(w), end.saturating_mul(w)),
                }
            }
        }
    }

    #[inline]
    pub fn head(self, n: usize) -> ColumnRef<'a> {
        self.slice(0, n)
    }

    pub fn to_column(&self) -> Column {
        each_numeric!(*self, ColumnRef, |v| Element::into_column(v.to_vec()), |w, d| Column::Str {
            width: w,
            data: d.to_vec(),
        })
    }
}

impl<'a> ColumnMut<'a> {
    pub fn type_code(&self) -> TypeCode {
        self.as_ref().type_code()
    }

    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_ref(&self) -> ColumnRef<'_> {
        match self {
            ColumnMut::Bool(v) => ColumnRef::Bool(v),
            ColumnMut::Int(v) => ColumnRef::Int(v),
            ColumnMut::Long(v) => ColumnRef::Long(v),
            ColumnMut::Float(v) => ColumnRef::Float(v),
            ColumnMut::Double(v) => ColumnRef::Double(v),
            ColumnMut::Complex(v) => ColumnRef::Complex(v),
            ColumnMut::Str { width, data } => ColumnRef::Str {
                width: *width,
                data,
            },
        }
    }

    /// Shorter-lived view of the same elements
    pub fn reborrow(&mut self) -> ColumnMut<'_> {
        match self {
            ColumnMut::Bool(v) => ColumnMut::Bool(v),
            ColumnMut::Int(v) => ColumnMut::Int(v),
            ColumnMut::Long(v) => ColumnMut::Long(v),
            ColumnMut::Float(v) => ColumnMut::Float(v),
            ColumnMut::Double(v) => ColumnMut::Double(v),
            ColumnMut::Complex(v) => ColumnMut::Complex(v),
            ColumnMut::Str { width, data } => ColumnMut::Str {
                width: *width,
                data,
            },
        }
    }

    /// Elements `start..end`, clamped to the column
    pub fn slice(self, start: usize, end: usize) -> ColumnMut<'a> {
        fn clamp<T>(s: &mut [T], start: usize, end: usize) -> &mut [T] {
            let end = end.min(s.len());
            &mut s[start.min(end)..end]
        }
        match self {
            ColumnMut::Bool(v) => ColumnMut::Bool(clamp(v, start, end)),
            ColumnMut::Int(v) => ColumnMut::Int(clamp(v, start, end)),
            ColumnMut::Long(v) => ColumnMut::Long(clamp(v, start, end)),
            ColumnMut::Float(v) => ColumnMut::Float(clamp(v, start, end)),
            ColumnMut::Double(v) => ColumnMut::Double(clamp(v, start, end)),
            ColumnMut::Complex(v) => ColumnMut::Complex(clamp(v, start, end)),
            ColumnMut::Str { width, data } => {
                let w = width.max(1);
                ColumnMut::Str {
                    width,
                    data: clamp(data, start.saturating_mul(w), end.saturating_mul(w)),
                }
            }
        }
    }

    #[inline]
    pub fn head(self, n: usize) -> ColumnMut<'a> {
        self.slice(0, n)
    }

    /// `self[k] = src[offsets[k]]` for every k. Returns false on a type
    /// mismatch or an offset outside `src`.
    pub fn gather(&mut self, src: ColumnRef<'_>, offsets: impl Iterator<Item = usize>) -> bool {
        zip_variants!(
            self.reborrow(),
            src,
            |d, s| {
                for (slot, off) in d.iter_mut().zip(offsets) {
                    match s.get(off) {
                        Some(v) => *slot = *v,
                        None => return false,
                    }
                }
                true
            },
            |dw, dd, sw, sd| {
                for (slot, off) in dd.chunks_exact_mut(dw.max(1)).zip(offsets) {
                    match sd.get(off * sw..(off + 1) * sw) {
                        Some(item) => copy_str(slot, item),
                        None => return false,
                    }
                }
                true
            }
        )
    }

    /// `self[offsets[k]] = src[k]` for every k. Returns false on a type
    /// mismatch or an offset outside `self`.
    pub fn scatter(&mut self, src: ColumnRef<'_>, offsets: impl Iterator<Item = usize>) -> bool {
        zip_variants!(
            self.reborrow(),
            src,
            |d, s| {
                for (v, off) in s.iter().zip(offsets) {
                    match d.get_mut(off) {
                        Some(slot) => *slot = *v,
                        None => return false,
                    }
                }
                true
            },
            |dw, dd, sw, sd| {
                for (item, off) in sd.chunks_exact(sw.max(1)).zip(offsets) {
                    match dd.get_mut(off * dw..(off + 1) * dw) {
                        Some(slot) => copy_str(slot, item),
                        None => return false,
                    }
                }
                true
            }
        )
    }

    /// Split into consecutive views of `chunk` elements (the last may be
    /// shorter)
    pub fn split_chunks(self, chunk: usize) -> Vec<ColumnMut<'a>> {
        let chunk = chunk.max(1);
        match self {
            ColumnMut::Bool(v) => v.chunks_mut(chunk).map(ColumnMut::Bool).collect(),
            ColumnMut::Int(v) => v.chunks_mut(chunk).map(ColumnMut::Int).collect(),
            ColumnMut::Long(v) => v.chunks_mut(chunk).map(ColumnMut::Long).collect(),
            ColumnMut::Float(v) => v.chunks_mut(chunk).map(ColumnMut::Float).collect(),
            ColumnMut::Double(v) => v.chunks_mut(chunk).map(ColumnMut::Double).collect(),
            ColumnMut::Complex(v) => v.chunks_mut(chunk).map(ColumnMut::Complex).collect(),
            ColumnMut::Str { width, data } => data
                .chunks_mut(chunk.saturating_mul(width.max(1)))
                .map(|data| ColumnMut::Str { width, data })
                .collect(),
        }
    }

    /// Element-wise copy of `src` into the front of `self`
    pub fn copy_from(&mut self, src: ColumnRef<'_>) -> bool {
        let n = src.len();
        self.scatter(src, 0..n)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_code(), self.len())
    }
}

/// Scalar element types with a column representation
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const CODE: TypeCode;

    fn view(v: &[Self]) -> ColumnRef<'_>;

    fn slice<'a>(col: ColumnRef<'a>) -> Option<&'a [Self]>;

    fn slice_mut<'a>(col: ColumnMut<'a>) -> Option<&'a mut [Self]>;

    fn into_column(v: Vec<Self>) -> Column;

    fn from_constant(c: &Constant) -> Option<Self>;

    /// Read a source operand. Integer types convert from the other integer
    /// width so int32 and int64 registers stay interchangeable.
    fn fetch<'a>(col: ColumnRef<'a>) -> Option<Cow<'a, [Self]>> {
        Self::slice(col).map(Cow::Borrowed)
    }

    /// Run `compute` over a destination operand, converting through a
    /// temporary when the register has the other integer width
    fn store<R>(col: ColumnMut<'_>, compute: impl FnOnce(&mut [Self]) -> R) -> Option<R> {
        Self::slice_mut(col).map(compute)
    }
}

impl<'a, T: Element> From<&'a [T]> for ColumnRef<'a> {
    fn from(v: &'a [T]) -> Self {
        T::view(v)
    }
}

impl<T: Element> From<Vec<T>> for Column {
    fn from(v: Vec<T>) -> Self {
        T::into_column(v)
    }
}

macro_rules! impl_element {
    (@coerce Int) => {
        fn fetch<'a>(col: ColumnRef<'a>) -> Option<Cow<'a, [i32]>> {
            match col {
                ColumnRef::Int(v) => Some(Cow::Borrowed(v)),
                ColumnRef::Long(v) => Some(Cow::Owned(v.iter().map(|&x| x as i32).collect())),
                _ => None,
            }
        }

        fn store<R>(col: ColumnMut<'_>, compute: impl FnOnce(&mut [i32]) -> R) -> Option<R> {
            match col {
                ColumnMut::Int(v) => {
                    Some(compute(v))
                }
                ColumnMut::Long(v) => {
                    let mut tmp: Vec<i32> = v.iter().map(|&x| x as i32).collect();
                    let result = compute(&mut tmp);
                    for (d, x) in v.iter_mut().zip(tmp) {
                        *d = x as i64;
                    }
                    Some(result)
                }
                _ => None,
            }
        }
    };

    (@coerce Long) => {
        fn fetch<'a>(col: ColumnRef<'a>) -> Option<Cow<'a, [i64]>> {
            match col {
                ColumnRef::Long(v) => Some(Cow::Borrowed(v)),
                ColumnRef::Int(v) => Some(Cow::Owned(v.iter().map(|&x| x as i64).collect())),
                _ => None,
            }
        }

        fn store<R>(col: ColumnMut<'_>, compute: impl FnOnce(&mut [i64]) -> R) -> Option<R> {
            match col {
                ColumnMut::Long(v) => {
                    Some(compute(v))
                }
                ColumnMut::Int(v) => {
                    let mut tmp: Vec<i64> = v.iter().map(|&x| x as i64).collect();
                    let result = compute(&mut tmp);
                    for (d, x) in v.iter_mut().zip(tmp) {
                        *d = x as i32;
                    }
                    Some(result)
                }
                _ => None,
            }
        }
    };

    (@coerce $other:ident) => {};

    ($t:ty, $variant:ident, $code:expr, |$c:ident| $from_const:expr) => {
        impl Element for $t {
            const CODE: TypeCode = $code;

            #[inline]
            fn view(v: &[Self]) -> ColumnRef<'_> {
                ColumnRef::$variant(v)
            }

            #[inline]
            fn slice<'a>(col: ColumnRef<'a>) -> Option<&'a [Self]> {
                match col {
                    ColumnRef::$variant(v) => Some(v),
                    _ => None,
                }
            }

            #[inline]
            fn slice_mut<'a>(col: ColumnMut<'a>) -> Option<&'a mut [Self]> {
                match col {
                    ColumnMut::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_column(v: Vec<Self>) -> Column {
                Column::$variant(v)
            }

            fn from_constant($c: &Constant) -> Option<Self> {
                $from_const
            }

            impl_element!(@coerce $variant);
        }
    };
}

impl_element!(bool, Bool, TypeCode::Bool, |c| match c {
    Constant::Bool(v) => Some(*v),
    _ => None,
});

impl_element!(i32, Int, TypeCode::Int, |c| match c {
    Constant::Int(v) => Some(*v),
    Constant::Long(v) => Some(*v as i32),
    _ => None,
});

impl_element!(i64, Long, TypeCode::Long, |c| match c {
    Constant::Long(v) => Some(*v),
    Constant::Int(v) => Some(*v as i64),
    _ => None,
});

impl_element!(f32, Float, TypeCode::Float, |c| match c {
    Constant::Float(v) => Some(*v),
    _ => None,
});

impl_element!(f64, Double, TypeCode::Double, |c| match c {
    Constant::Double(v) => Some(*v),
    _ => None,
});

impl_element!(Complex64, Complex, TypeCode::Complex, |c| match c {
    Constant::Complex(re, im) => Some(Complex64::new(*re, *im)),
    _ => None,
});
