//! Owned host arrays
//!
//! A minimal C-contiguous N-dimensional array: typed data plus shape.
//! Enough to feed kernels and receive their results.

use crate::column::{Column, ColumnRef, Element};
use crate::error::{Result, RuntimeError};
use fusevm_spec::{Constant, TypeCode};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    data: Column,
    shape: Vec<usize>,
}

/// Operand of [`crate::Engine::evaluate_into`]
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Array(&'a Array),
    /// The output array itself, read before it is overwritten
    Output,
}

impl<'a> From<&'a Array> for Operand<'a> {
    fn from(array: &'a Array) -> Self {
        Operand::Array(array)
    }
}

fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| RuntimeError::Shape(format!("shape {:?} overflows", shape)))
}

impl Array {
    /// Wrap a column, checking that its length matches the shape
    pub fn new(data: Column, shape: Vec<usize>) -> Result<Self> {
        let expected = element_count(&shape)?;
        if data.len() != expected {
            return Err(RuntimeError::Shape(format!(
                "{} elements do not fill shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self { data, shape })
    }

    pub fn zeros(code: TypeCode, shape: &[usize]) -> Result<Self> {
        Self::zeros_with_width(code, 1, shape)
    }

    /// Zero array; `width` is the string width for `s` arrays
    pub fn zeros_with_width(code: TypeCode, width: usize, shape: &[usize]) -> Result<Self> {
        let len = element_count(shape)?;
        Ok(Self {
            data: Column::zeros(code, width, len)?,
            shape: shape.to_vec(),
        })
    }

    /// Array filled with one value
    pub fn full(value: &Constant, code: TypeCode, shape: &[usize]) -> Result<Self> {
        let len = element_count(shape)?;
        Ok(Self {
            data: Column::filled(value, code, value.str_width(), len)?,
            shape: shape.to_vec(),
        })
    }

    /// One-dimensional array from a vector
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let len = values.len();
        Self {
            data: T::into_column(values),
            shape: vec![len],
        }
    }

    /// Reshaped array from a vector
    pub fn from_shape_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        Self::new(T::into_column(values), shape.to_vec())
    }

    /// One-dimensional string array; the width is the longest item
    pub fn strings<S: AsRef<[u8]>>(items: &[S]) -> Self {
        let width = items.iter().map(|s| s.as_ref().len()).max().unwrap_or(1);
        Self {
            data: Column::strings(items, width),
            shape: vec![items.len()],
        }
    }

    /// Zero-dimensional array holding one value
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            data: T::into_column(vec![value]),
            shape: Vec::new(),
        }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn type_code(&self) -> TypeCode {
        self.data.type_code()
    }

    /// String width, 0 for other types
    pub fn str_width(&self) -> usize {
        self.data.str_width()
    }

    /// Element strides of the C-contiguous layout
    pub fn c_strides(&self) -> Vec<isize> {
        c_strides(&self.shape)
    }

    pub fn column(&self) -> &Column {
        &self.data
    }

    pub fn column_mut(&mut self) -> &mut Column {
        &mut self.data
    }

    pub fn view(&self) -> ColumnRef<'_> {
        self.data.view()
    }

    pub fn into_column(self) -> Column {
        self.data
    }

    /// Typed data, `None` when `T` is not the element type
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(self.data.view())
    }

    pub fn as_slice_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        T::slice_mut(self.data.view_mut())
    }

    /// String item `i` without trailing NUL padding
    pub fn str_at(&self, i: usize) -> Option<&[u8]> {
        match self.data.view().slice(i, i + 1) {
            ColumnRef::Str { data, .. } if !data.is_empty() => {
                let end = data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                Some(&data[..end])
            }
            _ => None,
        }
    }

    /// Same data under a new shape with the same element count
    pub fn reshape(self, shape: &[usize]) -> Result<Self> {
        Self::new(self.data, shape.to_vec())
    }
}

/// Element strides of a C-contiguous array of `shape`
pub fn c_strides(shape: &[usize]) -> Vec<isize> {
    let mut strides = vec![0isize; shape.len()];
    let mut step = 1isize;
    for (s, &d) in strides.iter_mut().zip(shape).rev() {
        *s = step;
        step = step.saturating_mul(d.max(1) as isize);
    }
    strides
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array<{}>{:?}", self.type_code(), self.shape)
    }
}
