//! Function dispatch families
//!
//! `func_*` opcodes carry an index into one of six function tables. The
//! names and their positions are fixed here; the runtime provides the
//! implementations in the same order.

use crate::opcode::Opcode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unary real functions, shared by the float32 and float64 tables
pub const UNARY_REAL: &[&str] = &[
    "sqrt", "sin", "cos", "tan", "arcsin", "arccos", "arctan", "sinh", "cosh", "tanh", "arcsinh",
    "arccosh", "arctanh", "log", "log1p", "log10", "exp", "expm1", "absolute", "conj", "ceil",
    "floor",
];

/// Binary real functions, shared by the float32 and float64 tables
pub const BINARY_REAL: &[&str] = &["fmod", "arctan2"];

/// Unary complex functions
pub const UNARY_COMPLEX: &[&str] = &[
    "sqrt", "sin", "cos", "tan", "arcsin", "arccos", "arctan", "sinh", "cosh", "tanh", "arcsinh",
    "arccosh", "arctanh", "log", "log1p", "log10", "exp", "expm1", "absolute", "conj",
];

/// Binary complex functions
pub const BINARY_COMPLEX: &[&str] = &["pow"];

/// One of the six function tables
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuncFamily {
    /// `f -> f`
    FF,
    /// `f, f -> f`
    FFF,
    /// `d -> d`
    DD,
    /// `d, d -> d`
    DDD,
    /// `c -> c`
    CC,
    /// `c, c -> c`
    CCC,
}

impl FuncFamily {
    pub const ALL: [FuncFamily; 6] = [
        FuncFamily::FF,
        FuncFamily::FFF,
        FuncFamily::DD,
        FuncFamily::DDD,
        FuncFamily::CC,
        FuncFamily::CCC,
    ];

    /// Family addressed by a function-call opcode
    pub fn of_opcode(op: Opcode) -> Option<Self> {
        match op {
            Opcode::FuncFFN => Some(FuncFamily::FF),
            Opcode::FuncFFFN => Some(FuncFamily::FFF),
            Opcode::FuncDDN => Some(FuncFamily::DD),
            Opcode::FuncDDDN => Some(FuncFamily::DDD),
            Opcode::FuncCCN => Some(FuncFamily::CC),
            Opcode::FuncCCCN => Some(FuncFamily::CCC),
            _ => None,
        }
    }

    /// Function names in index order
    pub const fn names(self) -> &'static [&'static str] {
        match self {
            FuncFamily::FF | FuncFamily::DD => UNARY_REAL,
            FuncFamily::FFF | FuncFamily::DDD => BINARY_REAL,
            FuncFamily::CC => UNARY_COMPLEX,
            FuncFamily::CCC => BINARY_COMPLEX,
        }
    }

    /// Table length; valid indices are `0..len()`
    #[inline]
    pub const fn len(self) -> usize {
        self.names().len()
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Number of operands the functions of this family take
    pub const fn arity(self) -> usize {
        match self {
            FuncFamily::FF | FuncFamily::DD | FuncFamily::CC => 1,
            FuncFamily::FFF | FuncFamily::DDD | FuncFamily::CCC => 2,
        }
    }

    /// Index of a function by name
    pub fn index_of(self, name: &str) -> Option<u8> {
        self.names()
            .iter()
            .position(|&n| n == name)
            .map(|pos| pos as u8)
    }

    /// Name of a function by index
    pub fn name_of(self, index: u8) -> Option<&'static str> {
        self.names().get(index as usize).copied()
    }
}

impl fmt::Display for FuncFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FuncFamily::FF => "ff",
            FuncFamily::FFF => "fff",
            FuncFamily::DD => "dd",
            FuncFamily::DDD => "ddd",
            FuncFamily::CC => "cc",
            FuncFamily::CCC => "ccc",
        };
        f.write_str(s)
    }
}
