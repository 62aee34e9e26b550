//! Element type codes and operand kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a register, spelled as a single signature character
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    /// `b`: boolean, one byte
    Bool = b'b',
    /// `i`: 32-bit signed integer
    Int = b'i',
    /// `l`: 64-bit signed integer
    Long = b'l',
    /// `f`: 32-bit float
    Float = b'f',
    /// `d`: 64-bit float
    Double = b'd',
    /// `c`: complex number made of two 64-bit floats
    Complex = b'c',
    /// `s`: fixed-width, NUL padded byte string
    Str = b's',
}

impl TypeCode {
    /// Parse a signature character
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'b' => Some(TypeCode::Bool),
            'i' => Some(TypeCode::Int),
            'l' => Some(TypeCode::Long),
            'f' => Some(TypeCode::Float),
            'd' => Some(TypeCode::Double),
            'c' => Some(TypeCode::Complex),
            's' => Some(TypeCode::Str),
            _ => None,
        }
    }

    #[inline]
    pub const fn to_char(self) -> char {
        self as u8 as char
    }

    /// Element size in bytes. Strings have a per-register width and report 0.
    pub const fn item_size(self) -> usize {
        match self {
            TypeCode::Bool => 1,
            TypeCode::Int | TypeCode::Float => 4,
            TypeCode::Long | TypeCode::Double => 8,
            TypeCode::Complex => 16,
            TypeCode::Str => 0,
        }
    }

    /// Whether a register declared as `self` may be used where `expected` is
    /// required. int32 and int64 are interchangeable so programs compiled on
    /// 32-bit and 64-bit hosts validate the same way.
    pub fn accepts(self, expected: TypeCode) -> bool {
        self == expected
            || matches!(
                (self, expected),
                (TypeCode::Int, TypeCode::Long) | (TypeCode::Long, TypeCode::Int)
            )
    }

    /// Parse a whole signature string
    pub fn parse_signature(sig: &str) -> Result<Vec<TypeCode>, (usize, char)> {
        sig.chars()
            .enumerate()
            .map(|(pos, c)| TypeCode::from_char(c).ok_or((pos, c)))
            .collect()
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Kind of one operand position in an opcode signature
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Position unused
    None,
    /// Register reference of the given element type
    Reg(TypeCode),
    /// Untyped immediate (`n`): function index or reduction axis
    Index,
}

impl ArgKind {
    #[inline]
    pub const fn is_none(self) -> bool {
        matches!(self, ArgKind::None)
    }

    /// Signature character (`0` for unused positions)
    pub const fn to_char(self) -> char {
        match self {
            ArgKind::None => '0',
            ArgKind::Reg(t) => t.to_char(),
            ArgKind::Index => 'n',
        }
    }
}
