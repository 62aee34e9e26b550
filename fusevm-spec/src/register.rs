//! Register file layout
//!
//! Registers form one flat index space:
//!
//! ```text
//! 0                      output
//! 1 ..= n_inputs         inputs
//! next n_constants       compile-time constants
//! remaining n_temps      scratch temporaries
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a register slot
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    Output,
    Input,
    Constant,
    Temp,
}

impl RegisterKind {
    /// Only the output and temporaries may be written by an instruction
    #[inline]
    pub fn is_writable(self) -> bool {
        matches!(self, RegisterKind::Output | RegisterKind::Temp)
    }
}

/// Register counts of one kernel
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterLayout {
    pub n_inputs: usize,
    pub n_constants: usize,
    pub n_temps: usize,
}

impl RegisterLayout {
    pub const fn new(n_inputs: usize, n_constants: usize, n_temps: usize) -> Self {
        Self {
            n_inputs,
            n_constants,
            n_temps,
        }
    }

    /// Total register count (the bound every register operand is checked against)
    #[inline]
    pub const fn len(&self) -> usize {
        1 + self.n_inputs + self.n_constants + self.n_temps
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// First constant register
    #[inline]
    pub const fn first_constant(&self) -> usize {
        1 + self.n_inputs
    }

    /// First temporary register
    #[inline]
    pub const fn first_temp(&self) -> usize {
        1 + self.n_inputs + self.n_constants
    }

    /// Classify a register index, `None` when out of range
    pub fn kind(&self, reg: usize) -> Option<RegisterKind> {
        if reg == 0 {
            Some(RegisterKind::Output)
        } else if reg < self.first_constant() {
            Some(RegisterKind::Input)
        } else if reg < self.first_temp() {
            Some(RegisterKind::Constant)
        } else if reg < self.len() {
            Some(RegisterKind::Temp)
        } else {
            None
        }
    }
}

impl fmt::Display for RegisterLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "1 output, {} inputs, {} constants, {} temps",
            self.n_inputs, self.n_constants, self.n_temps
        )
    }
}
