//! # Programs and Kernels
//!
//! A [`Program`] is the raw bytecode. A [`Kernel`] bundles a program with the
//! register signatures and constants it was compiled against, and knows how
//! to serialize itself into a small binary container.

use crate::error::{Result, SpecError};
use crate::instruction::{decode_program, Instruction, Instructions};
use crate::opcode::Opcode;
use crate::register::RegisterLayout;
use crate::types::TypeCode;
use crate::{INSTRUCTION_WIDTH, MAX_DIMS, REDUCE_ALL};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Magic number for kernel containers: "FVMK" = 0x4B4D5646 (little endian)
pub const MAGIC: u32 = 0x4B4D5646;

/// Container version: v1.0 = 0x00010000
pub const VERSION: u32 = 0x00010000;

/// Axis a trailing reduction folds over
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionAxis {
    /// Reduce over every axis into a single element
    All,
    /// One axis of the broadcast input shape. Negative values come from the
    /// complement encoding and are never in bounds.
    Axis(i32),
}

impl ReductionAxis {
    /// Decode the axis byte. `255` means all axes; bytes at or above
    /// `MAX_DIMS` decode as `MAX_DIMS - byte`.
    pub fn decode(byte: u8) -> Self {
        if byte == REDUCE_ALL {
            ReductionAxis::All
        } else if byte >= MAX_DIMS {
            ReductionAxis::Axis(MAX_DIMS as i32 - byte as i32)
        } else {
            ReductionAxis::Axis(byte as i32)
        }
    }

    /// Inverse of [`decode`](Self::decode)
    pub fn encode(self) -> u8 {
        match self {
            ReductionAxis::All => REDUCE_ALL,
            ReductionAxis::Axis(a) if a >= 0 => a as u8,
            ReductionAxis::Axis(a) => (MAX_DIMS as i32 - a) as u8,
        }
    }

    /// Axis index within `ndim` dimensions, `None` when out of bounds
    pub fn index(self, ndim: usize) -> Option<usize> {
        match self {
            ReductionAxis::Axis(a) if a >= 0 && (a as usize) < ndim => Some(a as usize),
            _ => None,
        }
    }
}

impl fmt::Display for ReductionAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReductionAxis::All => f.write_str("all"),
            ReductionAxis::Axis(a) => write!(f, "{}", a),
        }
    }
}

/// Immutable bytecode
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Program {
    code: Vec<u8>,
}

impl Program {
    pub fn new(code: Vec<u8>) -> Self {
        Self { code }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.code
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Iterate instructions, skipping `noop` slots
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions::new(&self.code)
    }

    /// Decode every instruction
    pub fn decode(&self) -> Result<Vec<Instruction>> {
        decode_program(&self.code)
    }

    /// Opcode of the last non-`noop` slot, walking back over continuation
    /// slots of a trailing double-width instruction
    pub fn last_opcode(&self) -> Option<Opcode> {
        let mut end = self.code.len() - self.code.len() % INSTRUCTION_WIDTH;
        while end >= INSTRUCTION_WIDTH {
            end -= INSTRUCTION_WIDTH;
            let byte = self.code[end];
            if byte != Opcode::Noop.to_u8() {
                return Opcode::from_u8(byte);
            }
        }
        None
    }

    /// Element type produced into the output register
    pub fn return_type(&self) -> Option<TypeCode> {
        match self.last_opcode()?.info().ret {
            crate::ArgKind::Reg(t) => Some(t),
            _ => None,
        }
    }

    /// Whether the final slot holds a reduction opcode
    pub fn is_reduction(&self) -> bool {
        self.final_slot_opcode().map_or(false, Opcode::is_reduction)
    }

    /// Reduction opcode in the final slot
    pub fn reduction(&self) -> Option<Opcode> {
        self.final_slot_opcode().filter(|op| op.is_reduction())
    }

    /// Axis of a trailing reduction (the last program byte)
    pub fn reduction_axis(&self) -> Option<ReductionAxis> {
        if !self.is_reduction() {
            return None;
        }
        self.code.last().map(|&b| ReductionAxis::decode(b))
    }

    fn final_slot_opcode(&self) -> Option<Opcode> {
        if self.code.len() < INSTRUCTION_WIDTH {
            return None;
        }
        Opcode::from_u8(self.code[self.code.len() - INSTRUCTION_WIDTH])
    }
}

impl From<Vec<u8>> for Program {
    fn from(code: Vec<u8>) -> Self {
        Self::new(code)
    }
}

/// Compile-time constant stored in a constant register
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Real and imaginary parts
    Complex(f64, f64),
    Str(Vec<u8>),
}

impl Constant {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Constant::Bool(_) => TypeCode::Bool,
            Constant::Int(_) => TypeCode::Int,
            Constant::Long(_) => TypeCode::Long,
            Constant::Float(_) => TypeCode::Float,
            Constant::Double(_) => TypeCode::Double,
            Constant::Complex(..) => TypeCode::Complex,
            Constant::Str(_) => TypeCode::Str,
        }
    }

    /// Byte width of a string constant, 0 otherwise
    pub fn str_width(&self) -> usize {
        match self {
            Constant::Str(bytes) => bytes.len(),
            _ => 0,
        }
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update([self.type_code() as u8]);
        match self {
            Constant::Bool(v) => hasher.update([*v as u8]),
            Constant::Int(v) => hasher.update(v.to_le_bytes()),
            Constant::Long(v) => hasher.update(v.to_le_bytes()),
            Constant::Float(v) => hasher.update(v.to_bits().to_le_bytes()),
            Constant::Double(v) => hasher.update(v.to_bits().to_le_bytes()),
            Constant::Complex(re, im) => {
                hasher.update(re.to_bits().to_le_bytes());
                hasher.update(im.to_bits().to_le_bytes());
            }
            Constant::Str(bytes) => {
                hasher.update((bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bool(v) => write!(f, "{}", v),
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Long(v) => write!(f, "{}", v),
            Constant::Float(v) => write!(f, "{:?}", v),
            Constant::Double(v) => write!(f, "{:?}", v),
            Constant::Complex(re, im) => write!(f, "({:?}, {:?})", re, im),
            Constant::Str(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// Kernel container header (32 bytes)
///
/// Binary format:
/// ```text
/// Offset  Size  Field
/// ──────────────────────────────────
/// 0x00    4     magic ("FVMK")
/// 0x04    4     version
/// 0x08    2     n_inputs
/// 0x0A    2     n_constants
/// 0x0C    2     n_temps
/// 0x0E    2     flags (bit 0: reduction)
/// 0x10    4     code_size
/// 0x14    4     body_size
/// 0x18    8     reserved
/// ```
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelHeader {
    pub magic: u32,
    pub version: u32,
    pub n_inputs: u16,
    pub n_constants: u16,
    pub n_temps: u16,
    pub flags: u16,
    /// Program size in bytes
    pub code_size: u32,
    /// Size of the bincode body following the header
    pub body_size: u32,
}

impl KernelHeader {
    /// Header size in bytes
    pub const SIZE: usize = 32;

    /// Flag bit set when the program ends in a reduction
    pub const FLAG_REDUCTION: u16 = 0x1;

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(SpecError::InvalidMagic(self.magic));
        }
        if self.version != VERSION {
            return Err(SpecError::InvalidVersion {
                expected: VERSION,
                found: self.version,
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.n_inputs.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.n_constants.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.n_temps.to_le_bytes());
        bytes[14..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.code_size.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.body_size.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(SpecError::InvalidHeaderSize {
                expected: Self::SIZE,
                found: bytes.len(),
            });
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        let header = Self {
            magic: u32_at(0),
            version: u32_at(4),
            n_inputs: u16_at(8),
            n_constants: u16_at(10),
            n_temps: u16_at(12),
            flags: u16_at(14),
            code_size: u32_at(16),
            body_size: u32_at(20),
        };
        header.validate()?;
        Ok(header)
    }
}

impl fmt::Display for KernelHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FuseVM Kernel Header")?;
        writeln!(f, "  Magic:       {:#010x}", self.magic)?;
        writeln!(f, "  Version:     {:#010x}", self.version)?;
        writeln!(f, "  Inputs:      {}", self.n_inputs)?;
        writeln!(f, "  Constants:   {}", self.n_constants)?;
        writeln!(f, "  Temps:       {}", self.n_temps)?;
        writeln!(f, "  Reduction:   {}", self.flags & Self::FLAG_REDUCTION != 0)?;
        writeln!(f, "  Code size:   {} bytes", self.code_size)?;
        writeln!(f, "  Body size:   {} bytes", self.body_size)?;
        Ok(())
    }
}

/// A compiled expression: bytecode plus the register types it runs against
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub program: Program,
    /// One type code per register, output first
    pub full_signature: Vec<TypeCode>,
    /// Type codes of the input registers only
    pub input_signature: Vec<TypeCode>,
    /// Values of the constant registers, in register order
    pub constants: Vec<Constant>,
    pub n_temps: usize,
}

impl Kernel {
    /// Build a kernel from signature strings. The temporary count is
    /// whatever the full signature has left after output, inputs and
    /// constants.
    pub fn new(
        program: impl Into<Program>,
        full_signature: &str,
        input_signature: &str,
        constants: Vec<Constant>,
    ) -> Result<Self> {
        let full = parse_signature(full_signature)?;
        let inputs = parse_signature(input_signature)?;
        let fixed = 1 + inputs.len() + constants.len();
        if full.len() < fixed {
            return Err(SpecError::CountMismatch {
                field: "registers",
                declared: full.len(),
                found: fixed,
            });
        }
        let n_temps = full.len() - fixed;
        Ok(Self {
            program: program.into(),
            full_signature: full,
            input_signature: inputs,
            constants,
            n_temps,
        })
    }

    #[inline]
    pub fn n_inputs(&self) -> usize {
        self.input_signature.len()
    }

    #[inline]
    pub fn n_constants(&self) -> usize {
        self.constants.len()
    }

    pub fn layout(&self) -> RegisterLayout {
        RegisterLayout::new(self.n_inputs(), self.n_constants(), self.n_temps)
    }

    /// Register count `R` every operand is checked against
    #[inline]
    pub fn register_count(&self) -> usize {
        self.full_signature.len()
    }

    pub fn register_type(&self, reg: usize) -> Option<TypeCode> {
        self.full_signature.get(reg).copied()
    }

    pub fn is_reduction(&self) -> bool {
        self.program.is_reduction()
    }

    /// Output element type as declared by the full signature
    pub fn output_type(&self) -> Option<TypeCode> {
        self.full_signature.first().copied()
    }

    /// Byte width of every register. Inputs take the widths passed in,
    /// string constants their own length, and string outputs or temps the
    /// widest string among inputs and constants. Non-string registers are 0.
    pub fn string_widths(&self, input_widths: &[usize]) -> Vec<usize> {
        let first_const = 1 + self.n_inputs();
        let widest = input_widths
            .iter()
            .copied()
            .chain(self.constants.iter().map(Constant::str_width))
            .max()
            .unwrap_or(0);

        self.full_signature
            .iter()
            .enumerate()
            .map(|(reg, &code)| {
                if code != TypeCode::Str {
                    0
                } else if reg == 0 {
                    widest
                } else if reg < first_const {
                    input_widths.get(reg - 1).copied().unwrap_or(0)
                } else if reg < first_const + self.n_constants() {
                    self.constants[reg - first_const].str_width()
                } else {
                    widest
                }
            })
            .collect()
    }

    /// SHA-256 over code, signatures and constants
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.program.len() as u64).to_le_bytes());
        hasher.update(self.program.as_bytes());
        for code in &self.full_signature {
            hasher.update([*code as u8]);
        }
        hasher.update([b'|']);
        for code in &self.input_signature {
            hasher.update([*code as u8]);
        }
        hasher.update([b'|']);
        for constant in &self.constants {
            constant.hash_into(&mut hasher);
        }
        hasher.update((self.n_temps as u64).to_le_bytes());
        hasher.finalize().into()
    }

    pub fn header(&self, body_size: usize) -> Result<KernelHeader> {
        let narrow = |field: &'static str, n: usize| {
            u16::try_from(n).map_err(|_| SpecError::Encode(format!("{} = {} overflows u16", field, n)))
        };
        Ok(KernelHeader {
            magic: MAGIC,
            version: VERSION,
            n_inputs: narrow("n_inputs", self.n_inputs())?,
            n_constants: narrow("n_constants", self.n_constants())?,
            n_temps: narrow("n_temps", self.n_temps)?,
            flags: if self.is_reduction() {
                KernelHeader::FLAG_REDUCTION
            } else {
                0
            },
            code_size: self.program.len() as u32,
            body_size: body_size as u32,
        })
    }

    /// Serialize to the container format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| SpecError::Encode(e.to_string()))?;
        let header = self.header(body.len())?;

        let mut bytes = Vec::with_capacity(KernelHeader::SIZE + body.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Deserialize from the container format, checking the header counts
    /// against the body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = KernelHeader::from_bytes(bytes)?;
        let body_end = KernelHeader::SIZE + header.body_size as usize;
        let body = bytes
            .get(KernelHeader::SIZE..body_end)
            .ok_or(SpecError::CountMismatch {
                field: "body_size",
                declared: header.body_size as usize,
                found: bytes.len() - KernelHeader::SIZE,
            })?;

        let kernel: Kernel =
            bincode::deserialize(body).map_err(|e| SpecError::Decode(e.to_string()))?;

        let checks = [
            ("n_inputs", header.n_inputs as usize, kernel.n_inputs()),
            ("n_constants", header.n_constants as usize, kernel.n_constants()),
            ("n_temps", header.n_temps as usize, kernel.n_temps),
            ("code_size", header.code_size as usize, kernel.program.len()),
        ];
        for (field, declared, found) in checks {
            if declared != found {
                return Err(SpecError::CountMismatch {
                    field,
                    declared,
                    found,
                });
            }
        }
        Ok(kernel)
    }
}

fn parse_signature(sig: &str) -> Result<Vec<TypeCode>> {
    TypeCode::parse_signature(sig).map_err(|(pos, ch)| SpecError::InvalidTypeCode { pos, ch })
}
