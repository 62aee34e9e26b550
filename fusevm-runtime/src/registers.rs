//! Per-thread register arena
//!
//! One [`Column`] per register index. The output and input slots stay empty:
//! their data lives in the block views the driver hands to the interpreter.
//! Constants are broadcast to a full block once, temporaries are scratch.

use crate::column::Column;
use crate::error::{Result, RuntimeError};
use fusevm_spec::{Kernel, RegisterKind, RegisterLayout};
use tracing::trace;

#[derive(Debug)]
pub struct RegisterFile {
    layout: RegisterLayout,
    columns: Vec<Column>,
    /// Copy of a destination register that is also read by its instruction
    shadow: Column,
    block_size: usize,
}

impl RegisterFile {
    /// Allocate the arena for `kernel`. `widths` holds the byte width of
    /// every register (see [`Kernel::string_widths`]).
    pub fn new(kernel: &Kernel, widths: &[usize], block_size: usize) -> Result<Self> {
        let layout = kernel.layout();
        let mut columns = Vec::new();
        columns
            .try_reserve_exact(layout.len())
            .map_err(|_| RuntimeError::Allocation {
                bytes: layout.len() * std::mem::size_of::<Column>(),
            })?;

        for (reg, &code) in kernel.full_signature.iter().enumerate() {
            let width = widths.get(reg).copied().unwrap_or(0);
            let column = match layout.kind(reg) {
                Some(RegisterKind::Constant) => {
                    let constant = &kernel.constants[reg - layout.first_constant()];
                    Column::filled(constant, code, width, block_size)?
                }
                Some(RegisterKind::Temp) => Column::zeros(code, width, block_size)?,
                _ => Column::default(),
            };
            columns.push(column);
        }

        trace!(
            registers = columns.len(),
            block_size,
            "register file allocated"
        );

        Ok(Self {
            layout,
            columns,
            shadow: Column::default(),
            block_size,
        })
    }

    /// Independent copy for another thread, reporting allocation failure
    /// instead of aborting
    pub fn try_clone(&self) -> Result<Self> {
        let mut columns = Vec::new();
        columns
            .try_reserve_exact(self.columns.len())
            .map_err(|_| RuntimeError::Allocation {
                bytes: self.columns.len() * std::mem::size_of::<Column>(),
            })?;
        for col in &self.columns {
            let mut copy = Column::zeros(col.type_code(), col.str_width(), col.len())?;
            copy.assign_from(col.view());
            columns.push(copy);
        }
        Ok(Self {
            layout: self.layout,
            columns,
            shadow: Column::default(),
            block_size: self.block_size,
        })
    }

    #[inline]
    pub fn layout(&self) -> RegisterLayout {
        self.layout
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Register count `R`
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column backing a constant or temporary
    pub fn column(&self, reg: usize) -> Option<&Column> {
        self.columns.get(reg)
    }

    /// Bytes held by register columns
    pub fn footprint(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.len() * c.type_code().item_size().max(c.str_width()))
            .sum()
    }

    pub(crate) fn split(&mut self) -> (&mut [Column], &mut Column) {
        (&mut self.columns, &mut self.shadow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusevm_spec::{Constant, TypeCode};

    fn kernel() -> Kernel {
        // out = a * 2.5 with one temp
        Kernel::new(Vec::<u8>::new(), "dddd", "d", vec![Constant::Double(2.5)]).unwrap()
    }

    #[test]
    fn test_layout_of_arena() {
        let k = kernel();
        let regs = RegisterFile::new(&k, &k.string_widths(&[]), 8).unwrap();
        assert_eq!(regs.len(), 4);
        assert!(regs.column(0).unwrap().is_empty());
        assert!(regs.column(1).unwrap().is_empty());
        assert_eq!(regs.column(2).unwrap(), &Column::Double(vec![2.5; 8]));
        assert_eq!(regs.column(3).unwrap().len(), 8);
        assert_eq!(regs.column(3).unwrap().type_code(), TypeCode::Double);
    }

    #[test]
    fn test_try_clone_copies_constants() {
        let k = kernel();
        let regs = RegisterFile::new(&k, &k.string_widths(&[]), 4).unwrap();
        let copy = regs.try_clone().unwrap();
        assert_eq!(copy.column(2), regs.column(2));
        assert_eq!(copy.block_size(), 4);
        assert_eq!(copy.footprint(), regs.footprint());
    }

    #[test]
    fn test_string_temp_width() {
        let k = Kernel::new(Vec::<u8>::new(), "sss", "s", vec![Constant::Str(b"abc".to_vec())]).unwrap();
        let regs = RegisterFile::new(&k, &k.string_widths(&[5]), 2).unwrap();
        assert_eq!(regs.column(2).unwrap().str_width(), 3);
    }

    #[test]
    fn test_constant_type_mismatch() {
        let k = Kernel::new(Vec::<u8>::new(), "dd", "", vec![Constant::Bool(true)]).unwrap();
        assert!(RegisterFile::new(&k, &k.string_widths(&[]), 4).is_err());
    }
}
