//! # FuseVM Disassembler
//!
//! Turn FuseVM bytecode back into assembly text.
//!
//! Two output forms:
//!
//! - [`disassemble`]: annotated listing of a bare program, one slot per
//!   line with its byte offset and raw bytes. Invalid slots are reported
//!   inline and the listing continues.
//! - [`disassemble_kernel`]: register directives plus instructions, in the
//!   syntax `fusevm-assembler` reads back.
//!
//! ## Example
//!
//! ```rust
//! use fusevm_disassembler::disassemble;
//! use fusevm_spec::instruction::encode_into;
//! use fusevm_spec::{Opcode, Program};
//!
//! let mut code = Vec::new();
//! encode_into(Opcode::FuncDDN, &[0, 1, 0], &mut code);
//! let asm = disassemble(&Program::new(code)).unwrap();
//! assert!(asm.contains("func_ddn r0, r1, sqrt"));
//! ```

pub mod error;
pub mod decoder;
pub mod formatter;
pub mod disassembler;

pub use error::{DisassemblerError, Result};
pub use disassembler::{disassemble, disassemble_kernel};
pub use decoder::{decode, decode_all, Decoded};
pub use formatter::{format_constant, format_instruction};

#[cfg(test)]
mod tests {
    use super::*;
    use fusevm_spec::instruction::encode_into;
    use fusevm_spec::{Opcode, Program};

    #[test]
    fn test_public_exports() {
        let _ = DisassemblerError::ProgramLength(3);
        let _ = Decoded::Noop { pc: 0 };
    }

    #[test]
    fn test_decode_and_format() {
        let mut code = Vec::new();
        encode_into(Opcode::GtBDD, &[0, 1, 2], &mut code);
        let inst = decode(&code, 0).unwrap();
        assert_eq!(format_instruction(&inst), "gt_bdd r0, r1, r2");
    }

    #[test]
    fn test_disassemble_reports_invalid_slot() {
        let mut code = vec![0xEE, 0, 0, 0];
        encode_into(Opcode::CopyDD, &[0, 1], &mut code);
        let asm = disassemble(&Program::new(code)).unwrap();
        assert!(asm.contains("# ERROR: Unknown opcode 0xEE at pc 0"));
        assert!(asm.contains("copy_dd r0, r1"));
    }

    #[test]
    fn test_disassemble_ragged_program() {
        let result = disassemble(&Program::new(vec![1, 2, 3, 4, 5]));
        assert!(matches!(result, Err(DisassemblerError::ProgramLength(5))));
    }

    // Cross-crate round trips live in the workspace-level tests/cross_module.rs
}
