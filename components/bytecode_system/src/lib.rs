//! HambaVM bytecode system
//!
//! This crate defines the instruction set, the binary container format and
//! the instruction decoder shared by the engine and the obfuscator.
//!
//! # Features
//!
//! - Fixed-width stack instruction set with 2-byte little-endian operands
//! - Versioned binary container with constant, string and metadata sections
//! - One decoder for plain and remapped code streams
//! - Disassembly listings
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Constant, Container, Opcode};
//!
//! let mut container = Container::new();
//! container.push_constant(Constant::Int(5));
//! container.emit(Opcode::Print);
//! container.emit(Opcode::End);
//!
//! let bytes = container.to_bytes().unwrap();
//! let restored = Container::from_bytes(&bytes).unwrap();
//! assert_eq!(restored, container);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constant;
pub mod container;
pub mod disasm;
pub mod error;
pub mod instruction;
pub mod opcode;

// Re-export main types at crate root
pub use constant::Constant;
pub use container::{
    string_ref, Container, Metadata, ObfuscationInfo, ObfuscationLevel, CURRENT_VERSION, MAGIC,
};
pub use disasm::disassemble;
pub use error::{ContainerError, DecodeError};
pub use instruction::{
    decode_all, decode_one, Instruction, InstructionIter, OpcodeTranslator, PoolRef,
};
pub use opcode::{Opcode, OPERAND_WIDTH, STRING_REF_FLAG};
