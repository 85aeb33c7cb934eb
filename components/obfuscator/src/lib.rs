//! HambaVM bytecode obfuscator
//!
//! This crate disguises HambaVM code streams without changing behavior:
//! - Seeded opcode substitution with a reproducible side file
//! - Filler instructions built from the mapped `NOP` and decoy bytes
//! - Jump-safe basic block reordering
//! - Relocation of every control-transfer operand
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytecode_system::{decode_all, Container, ObfuscationLevel, Opcode};
//! use obfuscator::{Obfuscator, OpcodeMapping};
//!
//! let mut container = Container::new();
//! container.emit(Opcode::Nop);
//! container.emit(Opcode::End);
//!
//! let mapping = Arc::new(OpcodeMapping::generate(7));
//! let output = Obfuscator::new(Arc::clone(&mapping))
//!     .with_level(ObfuscationLevel::Junk)
//!     .obfuscate(&container)
//!     .unwrap();
//!
//! let ops: Vec<Opcode> = decode_all(&output.container.code, Some(&*mapping))
//!     .unwrap()
//!     .into_iter()
//!     .map(|i| i.opcode)
//!     .filter(|op| *op != Opcode::Nop)
//!     .collect();
//! assert_eq!(ops, vec![Opcode::End]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod blocks;
pub mod error;
mod layout;
pub mod mapping;
pub mod obfuscate;

// Re-export main types at crate root
pub use error::ObfuscationError;
pub use layout::RelocationTable;
pub use mapping::{OpcodeMapping, SUBSTITUTE_MAX, SUBSTITUTE_MIN, TABLE_MAGIC};
pub use obfuscate::{ObfuscationOutput, Obfuscator, DEFAULT_JUNK_RATIO};
