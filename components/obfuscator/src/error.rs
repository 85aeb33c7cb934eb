//! Obfuscation errors

use bytecode_system::{ContainerError, DecodeError};
use thiserror::Error;

/// Failure to obfuscate a container or to load an opcode table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObfuscationError {
    /// A control-transfer target does not land on an instruction boundary
    #[error("relocation invariant violated: {0}")]
    InvariantViolation(String),
    /// The input stream could not be decoded
    #[error("cannot decode input stream: {0}")]
    Decode(#[from] DecodeError),
    /// The input or output container is not representable
    #[error("container error: {0}")]
    Container(#[from] ContainerError),
    /// The opcode table side file is malformed
    #[error("invalid opcode table: {0}")]
    TableFormat(String),
    /// The opcode table disagrees with the mapping its seed generates
    #[error(
        "opcode table does not match seed {seed}: 0x{canonical:02X} is stored as 0x{found:02X}, seed gives 0x{expected:02X}"
    )]
    TableMismatch {
        /// Seed read from the table
        seed: u32,
        /// Canonical opcode byte
        canonical: u8,
        /// Substitute recorded in the table
        found: u8,
        /// Substitute the seed generates
        expected: u8,
    },
}
