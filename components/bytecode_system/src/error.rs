//! Error types for container loading and instruction decoding

use thiserror::Error;

/// Failure to encode or decode a bytecode container
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// Bad magic, truncated section, invalid text or an unencodable field
    #[error("format error: {0}")]
    Format(String),
    /// The file declares a newer format than this build understands
    #[error("unsupported container version {found} (newest supported is {supported})")]
    UnsupportedVersion {
        /// Version read from the header
        found: u16,
        /// Newest version this build can read
        supported: u16,
    },
}

impl ContainerError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        ContainerError::Format(message.into())
    }
}

/// Failure to decode an instruction or resolve one of its references
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Byte is not a canonical opcode
    #[error("unknown opcode 0x{byte:02X} at offset {offset}")]
    UnknownOpcode {
        /// Offending byte
        byte: u8,
        /// Offset of the byte in the stream
        offset: usize,
    },
    /// Operand-bearing opcode too close to the end of the stream
    #[error("truncated operand for instruction at offset {offset}")]
    TruncatedOperand {
        /// Offset of the opcode byte
        offset: usize,
    },
    /// Decode requested outside the stream
    #[error("offset {offset} is outside the {len}-byte stream")]
    OffsetOutOfRange {
        /// Requested offset
        offset: usize,
        /// Stream length
        len: usize,
    },
    /// Constant pool reference past the end of the pool
    #[error("constant #{index} does not exist (pool has {len})")]
    BadConstantIndex {
        /// Requested index
        index: usize,
        /// Pool length
        len: usize,
    },
    /// String pool reference past the end of the pool
    #[error("string @{index} does not exist (pool has {len})")]
    BadStringIndex {
        /// Requested index
        index: usize,
        /// Pool length
        len: usize,
    },
}
