//! Bytecode container - the unit of compiled code on disk and in memory
//!
//! Holds the instruction stream, the constant and string pools, and the
//! metadata produced by the compiler or the obfuscator.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::constant::Constant;
use crate::error::{ContainerError, DecodeError};
use crate::opcode::{Opcode, STRING_REF_FLAG};

/// Magic bytes at the start of every container
pub const MAGIC: &[u8; 4] = b"HBC\0";

/// Newest container version this build reads and writes
pub const CURRENT_VERSION: u16 = 4;

/// First version that carries the metadata trailer
pub const METADATA_VERSION: u16 = 4;

/// Largest string pool index a `PUSH` operand can address
pub const MAX_STRING_INDEX: u16 = STRING_REF_FLAG - 1;

/// How aggressively a stream was disguised
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ObfuscationLevel {
    /// Opcode substitution only
    Remap = 1,
    /// Substitution plus filler instructions and relocation
    Junk = 2,
    /// Level 2 plus jump-safe basic block reordering
    Reorder = 3,
}

impl ObfuscationLevel {
    /// Parse the numeric level stored in metadata
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            1 => Some(ObfuscationLevel::Remap),
            2 => Some(ObfuscationLevel::Junk),
            3 => Some(ObfuscationLevel::Reorder),
            _ => None,
        }
    }

    /// Numeric level as stored in metadata
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Seed and level recorded by the obfuscator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObfuscationInfo {
    /// Seed of the opcode mapping
    pub seed: u32,
    /// Applied level
    pub level: ObfuscationLevel,
}

/// Container metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Format version
    pub version: u16,
    /// Variable name to slot id table
    pub variables: BTreeMap<String, u16>,
    /// Present when the code stream is obfuscated
    pub obfuscation: Option<ObfuscationInfo>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            variables: BTreeMap::new(),
            obfuscation: None,
        }
    }
}

/// A compiled program: code stream, pools and metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Container {
    /// Encoded instruction stream
    pub code: Vec<u8>,
    /// Constant pool, addressed by `PUSH` operands without the string flag
    pub constants: Vec<Constant>,
    /// String pool, addressed by `PUSH` operands with the string flag
    pub strings: Vec<String>,
    /// Version, variable table and obfuscation record
    pub metadata: Metadata,
}

impl Container {
    /// Create a new empty container at the current version
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a container around an existing code stream
    pub fn with_code(code: Vec<u8>) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    /// Emit an opcode without operand and return its address
    pub fn emit(&mut self, opcode: Opcode) -> usize {
        let address = self.code.len();
        self.code.push(opcode.byte());
        address
    }

    /// Emit an opcode followed by a little-endian operand and return its address
    pub fn emit_with_operand(&mut self, opcode: Opcode, operand: u16) -> usize {
        let address = self.code.len();
        self.code.push(opcode.byte());
        self.code.extend_from_slice(&operand.to_le_bytes());
        address
    }

    /// Rewrite the operand of an already emitted instruction.
    ///
    /// Used to back-patch forward jumps once the target is known.
    pub fn patch_operand(&mut self, address: usize, operand: u16) -> Result<(), DecodeError> {
        let len = self.code.len();
        let byte = *self
            .code
            .get(address)
            .ok_or(DecodeError::OffsetOutOfRange { offset: address, len })?;
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode {
            byte,
            offset: address,
        })?;
        if !opcode.has_operand() || address + 2 >= len {
            return Err(DecodeError::TruncatedOperand { offset: address });
        }
        self.code[address + 1..address + 3].copy_from_slice(&operand.to_le_bytes());
        Ok(())
    }

    /// Add a constant to the constant pool and return its index
    ///
    /// # Panics
    ///
    /// Panics if the pool already holds `u16::MAX` entries.
    pub fn add_constant(&mut self, value: Constant) -> u16 {
        let idx = self.constants.len();
        assert!(idx < u16::MAX as usize, "constant pool is full");
        self.constants.push(value);
        idx as u16
    }

    /// Add a string to the string pool and return its index
    ///
    /// # Panics
    ///
    /// Panics if the index would not fit in a `PUSH` string reference.
    pub fn add_string(&mut self, value: impl Into<String>) -> u16 {
        let idx = self.strings.len();
        assert!(idx <= MAX_STRING_INDEX as usize, "string pool is full");
        self.strings.push(value.into());
        idx as u16
    }

    /// Add a constant and emit the `PUSH` that loads it
    pub fn push_constant(&mut self, value: Constant) -> usize {
        let idx = self.add_constant(value);
        self.emit_with_operand(Opcode::Push, idx)
    }

    /// Add a string and emit the `PUSH` that loads it
    pub fn push_string(&mut self, value: impl Into<String>) -> usize {
        let idx = self.add_string(value);
        self.emit_with_operand(Opcode::Push, string_ref(idx))
    }

    /// Return the slot for `name`, assigning the next free slot if it is new
    pub fn declare_variable(&mut self, name: &str) -> u16 {
        if let Some(&slot) = self.metadata.variables.get(name) {
            return slot;
        }
        let slot = self
            .metadata
            .variables
            .values()
            .max()
            .map_or(0, |max| max + 1);
        self.metadata.variables.insert(name.to_string(), slot);
        slot
    }

    /// Slot of a declared variable
    pub fn variable_slot(&self, name: &str) -> Option<u16> {
        self.metadata.variables.get(name).copied()
    }

    /// Look up a constant pool entry
    pub fn constant(&self, index: usize) -> Result<&Constant, DecodeError> {
        self.constants.get(index).ok_or(DecodeError::BadConstantIndex {
            index,
            len: self.constants.len(),
        })
    }

    /// Look up a string pool entry
    pub fn string(&self, index: usize) -> Result<&str, DecodeError> {
        self.strings
            .get(index)
            .map(String::as_str)
            .ok_or(DecodeError::BadStringIndex {
                index,
                len: self.strings.len(),
            })
    }

    /// Length of the code stream in bytes
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether the code stream is empty
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Serialize the container to the binary format.
    ///
    /// Encoding is deterministic: identical containers give identical bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContainerError> {
        let version = self.metadata.version;
        if version > CURRENT_VERSION {
            return Err(ContainerError::format(format!(
                "cannot encode version {} (newest is {})",
                version, CURRENT_VERSION
            )));
        }
        if version < METADATA_VERSION
            && (!self.metadata.variables.is_empty() || self.metadata.obfuscation.is_some())
        {
            return Err(ContainerError::format(format!(
                "version {} cannot carry metadata, use version {}",
                version, METADATA_VERSION
            )));
        }

        let mut bytes = Vec::with_capacity(16 + self.code.len());

        // Header
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&version.to_le_bytes());

        // Code
        let code_len = u32::try_from(self.code.len())
            .map_err(|_| ContainerError::format("code stream exceeds the u32 length field"))?;
        bytes.extend_from_slice(&code_len.to_le_bytes());
        bytes.extend_from_slice(&self.code);

        // Constants
        bytes.extend_from_slice(&count_u16(self.constants.len(), "constant pool")?.to_le_bytes());
        for constant in &self.constants {
            constant.write_to(&mut bytes)?;
        }

        // Strings
        bytes.extend_from_slice(&count_u16(self.strings.len(), "string pool")?.to_le_bytes());
        for s in &self.strings {
            write_text(&mut bytes, s)?;
        }

        if version >= METADATA_VERSION {
            self.write_metadata(&mut bytes)?;
        }

        Ok(bytes)
    }

    fn write_metadata(&self, bytes: &mut Vec<u8>) -> Result<(), ContainerError> {
        let vars = &self.metadata.variables;
        bytes.extend_from_slice(&count_u16(vars.len(), "variable table")?.to_le_bytes());
        for (name, slot) in vars {
            write_text(bytes, name)?;
            bytes.extend_from_slice(&slot.to_le_bytes());
        }

        match self.metadata.obfuscation {
            Some(info) => {
                bytes.push(1);
                bytes.extend_from_slice(&info.seed.to_le_bytes());
                bytes.push(info.level.as_u8());
            }
            None => bytes.push(0),
        }
        Ok(())
    }

    /// Deserialize a container from the binary format.
    ///
    /// Every declared length must match the buffer exactly; trailing bytes
    /// are rejected. Nothing is returned unless the whole buffer is valid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContainerError> {
        let mut reader = ByteReader::new(bytes);

        if reader.take(4, "magic")? != MAGIC {
            return Err(ContainerError::format("invalid magic number"));
        }

        let version = reader.u16("version")?;
        if version > CURRENT_VERSION {
            return Err(ContainerError::UnsupportedVersion {
                found: version,
                supported: CURRENT_VERSION,
            });
        }

        let code_len = reader.u32("code length")? as usize;
        let code = reader.take(code_len, "code")?.to_vec();

        let const_count = reader.u16("constant count")? as usize;
        let mut constants = Vec::with_capacity(const_count);
        for _ in 0..const_count {
            let (value, consumed) = Constant::from_bytes(reader.rest())?;
            reader.skip(consumed);
            constants.push(value);
        }

        let str_count = reader.u16("string count")? as usize;
        let mut strings = Vec::with_capacity(str_count);
        for _ in 0..str_count {
            strings.push(reader.text("string")?);
        }

        let mut metadata = Metadata {
            version,
            ..Metadata::default()
        };
        if version >= METADATA_VERSION {
            let var_count = reader.u16("variable count")?;
            for _ in 0..var_count {
                let name = reader.text("variable name")?;
                let slot = reader.u16("variable slot")?;
                metadata.variables.insert(name, slot);
            }

            metadata.obfuscation = match reader.u8("obfuscation flag")? {
                0 => None,
                1 => {
                    let seed = reader.u32("obfuscation seed")?;
                    let raw = reader.u8("obfuscation level")?;
                    let level = ObfuscationLevel::from_u8(raw).ok_or_else(|| {
                        ContainerError::format(format!("invalid obfuscation level {}", raw))
                    })?;
                    Some(ObfuscationInfo { seed, level })
                }
                flag => {
                    return Err(ContainerError::format(format!(
                        "invalid obfuscation flag {}",
                        flag
                    )))
                }
            };
        }

        if !reader.rest().is_empty() {
            return Err(ContainerError::format(format!(
                "{} trailing bytes after the last section",
                reader.rest().len()
            )));
        }

        Ok(Self {
            code,
            constants,
            strings,
            metadata,
        })
    }
}

/// Encode a string pool index as a `PUSH` operand
pub fn string_ref(index: u16) -> u16 {
    index | STRING_REF_FLAG
}

fn count_u16(len: usize, what: &str) -> Result<u16, ContainerError> {
    u16::try_from(len)
        .map_err(|_| ContainerError::format(format!("{} has {} entries, limit is 65535", what, len)))
}

fn write_text(bytes: &mut Vec<u8>, s: &str) -> Result<(), ContainerError> {
    let len = u16::try_from(s.len()).map_err(|_| {
        ContainerError::format(format!("string of {} bytes exceeds the u16 length field", s.len()))
    })?;
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked little-endian cursor over a container buffer
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], ContainerError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                ContainerError::format(format!(
                    "{} needs {} bytes at offset {}, buffer has {}",
                    what,
                    n,
                    self.pos,
                    self.bytes.len()
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.bytes.len());
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn u8(&mut self, what: &str) -> Result<u8, ContainerError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, ContainerError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32, ContainerError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn text(&mut self, what: &str) -> Result<String, ContainerError> {
        let len = self.u16(what)? as usize;
        let raw = self.take(len, what)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| ContainerError::format(format!("invalid UTF-8 in {}: {}", what, e)))
    }
}
