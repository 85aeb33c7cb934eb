//! Instruction decoding shared by the engine, the disassembler and the obfuscator
//!
//! Every consumer walks the code stream through [`decode_one`] or
//! [`InstructionIter`], so operand widths are defined in exactly one place.

use crate::error::DecodeError;
use crate::opcode::{Opcode, OPERAND_WIDTH, STRING_REF_FLAG};

/// Translation between stored opcode bytes and canonical opcodes.
///
/// Implemented by opcode mappings. Plain streams are decoded without one.
pub trait OpcodeTranslator: Send + Sync {
    /// Canonical byte for a stored byte, `None` if the byte is not a substitute
    fn to_canonical(&self, stored: u8) -> Option<u8>;

    /// Stored byte that represents the canonical opcode byte
    fn to_substitute(&self, canonical: u8) -> u8;
}

/// Which pool a `PUSH` operand refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRef {
    /// Index into the constant pool
    Constant(usize),
    /// Index into the string pool
    String(usize),
}

impl PoolRef {
    /// Split a `PUSH` operand on its string flag
    pub fn from_operand(operand: u16) -> Self {
        if operand & STRING_REF_FLAG != 0 {
            PoolRef::String((operand & !STRING_REF_FLAG) as usize)
        } else {
            PoolRef::Constant(operand as usize)
        }
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Canonical opcode
    pub opcode: Opcode,
    /// Little-endian operand, present exactly when the opcode takes one
    pub operand: Option<u16>,
    /// Offset of the opcode byte in the stream
    pub address: usize,
}

impl Instruction {
    /// Encoded width in bytes
    pub fn width(&self) -> usize {
        self.opcode.width()
    }

    /// Offset of the following instruction
    pub fn next_address(&self) -> usize {
        self.address + self.width()
    }

    /// Jump target of a control-transfer instruction
    pub fn target(&self) -> Option<usize> {
        if self.opcode.is_control_transfer() {
            self.operand.map(usize::from)
        } else {
            None
        }
    }

    /// Pool reference of a `PUSH`
    pub fn pool_ref(&self) -> Option<PoolRef> {
        match (self.opcode, self.operand) {
            (Opcode::Push, Some(operand)) => Some(PoolRef::from_operand(operand)),
            _ => None,
        }
    }
}

/// Decode the instruction starting at `offset`.
///
/// With a translator, bytes that are not substitutes decode as `NOP`: they
/// are filler planted by the obfuscator. Without one, such bytes are an
/// [`DecodeError::UnknownOpcode`].
pub fn decode_one(
    code: &[u8],
    offset: usize,
    translator: Option<&dyn OpcodeTranslator>,
) -> Result<Instruction, DecodeError> {
    let stored = *code.get(offset).ok_or(DecodeError::OffsetOutOfRange {
        offset,
        len: code.len(),
    })?;

    let opcode = match translator {
        Some(t) => match t.to_canonical(stored) {
            Some(canonical) => Opcode::from_byte(canonical).ok_or(DecodeError::UnknownOpcode {
                byte: stored,
                offset,
            })?,
            None => Opcode::Nop,
        },
        None => Opcode::from_byte(stored).ok_or(DecodeError::UnknownOpcode {
            byte: stored,
            offset,
        })?,
    };

    let operand = if opcode.has_operand() {
        let start = offset + 1;
        let raw = code
            .get(start..start + OPERAND_WIDTH)
            .ok_or(DecodeError::TruncatedOperand { offset })?;
        Some(u16::from_le_bytes([raw[0], raw[1]]))
    } else {
        None
    };

    Ok(Instruction {
        opcode,
        operand,
        address: offset,
    })
}

/// Linear walk over a code stream.
///
/// Yields one `Result` per instruction and stops after the first error.
pub struct InstructionIter<'a> {
    code: &'a [u8],
    offset: usize,
    translator: Option<&'a dyn OpcodeTranslator>,
    failed: bool,
}

impl<'a> InstructionIter<'a> {
    /// Walk a plain stream
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            offset: 0,
            translator: None,
            failed: false,
        }
    }

    /// Walk a stream whose opcode bytes go through `translator`
    pub fn with_translator(code: &'a [u8], translator: Option<&'a dyn OpcodeTranslator>) -> Self {
        Self {
            code,
            offset: 0,
            translator,
            failed: false,
        }
    }
}

impl Iterator for InstructionIter<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.code.len() {
            return None;
        }
        match decode_one(self.code, self.offset, self.translator) {
            Ok(instr) => {
                self.offset = instr.next_address();
                Some(Ok(instr))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for InstructionIter<'_> {}

/// Decode a whole stream, failing on the first bad instruction
pub fn decode_all(
    code: &[u8],
    translator: Option<&dyn OpcodeTranslator>,
) -> Result<Vec<Instruction>, DecodeError> {
    InstructionIter::with_translator(code, translator).collect()
}
