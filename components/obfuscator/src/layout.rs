//! Working view of a stream being rewritten
//!
//! Slots carry the original address of every surviving instruction so
//! control-transfer operands can be relocated after the final layout is known.

use std::collections::BTreeMap;

use bytecode_system::{Instruction, Opcode};
use serde::Serialize;

use crate::error::ObfuscationError;

/// Junk emitted between real instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Filler {
    /// The mapped `NOP` byte
    MappedNop,
    /// One decoy byte
    Decoy(u8),
    /// A decoy byte followed by two zero bytes, shaped like an operand
    PaddedDecoy(u8),
}

impl Filler {
    fn width(self) -> usize {
        match self {
            Filler::MappedNop | Filler::Decoy(_) => 1,
            Filler::PaddedDecoy(_) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    /// A real instruction; control-transfer operands hold original addresses
    Instr { opcode: Opcode, operand: Option<u16> },
    Filler(Filler),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) kind: SlotKind,
    /// `None` for synthesized fillers and fall-through jumps
    pub(crate) original_address: Option<usize>,
    pub(crate) new_address: usize,
}

impl Slot {
    pub(crate) fn original(instr: &Instruction) -> Self {
        Self {
            kind: SlotKind::Instr {
                opcode: instr.opcode,
                operand: instr.operand,
            },
            original_address: Some(instr.address),
            new_address: 0,
        }
    }

    pub(crate) fn synthesized_jump(target: u16) -> Self {
        Self {
            kind: SlotKind::Instr {
                opcode: Opcode::Jump,
                operand: Some(target),
            },
            original_address: None,
            new_address: 0,
        }
    }

    pub(crate) fn filler(filler: Filler) -> Self {
        Self {
            kind: SlotKind::Filler(filler),
            original_address: None,
            new_address: 0,
        }
    }

    pub(crate) fn width(&self) -> usize {
        match self.kind {
            SlotKind::Instr { opcode, .. } => opcode.width(),
            SlotKind::Filler(f) => f.width(),
        }
    }
}

/// Original instruction offset to rewritten offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelocationTable {
    entries: BTreeMap<usize, usize>,
    original_len: usize,
    new_len: usize,
}

impl RelocationTable {
    /// New offset of the instruction that started at `original`
    pub fn get(&self, original: usize) -> Option<usize> {
        self.entries.get(&original).copied()
    }

    /// Resolve a control-transfer target.
    ///
    /// The one-past-the-end offset of the original stream maps to the end of
    /// the new stream; any other offset must start an instruction.
    pub fn resolve(&self, target: usize) -> Option<usize> {
        if target == self.original_len {
            Some(self.new_len)
        } else {
            self.get(target)
        }
    }

    /// Entries in original address order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries.iter().map(|(o, n)| (*o, *n))
    }

    /// Number of relocated instructions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the stream before rewriting
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    /// Length of the stream after rewriting
    pub fn new_len(&self) -> usize {
        self.new_len
    }
}

/// Assign new offsets in one linear pass and record where originals moved
pub(crate) fn assign_addresses(slots: &mut [Slot], original_len: usize) -> RelocationTable {
    let mut entries = BTreeMap::new();
    let mut cursor = 0;
    for slot in slots.iter_mut() {
        slot.new_address = cursor;
        if let Some(original) = slot.original_address {
            entries.insert(original, cursor);
        }
        cursor += slot.width();
    }
    RelocationTable {
        entries,
        original_len,
        new_len: cursor,
    }
}

/// Convert an original address into a jump operand
pub(crate) fn address_operand(address: usize) -> Result<u16, ObfuscationError> {
    u16::try_from(address).map_err(|_| {
        ObfuscationError::InvariantViolation(format!(
            "address {} does not fit a 16-bit operand",
            address
        ))
    })
}
