//! Jump-safe basic block reordering
//!
//! The stream is cut at every jump target and after every terminator. Blocks
//! that can fall through get an explicit `JUMP` to their original successor,
//! after which every block except the entry one may be placed anywhere.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::error::ObfuscationError;
use crate::layout::{address_operand, Slot, SlotKind};

/// A run of original slots with a single entry point
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) start: usize,
    pub(crate) slots: Vec<Slot>,
}

/// Split slots of an unmodified stream into basic blocks
pub(crate) fn split(slots: Vec<Slot>) -> Vec<Block> {
    let mut leaders = BTreeSet::new();
    for slot in &slots {
        if let (SlotKind::Instr { opcode, operand }, Some(address)) =
            (slot.kind, slot.original_address)
        {
            if opcode.is_control_transfer() {
                if let Some(target) = operand {
                    leaders.insert(target as usize);
                }
            }
            if opcode.is_terminator() {
                leaders.insert(address + opcode.width());
            }
        }
    }

    let mut blocks: Vec<Block> = Vec::new();
    for slot in slots {
        let address = slot.original_address.unwrap_or(0);
        let starts_block = blocks.is_empty() || leaders.contains(&address);
        if starts_block {
            blocks.push(Block {
                start: address,
                slots: Vec::new(),
            });
        }
        if let Some(block) = blocks.last_mut() {
            block.slots.push(slot);
        }
    }
    blocks
}

/// End offset of a block in the original stream
fn block_end(block: &Block) -> usize {
    block
        .slots
        .last()
        .and_then(|s| s.original_address.map(|a| a + s.width()))
        .unwrap_or(block.start)
}

/// Whether execution can run off the end of the block
fn falls_through(block: &Block) -> bool {
    match block.slots.last().map(|s| s.kind) {
        Some(SlotKind::Instr { opcode, .. }) => !opcode.is_unconditional_terminator(),
        _ => true,
    }
}

/// Reorder the blocks of a stream, keeping the entry block first
pub(crate) fn reorder<R: Rng + ?Sized>(
    slots: Vec<Slot>,
    rng: &mut R,
) -> Result<Vec<Slot>, ObfuscationError> {
    let mut blocks = split(slots);
    for block in &mut blocks {
        if falls_through(block) {
            let successor = address_operand(block_end(block))?;
            block.slots.push(Slot::synthesized_jump(successor));
        }
    }

    if blocks.len() > 2 {
        blocks[1..].shuffle(rng);
    }
    debug!(
        blocks = blocks.len(),
        order = ?blocks.iter().map(|b| b.start).collect::<Vec<_>>(),
        "blocks reordered"
    );

    Ok(blocks.into_iter().flat_map(|b| b.slots).collect())
}
