//! Structural obfuscation of a container
//!
//! Pipeline: decode the plain stream, optionally reorder blocks, optionally
//! sprinkle filler, lay the result out once, relocate every control-transfer
//! operand and write the bytes through the opcode mapping.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytecode_system::{
    decode_all, Container, Instruction, Metadata, ObfuscationInfo, ObfuscationLevel, Opcode,
    CURRENT_VERSION,
};
use rand::Rng;
use tracing::{debug, info};

use crate::blocks;
use crate::error::ObfuscationError;
use crate::layout::{assign_addresses, Filler, RelocationTable, Slot, SlotKind};
use crate::mapping::{derived_rng, stream, OpcodeMapping};

/// Default probability of inserting filler before an instruction
pub const DEFAULT_JUNK_RATIO: f64 = 0.2;

/// Size of the decoy pool drawn from the mapping
const DECOY_POOL: usize = 10;

/// Result of an obfuscation run
#[derive(Debug, Clone, PartialEq)]
pub struct ObfuscationOutput {
    /// Obfuscated container
    pub container: Container,
    relocation: RelocationTable,
}

impl ObfuscationOutput {
    /// Where each original instruction ended up
    pub fn relocation_table(&self) -> &RelocationTable {
        &self.relocation
    }

    /// Take the obfuscated container
    pub fn into_container(self) -> Container {
        self.container
    }
}

/// Rewrites plain containers into obfuscated ones
#[derive(Debug, Clone)]
pub struct Obfuscator {
    mapping: Arc<OpcodeMapping>,
    level: ObfuscationLevel,
    junk_ratio: f64,
}

impl Obfuscator {
    /// Create an obfuscator at level 1 with the default junk ratio
    pub fn new(mapping: Arc<OpcodeMapping>) -> Self {
        Self {
            mapping,
            level: ObfuscationLevel::Remap,
            junk_ratio: DEFAULT_JUNK_RATIO,
        }
    }

    /// Set the obfuscation level
    pub fn with_level(mut self, level: ObfuscationLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the filler probability, clamped to `0.0..=1.0`
    pub fn with_junk_ratio(mut self, ratio: f64) -> Self {
        self.junk_ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        self
    }

    /// The mapping used for substitution
    pub fn mapping(&self) -> &Arc<OpcodeMapping> {
        &self.mapping
    }

    /// Obfuscate a plain container.
    ///
    /// Pools and variables are carried over unchanged. The output is a
    /// function of the input, the mapping seed, the level and the ratio.
    pub fn obfuscate(&self, container: &Container) -> Result<ObfuscationOutput, ObfuscationError> {
        if let Some(info) = container.metadata.obfuscation {
            return Err(ObfuscationError::InvariantViolation(format!(
                "container is already obfuscated (seed {}, level {})",
                info.seed,
                info.level.as_u8()
            )));
        }

        let original_len = container.code.len();
        let instrs = decode_all(&container.code, None)?;
        check_targets(&instrs, original_len)?;

        let mut slots: Vec<Slot> = instrs.iter().map(Slot::original).collect();

        if self.level >= ObfuscationLevel::Reorder {
            let mut rng = derived_rng(self.mapping.seed(), stream::BLOCKS);
            slots = blocks::reorder(slots, &mut rng)?;
        }

        let mut fillers = 0;
        if self.level >= ObfuscationLevel::Junk {
            let before = slots.len();
            slots = self.insert_filler(slots);
            fillers = slots.len() - before;
        }

        let relocation = assign_addresses(&mut slots, original_len);
        let code = self.encode(&slots, &relocation)?;

        info!(
            seed = self.mapping.seed(),
            level = self.level.as_u8(),
            original_len,
            new_len = code.len(),
            fillers,
            "obfuscation complete"
        );

        let obfuscated = Container {
            code,
            constants: container.constants.clone(),
            strings: container.strings.clone(),
            metadata: Metadata {
                version: CURRENT_VERSION,
                variables: container.metadata.variables.clone(),
                obfuscation: Some(ObfuscationInfo {
                    seed: self.mapping.seed(),
                    level: self.level,
                }),
            },
        };
        Ok(ObfuscationOutput {
            container: obfuscated,
            relocation,
        })
    }

    fn insert_filler(&self, slots: Vec<Slot>) -> Vec<Slot> {
        let mut rng = derived_rng(self.mapping.seed(), stream::FILLER);
        let decoys = self.mapping.decoy_values(DECOY_POOL);
        let mut out = Vec::with_capacity(slots.len() * 2);

        for slot in slots {
            if rng.gen_bool(self.junk_ratio) {
                let filler = if decoys.is_empty() || rng.gen_bool(0.5) {
                    Filler::MappedNop
                } else {
                    let decoy = decoys[rng.gen_range(0..decoys.len())];
                    if rng.gen_bool(0.5) {
                        Filler::PaddedDecoy(decoy)
                    } else {
                        Filler::Decoy(decoy)
                    }
                };
                out.push(Slot::filler(filler));
            }
            out.push(slot);
        }
        out
    }

    fn encode(&self, slots: &[Slot], relocation: &RelocationTable) -> Result<Vec<u8>, ObfuscationError> {
        let mut code = Vec::with_capacity(relocation.new_len());
        for slot in slots {
            match slot.kind {
                SlotKind::Instr { opcode, operand } => {
                    code.push(self.mapping.obfuscate(opcode));
                    if let Some(operand) = operand {
                        let operand = if opcode.is_control_transfer() {
                            relocate(slot, operand, relocation)?
                        } else {
                            operand
                        };
                        code.extend_from_slice(&operand.to_le_bytes());
                    }
                }
                SlotKind::Filler(Filler::MappedNop) => code.push(self.mapping.obfuscate(Opcode::Nop)),
                SlotKind::Filler(Filler::Decoy(b)) => code.push(b),
                SlotKind::Filler(Filler::PaddedDecoy(b)) => code.extend_from_slice(&[b, 0, 0]),
            }
        }
        debug_assert_eq!(code.len(), relocation.new_len());
        Ok(code)
    }
}

fn relocate(slot: &Slot, target: u16, relocation: &RelocationTable) -> Result<u16, ObfuscationError> {
    let new_target = relocation.resolve(target as usize).ok_or_else(|| {
        ObfuscationError::InvariantViolation(format!(
            "control transfer at new offset {} targets {}, which is not an instruction boundary",
            slot.new_address, target
        ))
    })?;
    debug!(from = target, to = new_target, "relocated target");
    u16::try_from(new_target).map_err(|_| {
        ObfuscationError::InvariantViolation(format!(
            "relocated target {} does not fit a 16-bit operand",
            new_target
        ))
    })
}

/// Every control-transfer operand must start an instruction or be the end offset
fn check_targets(instrs: &[Instruction], len: usize) -> Result<(), ObfuscationError> {
    let boundaries: BTreeSet<usize> = instrs.iter().map(|i| i.address).collect();
    for instr in instrs {
        if let Some(target) = instr.target() {
            if target != len && !boundaries.contains(&target) {
                return Err(ObfuscationError::InvariantViolation(format!(
                    "{} at offset {} targets {}, which is not an instruction boundary",
                    instr.opcode.name(),
                    instr.address,
                    target
                )));
            }
        }
    }
    Ok(())
}
