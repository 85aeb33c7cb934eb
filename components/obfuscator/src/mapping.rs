//! Seeded opcode substitution
//!
//! A mapping assigns every canonical opcode a distinct substitute byte drawn
//! from `0x10..=0xEF`. The same seed always yields the same mapping, so a
//! mapping can be recreated from its seed alone.

use bytecode_system::{Opcode, OpcodeTranslator};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::error::ObfuscationError;

/// Lowest byte a substitute may take
pub const SUBSTITUTE_MIN: u8 = 0x10;

/// Highest byte a substitute may take
pub const SUBSTITUTE_MAX: u8 = 0xEF;

/// Magic bytes of the opcode table side file
pub const TABLE_MAGIC: &[u8; 4] = b"HBOP";

/// Generator streams derived from one seed
pub(crate) mod stream {
    pub(crate) const MAPPING: u64 = 0;
    pub(crate) const DECOYS: u64 = 1;
    pub(crate) const FILLER: u64 = 2;
    pub(crate) const BLOCKS: u64 = 3;
}

/// Generator for one purpose, derived from a mapping seed
pub(crate) fn derived_rng(seed: u32, stream: u64) -> ChaCha20Rng {
    let mut rng = ChaCha20Rng::seed_from_u64(u64::from(seed));
    rng.set_stream(stream);
    rng
}

/// Bijection between canonical opcodes and substitute bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeMapping {
    seed: u32,
    forward: [u8; 256],
    reverse: [Option<u8>; 256],
}

impl OpcodeMapping {
    /// Generate the mapping for `seed`
    pub fn generate(seed: u32) -> Self {
        let mut rng = derived_rng(seed, stream::MAPPING);
        let mut available: Vec<u8> = (SUBSTITUTE_MIN..=SUBSTITUTE_MAX).collect();
        available.shuffle(&mut rng);

        let mut forward = [0u8; 256];
        let mut reverse = [None; 256];
        for (op, &substitute) in Opcode::ALL.iter().zip(&available) {
            forward[op.byte() as usize] = substitute;
            reverse[substitute as usize] = Some(op.byte());
        }

        Self {
            seed,
            forward,
            reverse,
        }
    }

    /// Seed the mapping was generated from
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Substitute byte for a canonical opcode
    pub fn obfuscate(&self, op: Opcode) -> u8 {
        self.forward[op.byte() as usize]
    }

    /// Canonical byte for a substitute, `None` if the byte is not one
    pub fn deobfuscate(&self, byte: u8) -> Option<u8> {
        self.reverse[byte as usize]
    }

    /// `(canonical, substitute)` pairs in opcode table order
    pub fn pairs(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        Opcode::ALL
            .iter()
            .map(move |op| (op.byte(), self.obfuscate(*op)))
    }

    /// Up to `count` distinct bytes from the substitute range that no opcode uses.
    ///
    /// The selection is a function of the seed and `count`.
    pub fn decoy_values(&self, count: usize) -> Vec<u8> {
        let unused: Vec<u8> = (SUBSTITUTE_MIN..=SUBSTITUTE_MAX)
            .filter(|b| self.reverse[*b as usize].is_none())
            .collect();
        let mut rng = derived_rng(self.seed, stream::DECOYS);
        unused
            .choose_multiple(&mut rng, count.min(unused.len()))
            .copied()
            .collect()
    }

    /// Serialize the opcode table side file
    pub fn write_table(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 2 * Opcode::ALL.len());
        out.extend_from_slice(TABLE_MAGIC);
        out.extend_from_slice(&self.seed.to_le_bytes());
        for (canonical, substitute) in self.pairs() {
            out.push(canonical);
            out.push(substitute);
        }
        out
    }

    /// Load an opcode table side file.
    ///
    /// The mapping is regenerated from the stored seed and every stored pair
    /// must agree with it.
    pub fn read_table(bytes: &[u8]) -> Result<Self, ObfuscationError> {
        if bytes.len() < 8 {
            return Err(ObfuscationError::TableFormat(format!(
                "table needs at least 8 bytes, got {}",
                bytes.len()
            )));
        }
        if &bytes[0..4] != TABLE_MAGIC {
            return Err(ObfuscationError::TableFormat("invalid magic number".into()));
        }
        let seed = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        let pairs = &bytes[8..];
        if pairs.len() % 2 != 0 {
            return Err(ObfuscationError::TableFormat(
                "odd number of bytes in the pair section".into(),
            ));
        }

        let mapping = Self::generate(seed);
        for pair in pairs.chunks_exact(2) {
            let (canonical, found) = (pair[0], pair[1]);
            let op = Opcode::from_byte(canonical).ok_or_else(|| {
                ObfuscationError::TableFormat(format!("0x{:02X} is not an opcode", canonical))
            })?;
            let expected = mapping.obfuscate(op);
            if found != expected {
                return Err(ObfuscationError::TableMismatch {
                    seed,
                    canonical,
                    found,
                    expected,
                });
            }
        }
        Ok(mapping)
    }
}

impl OpcodeTranslator for OpcodeMapping {
    fn to_canonical(&self, stored: u8) -> Option<u8> {
        self.deobfuscate(stored)
    }

    fn to_substitute(&self, canonical: u8) -> u8 {
        match Opcode::from_byte(canonical) {
            Some(op) => self.obfuscate(op),
            None => canonical,
        }
    }
}
