//! Engine configuration
//!
//! Builder-style settings for one engine run. Every field has a default, so
//! `EngineConfig::default()` runs a plain stream with a fresh random seed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytecode_system::{Opcode, OpcodeTranslator};

/// Default number of steps before the governor stops a run
pub const DEFAULT_STEP_LIMIT: u64 = 100_000;

/// Default upper bound for a single `SLEEP` or inter-instruction delay
pub const DEFAULT_SLEEP_CEILING: Duration = Duration::from_millis(1_000);

/// Rewrite an instruction to `NOP` after it has executed a number of times.
///
/// The rewrite happens in the engine's private copy of the code; the
/// container itself is never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfModifyPolicy {
    /// Opcode whose instructions are watched
    pub opcode: Opcode,
    /// Executions of one instruction before it is rewritten
    pub threshold: u32,
}

impl SelfModifyPolicy {
    /// Watch `opcode` and rewrite each instance after `threshold` executions
    pub fn new(opcode: Opcode, threshold: u32) -> Self {
        Self {
            opcode,
            threshold: threshold.max(1),
        }
    }
}

/// Engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Seed for the engine's random generator; `None` seeds from entropy
    pub seed: Option<u32>,
    /// Maximum number of executed steps
    pub step_limit: u64,
    /// Emit a `debug!` event for every executed instruction
    pub debug: bool,
    /// Pause between instructions
    pub instruction_delay: Duration,
    /// Upper bound for `SLEEP` and the inter-instruction delay
    pub sleep_ceiling: Duration,
    /// Opcode mapping for obfuscated streams
    pub mapping: Option<Arc<dyn OpcodeTranslator>>,
    /// Optional self-modification rule
    pub self_modify: Option<SelfModifyPolicy>,
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the random seed
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the step limit
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Enable per-instruction tracing
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the pause between instructions
    pub fn with_instruction_delay(mut self, delay: Duration) -> Self {
        self.instruction_delay = delay;
        self
    }

    /// Set the ceiling for sleeps and delays
    pub fn with_sleep_ceiling(mut self, ceiling: Duration) -> Self {
        self.sleep_ceiling = ceiling;
        self
    }

    /// Decode the stream through `mapping`
    pub fn with_mapping(mut self, mapping: Arc<dyn OpcodeTranslator>) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Enable self-modification
    pub fn with_self_modify(mut self, policy: SelfModifyPolicy) -> Self {
        self.self_modify = Some(policy);
        self
    }

    /// The inter-instruction delay after clamping
    pub(crate) fn effective_delay(&self) -> Duration {
        self.instruction_delay.min(self.sleep_ceiling)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            step_limit: DEFAULT_STEP_LIMIT,
            debug: false,
            instruction_delay: Duration::ZERO,
            sleep_ceiling: DEFAULT_SLEEP_CEILING,
            mapping: None,
            self_modify: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("seed", &self.seed)
            .field("step_limit", &self.step_limit)
            .field("debug", &self.debug)
            .field("instruction_delay", &self.instruction_delay)
            .field("sleep_ceiling", &self.sleep_ceiling)
            .field("has_mapping", &self.mapping.is_some())
            .field("self_modify", &self.self_modify)
            .finish()
    }
}
