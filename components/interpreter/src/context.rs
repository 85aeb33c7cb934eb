//! Runtime state owned by one engine

use std::collections::HashMap;

use bytecode_system::Metadata;
use core_types::Value;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::call_frame::CallFrame;
use crate::error::Fault;

/// Budget every run starts with
pub const INITIAL_BUDGET: i64 = 100;

/// Slot used for `budget` when the container does not declare one
pub const DEFAULT_BUDGET_SLOT: u16 = 9998;

/// Slot used for `progress` when the container does not declare one
pub const DEFAULT_PROGRESS_SLOT: u16 = 9999;

/// Slots that alias the built-in counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinSlots {
    /// Slot bound to the budget counter
    pub budget: u16,
    /// Slot bound to the progress counter
    pub progress: u16,
}

impl BuiltinSlots {
    /// Resolve the slots from the container's variable table
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            budget: metadata
                .variables
                .get("budget")
                .copied()
                .unwrap_or(DEFAULT_BUDGET_SLOT),
            progress: metadata
                .variables
                .get("progress")
                .copied()
                .unwrap_or(DEFAULT_PROGRESS_SLOT),
        }
    }
}

impl Default for BuiltinSlots {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET_SLOT,
            progress: DEFAULT_PROGRESS_SLOT,
        }
    }
}

/// Mutable state of one run
#[derive(Debug, Clone)]
pub struct RuntimeState {
    /// Operand stack
    pub stack: Vec<Value>,
    /// Variable slots written by `STORE`
    pub variables: HashMap<u16, Value>,
    /// Offset of the next instruction
    pub pc: usize,
    /// Budget counter
    pub budget: i64,
    /// Progress counter
    pub progress: i64,
    /// Total removed by `DEPLETE`
    pub cumulative_depletion: i64,
    /// Simulated delay accumulated by `DEPLETE`
    pub timeline: i64,
    /// Steps counted by the governor
    pub step_count: u64,
    /// Pending return addresses
    pub call_frames: Vec<CallFrame>,
    pub(crate) rng: ChaCha20Rng,
}

impl RuntimeState {
    /// Fresh state; `None` seeds the generator from entropy
    pub fn new(seed: Option<u32>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(u64::from(seed)),
            None => ChaCha20Rng::from_entropy(),
        };
        Self {
            stack: Vec::with_capacity(64),
            variables: HashMap::new(),
            pc: 0,
            budget: INITIAL_BUDGET,
            progress: 0,
            cumulative_depletion: 0,
            timeline: 0,
            step_count: 0,
            call_frames: Vec::new(),
            rng,
        }
    }

    /// Push a value
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop a value, failing with `StackUnderflow` when empty
    pub(crate) fn pop(&mut self, op: &str) -> Result<Value, Fault> {
        self.stack.pop().ok_or_else(|| Fault::underflow(op))
    }

    /// Pop the right then the left operand of a binary operator
    pub(crate) fn pop_pair(&mut self, op: &str) -> Result<(Value, Value), Fault> {
        let b = self.pop(op)?;
        let a = self.pop(op)?;
        Ok((a, b))
    }

    /// Read a slot. Built-in slots read the live counters; unset slots read `0`.
    pub fn load(&self, slot: u16, builtins: BuiltinSlots) -> Value {
        if slot == builtins.budget {
            Value::Int(self.budget)
        } else if slot == builtins.progress {
            Value::Int(self.progress)
        } else {
            self.variables.get(&slot).cloned().unwrap_or(Value::Int(0))
        }
    }

    /// Write a slot, updating the counter when it is a built-in slot
    pub(crate) fn store(
        &mut self,
        slot: u16,
        value: Value,
        builtins: BuiltinSlots,
    ) -> Result<(), Fault> {
        if slot == builtins.budget || slot == builtins.progress {
            let counter = match value {
                Value::Int(n) => n,
                Value::Float(f) => f.trunc() as i64,
                ref other => {
                    return Err(Fault::arithmetic(format!(
                        "built-in counter cannot hold a {}",
                        other.type_name()
                    )))
                }
            };
            if slot == builtins.budget {
                self.budget = counter;
            } else {
                self.progress = counter;
            }
        }
        self.variables.insert(slot, value);
        Ok(())
    }
}
