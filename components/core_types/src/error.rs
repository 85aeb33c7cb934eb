//! Fault categories for bytecode execution.
//!
//! Every fault is terminal for the executing stream. The engine pairs the
//! kind with a message and the state snapshot taken at the failure point.

use serde::Serialize;
use std::fmt;

/// The kind of fault that stopped an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FaultKind {
    /// Malformed instruction stream or a bad pool reference
    Decode,
    /// An opcode popped from an empty operand stack
    StackUnderflow,
    /// Division by zero or an operation on incompatible operand types
    Arithmetic,
    /// The budget counter reached zero during a depletion
    BudgetExhausted,
    /// The program deliberately aborted itself
    ForcedTermination,
    /// The step governor stopped the run
    StepLimitExceeded,
}

impl FaultKind {
    /// Stable name used in diagnostics and exported snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Decode => "DecodeError",
            FaultKind::StackUnderflow => "StackUnderflow",
            FaultKind::Arithmetic => "ArithmeticError",
            FaultKind::BudgetExhausted => "BudgetExhausted",
            FaultKind::ForcedTermination => "ForcedTermination",
            FaultKind::StepLimitExceeded => "StepLimitExceeded",
        }
    }

    /// Whether the program asked for this failure itself.
    ///
    /// Forced termination is a scripted abort rather than a genuine fault,
    /// so reporting layers can tell the two apart.
    pub fn is_scripted(&self) -> bool {
        matches!(self, FaultKind::ForcedTermination)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
