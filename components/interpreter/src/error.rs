//! Engine errors

use core_types::FaultKind;
use thiserror::Error;

use crate::snapshot::Snapshot;

/// A fault that stopped a run, with the state at the failure point
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at pc {}: {message}", .snapshot.pc)]
pub struct VmError {
    /// Fault category
    pub kind: FaultKind,
    /// Human-readable detail
    pub message: String,
    /// Engine state when the fault was raised
    pub snapshot: Snapshot,
}

/// Fault raised inside an opcode handler, before the snapshot is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub(crate) kind: FaultKind,
    pub(crate) message: String,
}

impl Fault {
    pub(crate) fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn underflow(op: &str) -> Self {
        Self::new(FaultKind::StackUnderflow, format!("{} on an empty stack", op))
    }

    pub(crate) fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Arithmetic, message)
    }
}

impl From<bytecode_system::DecodeError> for Fault {
    fn from(err: bytecode_system::DecodeError) -> Self {
        Fault::new(FaultKind::Decode, err.to_string())
    }
}
