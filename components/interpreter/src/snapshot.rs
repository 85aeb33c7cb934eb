//! Read-only view of engine state

use core_types::FaultKind;
use serde::Serialize;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// More instructions may execute
    Running,
    /// Reached `END`, the end of the stream, or `RET` with no frame
    Completed,
    /// Stopped by a fault
    Failed(FaultKind),
    /// Stopped by the step governor
    LimitExceeded,
}

impl Status {
    /// Whether the run can no longer make progress
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Running)
    }
}

/// State of an engine at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Offset of the next instruction, or of the faulting one
    pub pc: usize,
    /// Number of values on the operand stack
    pub stack_depth: usize,
    /// Remaining budget
    pub budget: i64,
    /// Progress counter
    pub progress: i64,
    /// Total amount removed by `DEPLETE`
    pub cumulative_depletion: i64,
    /// Simulated delay accumulated by `DEPLETE`
    pub timeline: i64,
    /// Steps counted by the governor
    pub step_count: u64,
    /// Run status
    pub status: Status,
}
