//! HambaVM execution engine
//!
//! This crate provides the stack machine that runs HambaVM bytecode:
//! - Shared decoding of plain and obfuscated streams
//! - Opcode dispatch through a handler table
//! - Budget, progress and timeline counters
//! - Step governor, opt-in self-modification and snapshots on every fault
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytecode_system::{Constant, Container, Opcode};
//! use interpreter::{CaptureSink, Engine, EngineConfig, Status};
//!
//! let mut container = Container::new();
//! container.push_constant(Constant::Int(2));
//! container.push_constant(Constant::Int(3));
//! container.emit(Opcode::Add);
//! container.emit(Opcode::Print);
//! container.emit(Opcode::End);
//!
//! let sink = CaptureSink::new();
//! let mut engine = Engine::new(Arc::new(container), EngineConfig::new().with_seed(1))
//!     .with_output(sink.clone());
//! let snapshot = engine.run().unwrap();
//!
//! assert_eq!(sink.lines(), vec!["5"]);
//! assert_eq!(snapshot.status, Status::Completed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call_frame;
pub mod config;
pub mod context;
mod dispatch;
pub mod error;
mod narration;
pub mod output;
pub mod snapshot;
pub mod vm;

// Re-export main types at crate root
pub use call_frame::CallFrame;
pub use config::{EngineConfig, SelfModifyPolicy, DEFAULT_SLEEP_CEILING, DEFAULT_STEP_LIMIT};
pub use context::{BuiltinSlots, RuntimeState, INITIAL_BUDGET};
pub use error::VmError;
pub use output::{CaptureSink, OutputSink, StdoutSink};
pub use snapshot::{Snapshot, Status};
pub use vm::{Engine, StepOutcome};
