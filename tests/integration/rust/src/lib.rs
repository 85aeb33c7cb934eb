//! Integration test suite for HambaVM
//!
//! Shared programs and helpers used by the cross-component tests. Each
//! program is built the way a compiler front end would emit it.

use std::sync::Arc;

use bytecode_system::{Constant, Container, DecodeError, ObfuscationLevel, Opcode};
use interpreter::{CaptureSink, Engine, EngineConfig, Snapshot, VmError};
use obfuscator::{ObfuscationError, Obfuscator, OpcodeMapping};

/// Re-export components for test convenience
pub mod components {
    pub use bytecode_system;
    pub use core_types;
    pub use interpreter;
    pub use obfuscator;
}

/// Everything observable about a finished run, minus layout-dependent fields
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    /// Printed lines
    pub output: Vec<String>,
    /// Final budget
    pub budget: i64,
    /// Final progress
    pub progress: i64,
    /// Total depleted amount
    pub cumulative_depletion: i64,
    /// Final timeline
    pub timeline: i64,
}

impl Observed {
    fn new(snapshot: &Snapshot, output: Vec<String>) -> Self {
        Self {
            output,
            budget: snapshot.budget,
            progress: snapshot.progress,
            cumulative_depletion: snapshot.cumulative_depletion,
            timeline: snapshot.timeline,
        }
    }
}

/// Why a pipeline run did not complete
#[derive(Debug)]
pub enum RunError {
    /// The obfuscator rejected the container
    Obfuscation(ObfuscationError),
    /// The engine faulted; carries the lines printed before the fault
    Vm(VmError, Vec<String>),
}

/// Run a plain container
pub fn run_plain(container: &Container, seed: u32) -> Result<Observed, RunError> {
    run(container.clone(), EngineConfig::new().with_seed(seed))
}

/// Obfuscate `container` with `mapping_seed` and run the result with the
/// matching mapping
pub fn run_obfuscated(
    container: &Container,
    mapping_seed: u32,
    level: ObfuscationLevel,
    junk_ratio: f64,
    seed: u32,
) -> Result<Observed, RunError> {
    let mapping = Arc::new(OpcodeMapping::generate(mapping_seed));
    let output = Obfuscator::new(Arc::clone(&mapping))
        .with_level(level)
        .with_junk_ratio(junk_ratio)
        .obfuscate(container)
        .map_err(RunError::Obfuscation)?;
    run(
        output.into_container(),
        EngineConfig::new().with_seed(seed).with_mapping(mapping),
    )
}

fn run(container: Container, config: EngineConfig) -> Result<Observed, RunError> {
    let sink = CaptureSink::new();
    let mut engine = Engine::new(Arc::new(container), config).with_output(sink.clone());
    match engine.run() {
        Ok(snapshot) => Ok(Observed::new(&snapshot, sink.lines())),
        Err(err) => Err(RunError::Vm(err, sink.lines())),
    }
}

/// Counts `i` down from `n`, printing each value and depleting on every turn.
///
/// The loop has a forward exit (`JUMP_IF_FALSE`) and a backward `JUMP`.
pub fn countdown(n: i64) -> Result<Container, DecodeError> {
    let mut c = Container::new();
    let i = c.declare_variable("i");
    let progress = c.declare_variable("progress");
    let budget = c.declare_variable("budget");

    c.push_constant(Constant::Int(n));
    c.emit_with_operand(Opcode::Store, i);

    let top = c.emit_with_operand(Opcode::Load, i);
    c.push_constant(Constant::Int(0));
    c.emit(Opcode::Gt);
    let exit = c.emit_with_operand(Opcode::JumpIfFalse, 0);
    c.emit_with_operand(Opcode::Load, i);
    c.emit(Opcode::Print);
    c.emit_with_operand(Opcode::Load, progress);
    c.push_constant(Constant::Int(10));
    c.emit(Opcode::Add);
    c.emit_with_operand(Opcode::Store, progress);
    c.push_constant(Constant::Int(10));
    c.emit(Opcode::Deplete);
    c.emit_with_operand(Opcode::Load, i);
    c.push_constant(Constant::Int(1));
    c.emit(Opcode::Sub);
    c.emit_with_operand(Opcode::Store, i);
    c.emit_with_operand(Opcode::Jump, top as u16);

    let done = c.push_string("sisa: ");
    c.emit_with_operand(Opcode::Load, budget);
    c.emit(Opcode::Add);
    c.emit(Opcode::Print);
    c.emit(Opcode::End);
    c.patch_operand(exit, done as u16)?;
    Ok(c)
}

/// Calls a reporting subroutine twice and runs a `REPEAT` loop between calls
pub fn meetings() -> Result<Container, DecodeError> {
    let mut c = Container::new();

    let first_call = c.emit_with_operand(Opcode::Call, 0);
    c.push_constant(Constant::Int(3));
    let body = c.push_string("rapat lagi");
    c.emit(Opcode::Print);
    c.push_constant(Constant::Int(20));
    c.emit(Opcode::Deplete);
    c.emit_with_operand(Opcode::Repeat, body as u16);
    let second_call = c.emit_with_operand(Opcode::Call, 0);
    c.push_constant(Constant::Float(7.5));
    c.push_constant(Constant::Int(2));
    c.emit(Opcode::Mul);
    c.emit(Opcode::Print);
    c.emit(Opcode::End);

    let report = c.push_string("laporan");
    c.emit(Opcode::Print);
    c.push_constant(Constant::Int(5));
    c.emit(Opcode::Deplete);
    c.emit(Opcode::Ret);

    c.patch_operand(first_call, report as u16)?;
    c.patch_operand(second_call, report as u16)?;
    Ok(c)
}

/// Depletes 40%, 80%, then 120% of the budget, which exhausts it
pub fn bankrupt() -> Container {
    let mut c = Container::new();
    let percent = c.declare_variable("percent");
    c.push_constant(Constant::Int(40));
    c.emit_with_operand(Opcode::Store, percent);

    let top = c.emit_with_operand(Opcode::Load, percent);
    c.emit(Opcode::Deplete);
    c.emit_with_operand(Opcode::Load, percent);
    c.push_constant(Constant::Int(40));
    c.emit(Opcode::Add);
    c.emit_with_operand(Opcode::Store, percent);
    c.emit_with_operand(Opcode::Jump, top as u16);
    c
}
