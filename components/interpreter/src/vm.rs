//! Execution engine
//!
//! Fetches instructions through the shared decoder, dispatches them through
//! the handler table and enforces the step governor.

use std::collections::HashMap;
use std::sync::Arc;

use bytecode_system::{decode_one, Container, Instruction, Opcode};
use core_types::FaultKind;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::{BuiltinSlots, RuntimeState};
use crate::dispatch::{self, ExecEnv, Flow};
use crate::error::{Fault, VmError};
use crate::output::{OutputSink, StdoutSink};
use crate::snapshot::{Snapshot, Status};

/// Result of a single [`Engine::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One instruction executed and the run can continue
    Continue,
    /// The run is over; see [`Engine::snapshot`] for the final status
    Finished,
}

/// Stack machine executing one container
///
/// The engine owns a private copy of the code stream. The container is
/// shared read-only and never changes, even when self-modification is on.
pub struct Engine {
    container: Arc<Container>,
    code: Vec<u8>,
    config: EngineConfig,
    state: RuntimeState,
    status: Status,
    builtins: BuiltinSlots,
    output: Box<dyn OutputSink>,
    execution_counts: HashMap<usize, u32>,
    mutations: Vec<usize>,
    last_error: Option<VmError>,
}

impl Engine {
    /// Create an engine for `container`. Output goes to stdout.
    pub fn new(container: Arc<Container>, config: EngineConfig) -> Self {
        let code = container.code.clone();
        let builtins = BuiltinSlots::from_metadata(&container.metadata);
        let state = RuntimeState::new(config.seed);
        debug!(
            code_len = code.len(),
            constants = container.constants.len(),
            strings = container.strings.len(),
            "engine created"
        );
        Self {
            container,
            code,
            config,
            state,
            status: Status::Running,
            builtins,
            output: Box::new(StdoutSink),
            execution_counts: HashMap::new(),
            mutations: Vec::new(),
            last_error: None,
        }
    }

    /// Send program output to `sink`
    pub fn with_output(mut self, sink: impl OutputSink + 'static) -> Self {
        self.output = Box::new(sink);
        self
    }

    /// Run until completion or the first fault.
    ///
    /// Returns the final snapshot on success. Calling `run` on a finished
    /// engine executes nothing. A completed run returns its final snapshot
    /// again; a run stopped by a fault or the step limit returns its error
    /// again.
    pub fn run(&mut self) -> Result<Snapshot, VmError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        info!(
            code_len = self.code.len(),
            obfuscated = self.config.mapping.is_some(),
            step_limit = self.config.step_limit,
            "run starting"
        );
        let delay = self.config.effective_delay();

        while self.step()? == StepOutcome::Continue {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        let snapshot = self.snapshot();
        info!(
            steps = snapshot.step_count,
            budget = snapshot.budget,
            progress = snapshot.progress,
            "run finished"
        );
        Ok(snapshot)
    }

    /// Execute exactly one instruction
    pub fn step(&mut self) -> Result<StepOutcome, VmError> {
        if self.status.is_terminal() {
            return Ok(StepOutcome::Finished);
        }
        if self.state.pc >= self.code.len() {
            self.status = Status::Completed;
            return Ok(StepOutcome::Finished);
        }

        self.state.step_count += 1;
        if self.state.step_count > self.config.step_limit {
            let fault = Fault::new(
                FaultKind::StepLimitExceeded,
                format!("exceeded the limit of {} steps", self.config.step_limit),
            );
            return Err(self.fail(Status::LimitExceeded, fault));
        }

        let instr = match decode_one(&self.code, self.state.pc, self.config.mapping.as_deref()) {
            Ok(instr) => instr,
            Err(e) => return Err(self.fault(e.into())),
        };

        if self.config.debug {
            debug!(
                pc = instr.address,
                op = instr.opcode.name(),
                stack = self.state.stack.len(),
                budget = self.state.budget,
                progress = self.state.progress,
                "execute"
            );
        }

        let handler = match dispatch::handler(instr.opcode) {
            Ok(handler) => handler,
            Err(fault) => return Err(self.fault(fault)),
        };
        let flow = {
            let env = ExecEnv {
                container: &self.container,
                output: self.output.as_ref(),
                builtins: self.builtins,
                sleep_ceiling: self.config.sleep_ceiling,
            };
            handler(&mut self.state, &env, &instr)
        };
        let flow = match flow {
            Ok(flow) => flow,
            Err(fault) => return Err(self.fault(fault)),
        };

        self.track_execution(&instr);

        match flow {
            Flow::Next => self.state.pc = instr.next_address(),
            Flow::Jump(target) => self.state.pc = target,
            Flow::Halt => {
                self.status = Status::Completed;
                return Ok(StepOutcome::Finished);
            }
        }
        Ok(StepOutcome::Continue)
    }

    /// Current state as a read-only snapshot
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pc: self.state.pc,
            stack_depth: self.state.stack.len(),
            budget: self.state.budget,
            progress: self.state.progress,
            cumulative_depletion: self.state.cumulative_depletion,
            timeline: self.state.timeline,
            step_count: self.state.step_count,
            status: self.status,
        }
    }

    /// Runtime state, for inspection
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.status
    }

    /// The engine's private code stream, including self-modifications
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Addresses rewritten by self-modification, in order
    pub fn mutations(&self) -> &[usize] {
        &self.mutations
    }

    /// The container being executed
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    fn track_execution(&mut self, instr: &Instruction) {
        let Some(policy) = self.config.self_modify else {
            return;
        };
        if instr.opcode != policy.opcode {
            return;
        }

        let count = self.execution_counts.entry(instr.address).or_insert(0);
        *count += 1;
        if *count != policy.threshold {
            return;
        }

        let nop = match &self.config.mapping {
            Some(mapping) => mapping.to_substitute(Opcode::Nop.byte()),
            None => Opcode::Nop.byte(),
        };
        self.code[instr.address..instr.next_address()].fill(nop);
        self.mutations.push(instr.address);
        info!(
            address = instr.address,
            opcode = instr.opcode.name(),
            executions = policy.threshold,
            "instruction rewritten to NOP"
        );
    }

    fn fault(&mut self, fault: Fault) -> VmError {
        self.fail(Status::Failed(fault.kind), fault)
    }

    fn fail(&mut self, status: Status, fault: Fault) -> VmError {
        self.status = status;
        let snapshot = self.snapshot();
        warn!(
            kind = %fault.kind,
            pc = snapshot.pc,
            step = snapshot.step_count,
            message = %fault.message,
            "execution fault"
        );
        let err = VmError {
            kind: fault.kind,
            message: fault.message,
            snapshot,
        };
        self.last_error = Some(err.clone());
        err
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("code_len", &self.code.len())
            .field("config", &self.config)
            .field("status", &self.status)
            .field("pc", &self.state.pc)
            .field("stack_depth", &self.state.stack.len())
            .field("mutations", &self.mutations)
            .finish()
    }
}
