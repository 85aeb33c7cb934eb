//! Opcode handlers
//!
//! Each canonical opcode maps to one handler in a 256-entry table indexed by
//! the canonical byte. Handlers never advance the pc themselves; they return
//! a [`Flow`] and the engine applies it.

use std::time::Duration;

use bytecode_system::{Constant, Container, DecodeError, Instruction, Opcode, PoolRef};
use core_types::{FaultKind, Value};
use rand::Rng;

use crate::call_frame::CallFrame;
use crate::context::{BuiltinSlots, RuntimeState};
use crate::error::Fault;
use crate::narration;
use crate::output::OutputSink;

/// What the engine does after a handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next instruction
    Next,
    /// Continue at the given offset
    Jump(usize),
    /// Stop the run as completed
    Halt,
}

/// Read-only surroundings a handler may need
pub(crate) struct ExecEnv<'a> {
    pub(crate) container: &'a Container,
    pub(crate) output: &'a dyn OutputSink,
    pub(crate) builtins: BuiltinSlots,
    pub(crate) sleep_ceiling: Duration,
}

pub(crate) type Handler =
    fn(&mut RuntimeState, &ExecEnv<'_>, &Instruction) -> Result<Flow, Fault>;

static HANDLERS: [Option<Handler>; 256] = {
    let mut table: [Option<Handler>; 256] = [None; 256];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let op = Opcode::ALL[i];
        table[op as usize] = Some(handler_for(op));
        i += 1;
    }
    table
};

const fn handler_for(op: Opcode) -> Handler {
    match op {
        Opcode::Nop => op_nop,
        Opcode::Push => op_push,
        Opcode::Pop => op_pop,
        Opcode::Load => op_load,
        Opcode::Store => op_store,
        Opcode::Print => op_print,
        Opcode::Add => op_add,
        Opcode::Sub => op_sub,
        Opcode::Mul => op_mul,
        Opcode::Div => op_div,
        Opcode::Mod => op_mod,
        Opcode::Eq => op_eq,
        Opcode::Lt => op_lt,
        Opcode::Gt => op_gt,
        Opcode::Jump => op_jump,
        Opcode::JumpIfFalse => op_jump_if_false,
        Opcode::Call => op_call,
        Opcode::Ret => op_ret,
        Opcode::Deplete => op_deplete,
        Opcode::ForceTerminate => op_force_terminate,
        Opcode::Repeat => op_repeat,
        Opcode::Sleep => op_sleep,
        Opcode::End => op_end,
    }
}

/// Look up the handler for a canonical opcode
pub(crate) fn handler(op: Opcode) -> Result<Handler, Fault> {
    HANDLERS[op.byte() as usize].ok_or_else(|| {
        Fault::new(
            FaultKind::Decode,
            format!("no handler for opcode 0x{:02X}", op.byte()),
        )
    })
}

fn operand(instr: &Instruction) -> Result<u16, Fault> {
    instr.operand.ok_or_else(|| {
        Fault::from(DecodeError::TruncatedOperand {
            offset: instr.address,
        })
    })
}

/// Convert a pool constant into a runtime value
pub(crate) fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::Int(n) => Value::Int(*n),
        Constant::Float(n) => Value::Float(*n),
        Constant::Str(s) => Value::Str(s.clone()),
        Constant::None => Value::None,
    }
}

// Stack and variables

fn op_nop(_: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    Ok(Flow::Next)
}

fn op_push(state: &mut RuntimeState, env: &ExecEnv<'_>, instr: &Instruction) -> Result<Flow, Fault> {
    let value = match PoolRef::from_operand(operand(instr)?) {
        PoolRef::Constant(idx) => constant_value(env.container.constant(idx)?),
        PoolRef::String(idx) => Value::Str(env.container.string(idx)?.to_string()),
    };
    state.push(value);
    Ok(Flow::Next)
}

fn op_pop(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    state.pop("POP")?;
    Ok(Flow::Next)
}

fn op_load(state: &mut RuntimeState, env: &ExecEnv<'_>, instr: &Instruction) -> Result<Flow, Fault> {
    let value = state.load(operand(instr)?, env.builtins);
    state.push(value);
    Ok(Flow::Next)
}

fn op_store(state: &mut RuntimeState, env: &ExecEnv<'_>, instr: &Instruction) -> Result<Flow, Fault> {
    let slot = operand(instr)?;
    let value = state.pop("STORE")?;
    state.store(slot, value, env.builtins)?;
    Ok(Flow::Next)
}

fn op_print(state: &mut RuntimeState, env: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let value = state.pop("PRINT")?;
    env.output.write_line(&value.to_string());
    Ok(Flow::Next)
}

// Arithmetic and comparison

fn op_add(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("ADD")?;
    state.push(add(a, b)?);
    Ok(Flow::Next)
}

fn op_sub(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("SUB")?;
    state.push(numeric("SUB", a, b, i64::wrapping_sub, |x, y| x - y)?);
    Ok(Flow::Next)
}

fn op_mul(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("MUL")?;
    state.push(numeric("MUL", a, b, i64::wrapping_mul, |x, y| x * y)?);
    Ok(Flow::Next)
}

fn op_div(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("DIV")?;
    if b.is_zero() {
        return Err(Fault::arithmetic("division by zero"));
    }
    state.push(numeric("DIV", a, b, floor_div, |x, y| x / y)?);
    Ok(Flow::Next)
}

fn op_mod(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("MOD")?;
    if b.is_zero() {
        return Err(Fault::arithmetic("modulo by zero"));
    }
    state.push(numeric("MOD", a, b, floor_mod, floor_mod_f64)?);
    Ok(Flow::Next)
}

fn op_eq(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("EQ")?;
    state.push(flag(equal(&a, &b)));
    Ok(Flow::Next)
}

fn op_lt(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("LT")?;
    let ordering = compare("LT", &a, &b)?;
    state.push(flag(ordering == std::cmp::Ordering::Less));
    Ok(Flow::Next)
}

fn op_gt(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let (a, b) = state.pop_pair("GT")?;
    let ordering = compare("GT", &a, &b)?;
    state.push(flag(ordering == std::cmp::Ordering::Greater));
    Ok(Flow::Next)
}

// Control flow

fn op_jump(_: &mut RuntimeState, _: &ExecEnv<'_>, instr: &Instruction) -> Result<Flow, Fault> {
    Ok(Flow::Jump(operand(instr)? as usize))
}

fn op_jump_if_false(
    state: &mut RuntimeState,
    _: &ExecEnv<'_>,
    instr: &Instruction,
) -> Result<Flow, Fault> {
    let target = operand(instr)?;
    let cond = state.pop("JIF")?;
    if cond.is_truthy() {
        Ok(Flow::Next)
    } else {
        Ok(Flow::Jump(target as usize))
    }
}

fn op_call(state: &mut RuntimeState, _: &ExecEnv<'_>, instr: &Instruction) -> Result<Flow, Fault> {
    let target = operand(instr)?;
    state.call_frames.push(CallFrame::new(instr.next_address()));
    Ok(Flow::Jump(target as usize))
}

fn op_ret(state: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    match state.call_frames.pop() {
        Some(frame) => Ok(Flow::Jump(frame.return_address)),
        None => Ok(Flow::Halt),
    }
}

fn op_repeat(state: &mut RuntimeState, _: &ExecEnv<'_>, instr: &Instruction) -> Result<Flow, Fault> {
    let target = operand(instr)?;
    let Some(top) = state.stack.last_mut() else {
        return Ok(Flow::Next);
    };
    let again = match top {
        Value::Int(n) if *n > 1 => {
            *n -= 1;
            true
        }
        Value::Float(n) if *n > 1.0 => {
            *n -= 1.0;
            true
        }
        Value::Int(_) | Value::Float(_) => false,
        other => {
            return Err(Fault::arithmetic(format!(
                "REPEAT counter must be numeric, got {}",
                other.type_name()
            )))
        }
    };
    if again {
        Ok(Flow::Jump(target as usize))
    } else {
        state.stack.pop();
        Ok(Flow::Next)
    }
}

fn op_end(_: &mut RuntimeState, _: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    Ok(Flow::Halt)
}

// Domain opcodes

fn op_deplete(state: &mut RuntimeState, env: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let percent = state.pop("DEPLETE")?.as_f64().unwrap_or(0.0);
    let amount = (state.budget as f64 * (percent / 100.0)).trunc() as i64;

    // Counters saturate; negative or huge percents must not overflow
    state.budget = state.budget.saturating_sub(amount);
    state.cumulative_depletion = state.cumulative_depletion.saturating_add(amount);
    state.timeline = state.timeline.saturating_add(state.rng.gen_range(2..=8));

    let line = format!("{} (-{})", narration::pick(&mut state.rng), amount);
    env.output.write_line(&line);

    if state.budget <= 0 {
        state.budget = 0;
        return Err(Fault::new(
            FaultKind::BudgetExhausted,
            "budget exhausted, project audited",
        ));
    }
    Ok(Flow::Next)
}

fn op_force_terminate(
    state: &mut RuntimeState,
    env: &ExecEnv<'_>,
    _: &Instruction,
) -> Result<Flow, Fault> {
    let info = state.pop("FORCE_TERMINATE")?;
    env.output.write_line(&format!("PROJECT ABANDONED: {}", info));
    Err(Fault::new(
        FaultKind::ForcedTermination,
        format!("project abandoned: {}", info),
    ))
}

fn op_sleep(state: &mut RuntimeState, env: &ExecEnv<'_>, _: &Instruction) -> Result<Flow, Fault> {
    let millis = match state.pop("SLEEP")? {
        Value::Int(n) => n.max(0) as f64,
        Value::Float(n) if n.is_finite() => n.max(0.0),
        other => {
            return Err(Fault::arithmetic(format!(
                "SLEEP duration must be numeric, got {}",
                other.type_name()
            )))
        }
    };
    let ceiling_ms = env.sleep_ceiling.as_secs_f64() * 1000.0;
    let duration = Duration::from_secs_f64(millis.min(ceiling_ms) / 1000.0);
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
    Ok(Flow::Next)
}

// Value helpers

fn flag(b: bool) -> Value {
    Value::Int(i64::from(b))
}

fn add(a: Value, b: Value) -> Result<Value, Fault> {
    match (&a, &b) {
        (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{}{}", a, b))),
        _ => numeric("ADD", a, b, i64::wrapping_add, |x, y| x + y),
    }
}

fn numeric(
    op: &str,
    a: Value,
    b: Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, Fault> {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int_op(*x, *y))),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(float_op(x, y))),
            _ => Err(Fault::arithmetic(format!(
                "{} does not support {} and {}",
                op,
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn floor_mod_f64(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::None, Value::None) => true,
        _ => matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y),
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> Result<std::cmp::Ordering, Fault> {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            // NaN is neither less nor greater
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => Err(Fault::arithmetic(format!(
                "{} cannot compare {} and {}",
                op,
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}
