//! Unit tests for interpreter components

use std::sync::Arc;
use std::time::Duration;

use bytecode_system::{Constant, Container, Opcode};
use core_types::FaultKind;
use interpreter::{
    CaptureSink, Engine, EngineConfig, SelfModifyPolicy, Snapshot, Status, VmError,
};

fn run_with(container: Container, config: EngineConfig) -> (Result<Snapshot, VmError>, Vec<String>) {
    let sink = CaptureSink::new();
    let mut engine = Engine::new(Arc::new(container), config).with_output(sink.clone());
    let result = engine.run();
    (result, sink.lines())
}

fn run(container: Container) -> (Result<Snapshot, VmError>, Vec<String>) {
    run_with(
        container,
        EngineConfig::new()
            .with_seed(42)
            .with_sleep_ceiling(Duration::ZERO),
    )
}

fn push_int(c: &mut Container, n: i64) {
    c.push_constant(Constant::Int(n));
}

// ============================================================================
// Basic execution
// ============================================================================

#[test]
fn test_add_and_print() {
    let mut c = Container::new();
    let a = c.add_constant(Constant::Int(2));
    let b = c.add_constant(Constant::Int(3));
    c.emit_with_operand(Opcode::Push, a);
    c.emit_with_operand(Opcode::Push, b);
    c.emit(Opcode::Add);
    c.emit(Opcode::Print);
    c.emit(Opcode::End);

    let (result, out) = run(c);
    let snap = result.unwrap();
    assert_eq!(out, vec!["5"]);
    assert_eq!(snap.status, Status::Completed);
    assert_eq!(snap.stack_depth, 0);
    assert_eq!(snap.step_count, 5);
}

#[test]
fn test_jump_if_false_skips_print() {
    let mut c = Container::new();
    push_int(&mut c, 0);
    let jif = c.emit_with_operand(Opcode::JumpIfFalse, 0);
    c.push_string("tidak tercetak");
    c.emit(Opcode::Print);
    let end = c.emit(Opcode::End);
    c.patch_operand(jif, end as u16).unwrap();

    let (result, out) = run(c);
    assert!(out.is_empty());
    let snap = result.unwrap();
    assert_eq!(snap.status, Status::Completed);
    assert_eq!(snap.pc, end);
}

#[test]
fn test_jump_if_false_falls_through_on_true() {
    let mut c = Container::new();
    c.push_string("ya");
    let jif = c.emit_with_operand(Opcode::JumpIfFalse, 0);
    c.push_string("tercetak");
    c.emit(Opcode::Print);
    let end = c.emit(Opcode::End);
    c.patch_operand(jif, end as u16).unwrap();

    let (_, out) = run(c);
    assert_eq!(out, vec!["tercetak"]);
}

#[test]
fn test_end_of_stream_completes_without_end() {
    let mut c = Container::new();
    push_int(&mut c, 1);
    c.emit(Opcode::Print);
    let snap = run(c).0.unwrap();
    assert_eq!(snap.status, Status::Completed);
    assert_eq!(snap.step_count, 2);
}

#[test]
fn test_jump_past_end_completes() {
    let mut c = Container::new();
    c.emit_with_operand(Opcode::Jump, 500);
    c.push_string("unreachable");
    c.emit(Opcode::Print);
    let (result, out) = run(c);
    assert_eq!(result.unwrap().status, Status::Completed);
    assert!(out.is_empty());
}

#[test]
fn test_print_formats() {
    let mut c = Container::new();
    c.push_constant(Constant::Float(2.5));
    c.push_constant(Constant::Float(2.5));
    c.emit(Opcode::Add);
    c.emit(Opcode::Print);
    c.push_string("anggaran: ");
    push_int(&mut c, 7);
    c.emit(Opcode::Add);
    c.emit(Opcode::Print);
    c.push_constant(Constant::None);
    c.emit(Opcode::Print);
    c.emit(Opcode::End);

    let (_, out) = run(c);
    assert_eq!(out, vec!["5.0", "anggaran: 7", "None"]);
}

// ============================================================================
// Arithmetic
// ============================================================================

fn binary(a: Constant, b: Constant, op: Opcode) -> (Result<Snapshot, VmError>, Vec<String>) {
    let mut c = Container::new();
    c.push_constant(a);
    c.push_constant(b);
    c.emit(op);
    c.emit(Opcode::Print);
    c.emit(Opcode::End);
    run(c)
}

#[test]
fn test_integer_arithmetic() {
    use Constant::Int;
    assert_eq!(binary(Int(7), Int(2), Opcode::Sub).1, vec!["5"]);
    assert_eq!(binary(Int(7), Int(2), Opcode::Mul).1, vec!["14"]);
    assert_eq!(binary(Int(7), Int(2), Opcode::Div).1, vec!["3"]);
    assert_eq!(binary(Int(-7), Int(2), Opcode::Div).1, vec!["-4"]);
    assert_eq!(binary(Int(-7), Int(3), Opcode::Mod).1, vec!["2"]);
}

#[test]
fn test_float_division_is_true_division() {
    assert_eq!(
        binary(Constant::Float(7.0), Constant::Int(2), Opcode::Div).1,
        vec!["3.5"]
    );
}

#[test]
fn test_comparisons_push_flags() {
    use Constant::Int;
    assert_eq!(binary(Int(1), Int(2), Opcode::Lt).1, vec!["1"]);
    assert_eq!(binary(Int(1), Int(2), Opcode::Gt).1, vec!["0"]);
    assert_eq!(binary(Int(2), Constant::Float(2.0), Opcode::Eq).1, vec!["1"]);
    assert_eq!(
        binary(Constant::Str("a".into()), Constant::Str("b".into()), Opcode::Lt).1,
        vec!["1"]
    );
}

#[test]
fn test_division_by_zero() {
    for (a, b, op) in [
        (Constant::Int(1), Constant::Int(0), Opcode::Div),
        (Constant::Int(1), Constant::Float(0.0), Opcode::Div),
        (Constant::Float(1.0), Constant::Int(0), Opcode::Mod),
    ] {
        let err = binary(a, b, op).0.unwrap_err();
        assert_eq!(err.kind, FaultKind::Arithmetic);
        assert_eq!(err.snapshot.status, Status::Failed(FaultKind::Arithmetic));
        assert_eq!(err.snapshot.pc, 6);
    }
}

#[test]
fn test_type_mismatch() {
    let err = binary(Constant::Str("x".into()), Constant::Int(2), Opcode::Mul)
        .0
        .unwrap_err();
    assert_eq!(err.kind, FaultKind::Arithmetic);
}

// ============================================================================
// Stack discipline
// ============================================================================

#[test]
fn test_every_popping_opcode_underflows() {
    let popping = [
        Opcode::Pop,
        Opcode::Print,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Eq,
        Opcode::Lt,
        Opcode::Gt,
        Opcode::Deplete,
        Opcode::ForceTerminate,
        Opcode::Sleep,
    ];
    for op in popping {
        let mut c = Container::new();
        c.emit(op);
        c.emit(Opcode::End);
        let err = run(c).0.unwrap_err();
        assert_eq!(err.kind, FaultKind::StackUnderflow, "{}", op.name());
        assert_eq!(err.snapshot.pc, 0);
    }

    for op in [Opcode::Store, Opcode::JumpIfFalse] {
        let mut c = Container::new();
        c.emit_with_operand(op, 0);
        c.emit(Opcode::End);
        let err = run(c).0.unwrap_err();
        assert_eq!(err.kind, FaultKind::StackUnderflow, "{}", op.name());
    }
}

#[test]
fn test_binary_op_with_one_operand_underflows() {
    let mut c = Container::new();
    push_int(&mut c, 1);
    c.emit(Opcode::Add);
    let err = run(c).0.unwrap_err();
    assert_eq!(err.kind, FaultKind::StackUnderflow);
    assert_eq!(err.snapshot.stack_depth, 0);
}

// ============================================================================
// Variables and built-ins
// ============================================================================

#[test]
fn test_store_and_load() {
    let mut c = Container::new();
    let x = c.declare_variable("x");
    push_int(&mut c, 11);
    c.emit_with_operand(Opcode::Store, x);
    c.emit_with_operand(Opcode::Load, x);
    c.emit_with_operand(Opcode::Load, 77);
    c.emit(Opcode::Add);
    c.emit(Opcode::Print);
    c.emit(Opcode::End);
    assert_eq!(run(c).1, vec!["11"]);
}

#[test]
fn test_builtin_default_slots() {
    let mut c = Container::new();
    c.emit_with_operand(Opcode::Load, 9998);
    c.emit(Opcode::Print);
    push_int(&mut c, 60);
    c.emit_with_operand(Opcode::Store, 9999);
    c.emit(Opcode::End);
    let (result, out) = run(c);
    assert_eq!(out, vec!["100"]);
    assert_eq!(result.unwrap().progress, 60);
}

#[test]
fn test_builtin_slots_from_metadata() {
    let mut c = Container::new();
    let budget = c.declare_variable("budget");
    let progress = c.declare_variable("progress");
    push_int(&mut c, 30);
    c.emit_with_operand(Opcode::Store, budget);
    push_int(&mut c, 100);
    c.emit_with_operand(Opcode::Store, progress);
    c.emit(Opcode::End);
    let snap = run(c).0.unwrap();
    assert_eq!(snap.budget, 30);
    assert_eq!(snap.progress, 100);
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn test_call_and_ret() {
    let mut c = Container::new();
    let call = c.emit_with_operand(Opcode::Call, 0);
    c.emit(Opcode::End);
    let sub = c.push_string("dalam subrutin");
    c.emit(Opcode::Print);
    c.emit(Opcode::Ret);
    c.patch_operand(call, sub as u16).unwrap();

    let (result, out) = run(c);
    let snap = result.unwrap();
    assert_eq!(out, vec!["dalam subrutin"]);
    assert_eq!(snap.status, Status::Completed);
    assert_eq!(snap.pc, 3);
}

#[test]
fn test_ret_without_frame_completes() {
    let mut c = Container::new();
    c.emit(Opcode::Ret);
    c.push_string("never");
    c.emit(Opcode::Print);
    let (result, out) = run(c);
    assert_eq!(result.unwrap().status, Status::Completed);
    assert!(out.is_empty());
}

#[test]
fn test_repeat_loop() {
    let mut c = Container::new();
    push_int(&mut c, 3);
    let body = c.push_string("rapat");
    c.emit(Opcode::Print);
    c.emit_with_operand(Opcode::Repeat, body as u16);
    c.emit(Opcode::End);

    let (result, out) = run(c);
    assert_eq!(out, vec!["rapat", "rapat", "rapat"]);
    assert_eq!(result.unwrap().stack_depth, 0);
}

#[test]
fn test_repeat_on_empty_stack_falls_through() {
    let mut c = Container::new();
    c.emit_with_operand(Opcode::Repeat, 0);
    c.push_string("lanjut");
    c.emit(Opcode::Print);
    c.emit(Opcode::End);
    assert_eq!(run(c).1, vec!["lanjut"]);
}

#[test]
fn test_countdown_with_backward_jump() {
    let mut c = Container::new();
    let i = c.declare_variable("i");
    push_int(&mut c, 3);
    c.emit_with_operand(Opcode::Store, i);
    let top = c.emit_with_operand(Opcode::Load, i);
    let exit = c.emit_with_operand(Opcode::JumpIfFalse, 0);
    c.emit_with_operand(Opcode::Load, i);
    c.emit(Opcode::Print);
    c.emit_with_operand(Opcode::Load, i);
    push_int(&mut c, 1);
    c.emit(Opcode::Sub);
    c.emit_with_operand(Opcode::Store, i);
    c.emit_with_operand(Opcode::Jump, top as u16);
    let end = c.emit(Opcode::End);
    c.patch_operand(exit, end as u16).unwrap();

    assert_eq!(run(c).1, vec!["3", "2", "1"]);
}

// ============================================================================
// Governor
// ============================================================================

#[test]
fn test_step_limit() {
    let mut c = Container::new();
    c.emit(Opcode::Nop);
    c.emit_with_operand(Opcode::Jump, 0);

    let (result, _) = run_with(c, EngineConfig::new().with_seed(1).with_step_limit(7));
    let err = result.unwrap_err();
    assert_eq!(err.kind, FaultKind::StepLimitExceeded);
    assert_eq!(err.snapshot.status, Status::LimitExceeded);
    assert_eq!(err.snapshot.step_count, 8);
}

#[test]
fn test_step_limit_allows_exactly_k_steps() {
    let mut c = Container::new();
    c.emit(Opcode::Nop);
    c.emit(Opcode::Nop);
    c.emit(Opcode::End);
    let (result, _) = run_with(c, EngineConfig::new().with_seed(1).with_step_limit(3));
    assert_eq!(result.unwrap().status, Status::Completed);
}

// ============================================================================
// Domain opcodes
// ============================================================================

#[test]
fn test_budget_depletion_sequence() {
    let mut c = Container::new();
    push_int(&mut c, 50);
    c.emit(Opcode::Deplete);
    push_int(&mut c, 50);
    c.emit(Opcode::Deplete);
    push_int(&mut c, 100);
    c.emit(Opcode::Deplete);
    c.emit(Opcode::End);

    let sink = CaptureSink::new();
    let mut engine = Engine::new(Arc::new(c), EngineConfig::new().with_seed(9))
        .with_output(sink.clone());

    engine.step().unwrap();
    engine.step().unwrap();
    assert_eq!(engine.snapshot().budget, 50);
    engine.step().unwrap();
    engine.step().unwrap();
    assert_eq!(engine.snapshot().budget, 25);
    engine.step().unwrap();
    let err = engine.step().unwrap_err();

    assert_eq!(err.kind, FaultKind::BudgetExhausted);
    assert_eq!(err.snapshot.budget, 0);
    assert_eq!(err.snapshot.cumulative_depletion, 100);
    assert!((6..=24).contains(&err.snapshot.timeline));

    let lines = sink.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("(-50)"));
    assert!(lines[1].ends_with("(-25)"));
    assert!(lines[2].ends_with("(-25)"));
}

#[test]
fn test_deplete_non_numeric_percent_is_zero() {
    let mut c = Container::new();
    c.push_string("banyak");
    c.emit(Opcode::Deplete);
    c.emit(Opcode::End);
    let (result, out) = run(c);
    let snap = result.unwrap();
    assert_eq!(snap.budget, 100);
    assert_eq!(snap.cumulative_depletion, 0);
    assert!(out[0].ends_with("(-0)"));
}

#[test]
fn test_deplete_huge_negative_percent_saturates() {
    let mut c = Container::new();
    c.push_constant(Constant::Float(-1e300));
    c.emit(Opcode::Deplete);
    c.emit(Opcode::End);
    let (result, out) = run(c);
    let snap = result.unwrap();
    assert_eq!(snap.status, Status::Completed);
    assert_eq!(snap.budget, i64::MAX);
    assert_eq!(snap.cumulative_depletion, i64::MIN);
    assert_eq!(out.len(), 1);
}

#[test]
fn test_deplete_huge_positive_percent_exhausts() {
    let mut c = Container::new();
    c.push_constant(Constant::Float(1e300));
    c.emit(Opcode::Deplete);
    c.emit(Opcode::End);
    let err = run(c).0.unwrap_err();
    assert_eq!(err.kind, FaultKind::BudgetExhausted);
    assert_eq!(err.snapshot.budget, 0);
    assert_eq!(err.snapshot.cumulative_depletion, i64::MAX);
}

#[test]
fn test_repeated_negative_depletion_saturates() {
    let mut c = Container::new();
    push_int(&mut c, 80);
    let body = c.push_constant(Constant::Int(-100));
    c.emit(Opcode::Deplete);
    c.emit_with_operand(Opcode::Repeat, body as u16);
    c.emit(Opcode::End);
    let (result, out) = run(c);
    let snap = result.unwrap();
    assert_eq!(snap.status, Status::Completed);
    assert_eq!(snap.budget, i64::MAX);
    assert_eq!(snap.cumulative_depletion, i64::MIN);
    assert_eq!(out.len(), 80);
}

#[test]
fn test_force_terminate() {
    let mut c = Container::new();
    c.push_string("lahan sengketa");
    c.emit(Opcode::ForceTerminate);
    c.push_string("never");
    c.emit(Opcode::Print);

    let (result, out) = run(c);
    let err = result.unwrap_err();
    assert_eq!(err.kind, FaultKind::ForcedTermination);
    assert_eq!(err.snapshot.status, Status::Failed(FaultKind::ForcedTermination));
    assert_eq!(out, vec!["PROJECT ABANDONED: lahan sengketa"]);
}

#[test]
fn test_sleep_is_clamped() {
    let mut c = Container::new();
    push_int(&mut c, 60_000);
    c.emit(Opcode::Sleep);
    c.emit(Opcode::End);
    let started = std::time::Instant::now();
    let config = EngineConfig::new()
        .with_seed(1)
        .with_sleep_ceiling(Duration::from_millis(5));
    assert!(run_with(c, config).0.is_ok());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_same_seed_same_run() {
    let build = || {
        let mut c = Container::new();
        for _ in 0..4 {
            push_int(&mut c, 10);
            c.emit(Opcode::Deplete);
        }
        c.emit(Opcode::End);
        c
    };
    let config = || EngineConfig::new().with_seed(1234);
    let (a, out_a) = run_with(build(), config());
    let (b, out_b) = run_with(build(), config());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(out_a, out_b);
}

// ============================================================================
// Decode faults
// ============================================================================

#[test]
fn test_unknown_opcode_fault() {
    let c = Container::with_code(vec![0x00, 0x99]);
    let err = run(c).0.unwrap_err();
    assert_eq!(err.kind, FaultKind::Decode);
    assert_eq!(err.snapshot.pc, 1);
}

#[test]
fn test_truncated_operand_fault() {
    let c = Container::with_code(vec![Opcode::Push.byte(), 0x00]);
    let err = run(c).0.unwrap_err();
    assert_eq!(err.kind, FaultKind::Decode);
}

#[test]
fn test_bad_pool_index_fault() {
    let mut c = Container::new();
    c.emit_with_operand(Opcode::Push, 4);
    c.emit_with_operand(Opcode::Push, bytecode_system::string_ref(2));
    let err = run(c).0.unwrap_err();
    assert_eq!(err.kind, FaultKind::Decode);
}

// ============================================================================
// Self-modification
// ============================================================================

fn subroutine_called_twice() -> Container {
    let mut c = Container::new();
    let first = c.emit_with_operand(Opcode::Call, 0);
    let second = c.emit_with_operand(Opcode::Call, 0);
    c.emit(Opcode::End);
    let sub = c.push_constant(Constant::Int(10));
    c.emit(Opcode::Deplete);
    c.emit(Opcode::Ret);
    c.patch_operand(first, sub as u16).unwrap();
    c.patch_operand(second, sub as u16).unwrap();
    c
}

#[test]
fn test_without_self_modify_both_calls_deplete() {
    let (result, out) = run(subroutine_called_twice());
    assert_eq!(out.len(), 2);
    assert_eq!(result.unwrap().budget, 81);
}

#[test]
fn test_self_modify_rewrites_after_threshold() {
    let container = Arc::new(subroutine_called_twice());
    let sink = CaptureSink::new();
    let config = EngineConfig::new()
        .with_seed(1)
        .with_self_modify(SelfModifyPolicy::new(Opcode::Deplete, 1));
    let mut engine = Engine::new(Arc::clone(&container), config).with_output(sink.clone());
    let snap = engine.run().unwrap();

    assert_eq!(sink.lines().len(), 1);
    assert_eq!(snap.budget, 90);
    assert_eq!(snap.stack_depth, 1);
    assert_eq!(engine.mutations(), &[10]);
    assert_eq!(engine.code()[10], Opcode::Nop.byte());
    assert_eq!(container.code[10], Opcode::Deplete.byte());
}

// ============================================================================
// Robustness
// ============================================================================

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(code in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut c = Container::with_code(code);
            c.constants = vec![Constant::Int(3), Constant::Float(0.5)];
            c.strings = vec!["s".to_string()];
            let config = EngineConfig::new()
                .with_seed(0)
                .with_step_limit(200)
                .with_sleep_ceiling(Duration::ZERO);
            let (result, _) = run_with(c, config);
            match result {
                Ok(snap) => prop_assert_eq!(snap.status, Status::Completed),
                Err(err) => {
                    prop_assert!(err.snapshot.status.is_terminal());
                    prop_assert!(err.snapshot.step_count <= 201);
                }
            }
        }
    }
}
