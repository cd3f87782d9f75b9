//! Workflow state machine: ordering, ceilings, retries and efficiency.

use warden_core::{Phase, ViolationKind};
use warden_enforcement::state_machine::{StateMachineError, WorkflowLimits, WorkflowStateMachine};

fn small_limits() -> WorkflowLimits {
    WorkflowLimits {
        max_tokens_per_job: 1_000,
        max_tokens_per_phase: 600,
        max_tool_calls_per_phase: 3,
        max_tool_calls_per_job: 5,
        max_phase_retries: 1,
    }
}

fn advance_to(sm: &mut WorkflowStateMachine, target: Phase) {
    while sm.current_phase() != target {
        let next = sm.current_phase().next().expect("target is ahead");
        sm.transition_to(next).unwrap();
    }
}

// ===========================================================================
// Transitions
// ===========================================================================

#[test]
fn test_only_current_or_next_phase_is_reachable() {
    for (i, current) in Phase::ALL.iter().copied().enumerate() {
        let mut sm = WorkflowStateMachine::default();
        advance_to(&mut sm, current);
        for (j, target) in Phase::ALL.iter().copied().enumerate() {
            let check = sm.can_transition_to(target);
            let expected = j == i || j == i + 1;
            assert_eq!(
                check.allowed, expected,
                "{} -> {} should be {}",
                current, target, expected
            );
            if !expected {
                assert!(check.reason.is_some());
            }
        }
    }
}

#[test]
fn test_transition_records_history_and_completed_phases() {
    let mut sm = WorkflowStateMachine::default();
    sm.transition_to(Phase::Plan).unwrap();
    sm.transition_to(Phase::Plan).unwrap();
    sm.transition_to(Phase::Execute).unwrap();

    assert_eq!(sm.current_phase(), Phase::Execute);
    assert_eq!(sm.completed_phases(), &[Phase::Assess, Phase::Plan]);
    assert_eq!(sm.history().len(), 2);
    assert!(!sm.history()[0].retry);
}

#[test]
fn test_skip_is_an_invalid_transition_error() {
    let mut sm = WorkflowStateMachine::default();
    let err = sm.transition_to(Phase::Test).unwrap_err();
    match err {
        StateMachineError::InvalidTransition { from, to, .. } => {
            assert_eq!(from, Phase::Assess);
            assert_eq!(to, Phase::Test);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sm.current_phase(), Phase::Assess);
}

#[test]
fn test_exhausted_phase_blocks_advancing() {
    let mut sm = WorkflowStateMachine::new(small_limits());
    for _ in 0..4 {
        sm.record_tool_call("read_file");
    }
    let check = sm.can_transition_to(Phase::Plan);
    assert!(!check.allowed);
    assert!(check.reason.unwrap().contains("tool-call budget"));
}

// ===========================================================================
// Ceilings
// ===========================================================================

#[test]
fn test_token_ceiling_raises_one_critical_violation() {
    let mut sm = WorkflowStateMachine::new(small_limits());
    assert!(sm.record_token_usage(200, 200).is_empty());
    assert!(!sm.has_critical_violations());

    let raised = sm.record_token_usage(300, 0);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, ViolationKind::ResourceCeiling);
    assert!(sm.has_critical_violations());

    // Still over the phase ceiling: nothing new for this iteration.
    assert!(sm.record_token_usage(10, 10).is_empty());
}

#[test]
fn test_job_and_phase_ceilings_are_independent() {
    let mut sm = WorkflowStateMachine::new(small_limits());
    for _ in 0..3 {
        assert!(sm.record_tool_call("grep").is_empty());
    }
    assert_eq!(sm.record_tool_call("grep").len(), 1);

    // Fresh phase iteration resets phase counters but not job counters.
    let mut sm = WorkflowStateMachine::new(small_limits());
    for _ in 0..3 {
        sm.record_tool_call("grep");
    }
    sm.transition_to(Phase::Plan).unwrap();
    assert!(sm.record_tool_call("todo_write").is_empty());
    assert!(sm.record_tool_call("todo_write").is_empty());
    let raised = sm.record_tool_call("todo_write");
    assert_eq!(raised.len(), 1);
    assert!(raised[0].description.contains("job limit"));
    assert_eq!(sm.tool_call_count(), 6);
}

#[test]
fn test_critical_flag_is_sticky_across_phases() {
    let mut sm = WorkflowStateMachine::new(small_limits());
    sm.record_token_usage(1_100, 0);
    assert!(sm.has_critical_violations());
    let snapshot = sm.snapshot();
    assert!(snapshot.has_critical_violations);
    assert_eq!(snapshot.violations.len(), 2);
}

// ===========================================================================
// Retries
// ===========================================================================

#[test]
fn test_retry_from_test_returns_to_execute() {
    let mut sm = WorkflowStateMachine::new(small_limits());
    advance_to(&mut sm, Phase::Test);
    assert_eq!(sm.begin_retry(Phase::Execute).unwrap(), Phase::Execute);
    assert!(sm.history().last().unwrap().retry);

    advance_to(&mut sm, Phase::Verify);
    assert!(matches!(
        sm.begin_retry(Phase::Execute),
        Err(StateMachineError::RetryRefused { .. })
    ));
}

#[test]
fn test_retry_refused_outside_test_or_verify() {
    let mut sm = WorkflowStateMachine::default();
    advance_to(&mut sm, Phase::Execute);
    assert!(sm.begin_retry(Phase::Execute).is_err());
    advance_to(&mut sm, Phase::Test);
    assert!(sm.begin_retry(Phase::Plan).is_err());
}

#[test]
fn test_huge_token_counts_saturate_and_still_breach() {
    let mut sm = WorkflowStateMachine::new(small_limits());
    let raised = sm.record_token_usage(u64::MAX, 1);
    assert_eq!(sm.total_tokens(), u64::MAX);
    assert_eq!(raised.len(), 2);
    assert!(raised.iter().all(|v| v.kind == ViolationKind::ResourceCeiling));

    assert!(sm.record_token_usage(u64::MAX, u64::MAX).is_empty());
    assert_eq!(sm.total_tokens(), u64::MAX);
    assert!(sm.has_critical_violations());
}

// ===========================================================================
// Efficiency
// ===========================================================================

#[test]
fn test_token_efficiency_is_calls_per_thousand_tokens() {
    let mut sm = WorkflowStateMachine::default();
    assert_eq!(sm.token_efficiency(), 0.0);
    sm.record_token_usage(1_500, 500);
    sm.record_tool_call("read_file");
    sm.record_tool_call("grep");
    assert!((sm.token_efficiency() - 1.0).abs() < 1e-9);
    assert_eq!(sm.snapshot().tool_usage.get("grep"), Some(&1));
}
