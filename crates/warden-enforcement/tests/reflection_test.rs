//! Reflection scheduling and reflection-answer validation.

use warden_core::Phase;
use warden_enforcement::reflection::ReflectionScheduler;

#[test]
fn test_default_interval_is_five() {
    let mut s = ReflectionScheduler::default();
    assert_eq!(s.interval(), 5);
    let due: Vec<usize> = (1..=12)
        .filter(|_| s.record_tool_call())
        .collect();
    assert_eq!(due, vec![5, 10]);
}

#[test]
fn test_prompt_names_phase_and_asks_for_short_answer() {
    let mut s = ReflectionScheduler::new(2);
    s.record_tool_call();
    s.record_tool_call();
    let prompt = s.generate_reflection_prompt(Phase::Verify);
    assert!(prompt.contains("VERIFY"));
    assert!(prompt.contains("10 words"));
    assert_eq!(s.history().len(), 1);
    assert_eq!(s.history()[0].trigger_count, 2);
}

#[test]
fn test_well_formed_reflection_is_valid() {
    let v = ReflectionScheduler::validate_reflection_response(
        "Phase: EXECUTE | Compliance: yes | Next action: run tests",
    );
    assert!(v.valid, "{:?}", v.issues);
    assert!(v.issues.is_empty());
}

#[test]
fn test_missing_fields_are_reported() {
    let v = ReflectionScheduler::validate_reflection_response("Phase: EXECUTE, all good");
    assert!(!v.valid);
    assert_eq!(v.issues.len(), 2);
    assert!(v.issues.iter().any(|i| i.contains("compliance:")));
    assert!(v.issues.iter().any(|i| i.contains("next action:")));
}

#[test]
fn test_rambling_and_length_are_reported() {
    let long = format!(
        "Phase: TEST. Compliance: yes. Next action: however, let me first explain {}",
        "why ".repeat(20)
    );
    let v = ReflectionScheduler::validate_reflection_response(&long);
    assert!(!v.valid);
    assert!(v.issues.iter().any(|i| i.contains("too long")));
    assert!(v.issues.iter().any(|i| i.contains("however")));
    assert!(v.issues.iter().any(|i| i.contains("let me")));
    assert!(!v.issues.iter().any(|i| i.contains("i will")));
}

#[test]
fn test_reset_clears_counter_and_history() {
    let mut s = ReflectionScheduler::new(1);
    assert!(s.record_tool_call());
    s.generate_reflection_prompt(Phase::Assess);
    s.reset();
    assert_eq!(s.stats().count, 0);
    assert!(s.stats().last_triggered.is_none());
    assert!(s.record_tool_call());
}
