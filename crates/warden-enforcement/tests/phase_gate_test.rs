//! Phase compliance gate: the default rule table, phase by phase.

use serde_json::json;
use warden_core::{Phase, ToolCall};
use warden_enforcement::phase_gate::PhaseComplianceGate;

fn bash(command: &str) -> ToolCall {
    ToolCall::new("bash", json!({ "command": command }))
}

#[test]
fn test_plan_requires_task_list() {
    let gate = PhaseComplianceGate::new();

    let without = gate.validate_response("Plan drafted.", Phase::Plan, &[ToolCall::named("read_file")]);
    assert!(!without.passed);
    assert_eq!(without.violations.len(), 1);
    assert_eq!(without.quality_score, 40);

    let with = gate.validate_response("", Phase::Plan, &[ToolCall::named("todo_write")]);
    assert!(with.passed);
    assert_eq!(with.quality_score, 100);
}

#[test]
fn test_test_phase_accepts_shell_test_runs() {
    let gate = PhaseComplianceGate::new();
    assert!(gate.validate_response("", Phase::Test, &[bash("pytest -q")]).passed);
    assert!(gate.validate_response("", Phase::Test, &[ToolCall::named("run_tests")]).passed);
    assert!(!gate.validate_response("", Phase::Test, &[bash("ls")]).passed);
}

#[test]
fn test_verify_accepts_inspection_or_tests() {
    let gate = PhaseComplianceGate::new();
    assert!(gate.validate_response("", Phase::Verify, &[ToolCall::named("git_diff")]).passed);
    assert!(gate.validate_response("", Phase::Verify, &[bash("cargo test")]).passed);
    let r = gate.validate_response("", Phase::Verify, &[ToolCall::named("write_file")]);
    assert_eq!(r.quality_score, 60);
}

#[test]
fn test_confirm_forbids_file_modification() {
    let gate = PhaseComplianceGate::new();
    assert!(gate.validate_response("All checks green.", Phase::Confirm, &[]).passed);
    let r = gate.validate_response("", Phase::Confirm, &[ToolCall::named("edit_file")]);
    assert!(!r.passed);
    assert_eq!(r.failed_rules, vec!["confirm_is_read_only"]);
}

#[test]
fn test_commit_requires_git_commit() {
    let gate = PhaseComplianceGate::new();
    assert!(gate
        .validate_response("", Phase::Commit, &[bash("git commit -m 'fix parser'")])
        .passed);
    assert!(!gate.validate_response("Committed.", Phase::Commit, &[]).passed);
}

#[test]
fn test_execute_prose_limit_counts_words_before_first_marker() {
    let gate = PhaseComplianceGate::new();
    let text = format!("{} <invoke name=\"edit_file\"> {}", "w ".repeat(20), "x ".repeat(50));
    let ok = gate.validate_response(&text, Phase::Execute, &[ToolCall::named("edit_file")]);
    assert!(ok.passed);

    let text = format!("{} <invoke name=\"edit_file\">", "w ".repeat(21));
    let wordy = gate.validate_response(&text, Phase::Execute, &[ToolCall::named("edit_file")]);
    assert_eq!(wordy.failed_rules, vec!["execute_acts_before_explaining"]);
    assert_eq!(wordy.quality_score, 80);
}

#[test]
fn test_assess_failure_keeps_score_above_guidance_floor() {
    let gate = PhaseComplianceGate::new();
    let r = gate.validate_response("Thinking.", Phase::Assess, &[]);
    assert!(!r.passed);
    assert_eq!(r.quality_score, 70);
}
