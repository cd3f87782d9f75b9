use serde::{Deserialize, Serialize};
use warden_core::{Phase, ToolCall};

use crate::tools::{
    self, ToolMatcher, FILE_MODIFICATION, GIT_COMMIT, INSPECTION, TASK_LIST, TEST_EXECUTION,
};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// What a phase rule demands of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// At least one call matching any of the matchers.
    ToolMatching(&'static [ToolMatcher]),
    AnyToolCall,
    /// No call may match.
    NoToolMatching(ToolMatcher),
    /// At most this many words before the first tool marker.
    MaxProseBeforeTools(usize),
}

impl Requirement {
    fn is_met(&self, response: &str, tool_calls: &[ToolCall]) -> bool {
        match self {
            Requirement::ToolMatching(matchers) => matchers.iter().any(|m| m.any(tool_calls)),
            Requirement::AnyToolCall => !tool_calls.is_empty(),
            Requirement::NoToolMatching(m) => !m.any(tool_calls),
            Requirement::MaxProseBeforeTools(max) => tools::prose_word_count(response) <= *max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRule {
    pub phase: Phase,
    pub name: &'static str,
    pub requirement: Requirement,
    /// Subtracted from the gate score when the rule fails.
    pub penalty: u32,
    pub message: &'static str,
}

/// The default policy table.
pub fn default_rules() -> Vec<PhaseRule> {
    vec![
        PhaseRule {
            phase: Phase::Assess,
            name: "assess_inspects",
            requirement: Requirement::ToolMatching(&[INSPECTION]),
            penalty: 30,
            message: "ASSESS phase requires inspecting the codebase with a read/search tool",
        },
        PhaseRule {
            phase: Phase::Plan,
            name: "plan_creates_task_list",
            requirement: Requirement::ToolMatching(&[TASK_LIST]),
            penalty: 60,
            message: "PLAN phase requires creating a task list with a task-list tool",
        },
        PhaseRule {
            phase: Phase::Execute,
            name: "execute_uses_tools",
            requirement: Requirement::AnyToolCall,
            penalty: 50,
            message: "EXECUTE phase requires at least one tool call",
        },
        PhaseRule {
            phase: Phase::Execute,
            name: "execute_acts_before_explaining",
            requirement: Requirement::MaxProseBeforeTools(20),
            penalty: 20,
            message: "EXECUTE phase forbids more than 20 words of explanation before tool calls",
        },
        PhaseRule {
            phase: Phase::Test,
            name: "test_runs_tests",
            requirement: Requirement::ToolMatching(&[TEST_EXECUTION]),
            penalty: 60,
            message: "TEST phase requires running the test suite",
        },
        PhaseRule {
            phase: Phase::Verify,
            name: "verify_checks_results",
            requirement: Requirement::ToolMatching(&[INSPECTION, TEST_EXECUTION]),
            penalty: 40,
            message: "VERIFY phase requires inspecting results or re-running tests",
        },
        PhaseRule {
            phase: Phase::Confirm,
            name: "confirm_is_read_only",
            requirement: Requirement::NoToolMatching(FILE_MODIFICATION),
            penalty: 50,
            message: "CONFIRM phase must not modify files",
        },
        PhaseRule {
            phase: Phase::Commit,
            name: "commit_commits",
            requirement: Requirement::ToolMatching(&[GIT_COMMIT]),
            penalty: 40,
            message: "COMMIT phase requires a git commit tool call",
        },
    ]
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Result of checking one turn against the rules of its phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub passed: bool,
    pub violations: Vec<String>,
    pub quality_score: u32,
    pub failed_rules: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PhaseComplianceGate {
    rules: Vec<PhaseRule>,
}

impl PhaseComplianceGate {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// A gate with an explicit rule table.
    pub fn with_rules(rules: Vec<PhaseRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: PhaseRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules_for(&self, phase: Phase) -> impl Iterator<Item = &PhaseRule> {
        self.rules.iter().filter(move |r| r.phase == phase)
    }

    pub fn validate_response(
        &self,
        response: &str,
        phase: Phase,
        tool_calls: &[ToolCall],
    ) -> GateResult {
        let mut violations = Vec::new();
        let mut failed_rules = Vec::new();
        let mut penalty = 0u32;

        for rule in self.rules_for(phase) {
            if !rule.requirement.is_met(response, tool_calls) {
                penalty += rule.penalty;
                violations.push(rule.message.to_string());
                failed_rules.push(rule.name.to_string());
            }
        }

        if !failed_rules.is_empty() {
            tracing::debug!(phase = %phase, failed = ?failed_rules, "phase gate rejected turn");
        }

        GateResult {
            passed: violations.is_empty(),
            violations,
            quality_score: 100u32.saturating_sub(penalty),
            failed_rules,
        }
    }
}

impl Default for PhaseComplianceGate {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_phase_has_a_rule() {
        let gate = PhaseComplianceGate::new();
        for phase in Phase::ALL {
            assert!(gate.rules_for(phase).count() > 0, "no rule for {}", phase);
        }
    }

    #[test]
    fn test_execute_without_tools_fails_both_rules_only_when_wordy() {
        let gate = PhaseComplianceGate::new();
        let short = gate.validate_response("Working on it.", Phase::Execute, &[]);
        assert_eq!(short.failed_rules, vec!["execute_uses_tools"]);
        assert_eq!(short.quality_score, 50);

        let long = "word ".repeat(25);
        let wordy = gate.validate_response(&long, Phase::Execute, &[]);
        assert_eq!(wordy.failed_rules.len(), 2);
        assert_eq!(wordy.quality_score, 30);
    }

    #[test]
    fn test_custom_rule_is_additive() {
        let gate = PhaseComplianceGate::new().with_rule(PhaseRule {
            phase: Phase::Confirm,
            name: "confirm_no_tests",
            requirement: Requirement::NoToolMatching(TEST_EXECUTION),
            penalty: 10,
            message: "no tests in confirm",
        });
        let r = gate.validate_response("", Phase::Confirm, &[ToolCall::named("run_tests")]);
        assert_eq!(r.failed_rules, vec!["confirm_no_tests"]);
        assert_eq!(r.quality_score, 90);
    }
}
