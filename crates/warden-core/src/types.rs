use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One stage of the fixed workflow an agent must progress through.
///
/// The declaration order is the workflow order, so the derived `Ord` can be
/// used directly for "before/after" comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Assess,
    Plan,
    Execute,
    Test,
    Verify,
    Confirm,
    Commit,
}

impl Phase {
    /// All phases in workflow order.
    pub const ALL: [Phase; 7] = [
        Phase::Assess,
        Phase::Plan,
        Phase::Execute,
        Phase::Test,
        Phase::Verify,
        Phase::Confirm,
        Phase::Commit,
    ];

    /// Zero-based position in the workflow.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The immediate successor, or `None` for the terminal `Commit` phase.
    pub fn next(self) -> Option<Phase> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Commit
    }

    /// Whether a turn in this phase is expected to invoke at least one tool.
    pub fn requires_tool_call(self) -> bool {
        !matches!(self, Phase::Confirm | Phase::Commit)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Assess => "ASSESS",
            Phase::Plan => "PLAN",
            Phase::Execute => "EXECUTE",
            Phase::Test => "TEST",
            Phase::Verify => "VERIFY",
            Phase::Confirm => "CONFIRM",
            Phase::Commit => "COMMIT",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown phase: {0}")]
pub struct ParsePhaseError(String);

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParsePhaseError(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ToolCall
// ---------------------------------------------------------------------------

/// A tool invocation emitted by the primary model during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// A tool call with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, serde_json::Value::Null)
    }

    /// Lower-cased JSON rendering of the arguments, for keyword matching.
    pub fn argument_text(&self) -> String {
        match &self.arguments {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.to_lowercase(),
            other => other.to_string().to_lowercase(),
        }
    }

    /// The target path of a file tool, read from `path` or `file_path`.
    pub fn target_path(&self) -> Option<&str> {
        ["path", "file_path", "filename"]
            .iter()
            .find_map(|key| self.arguments.get(key).and_then(|v| v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

/// Category of a recorded violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PhaseRule,
    LowQuality,
    IllegalTransition,
    ResourceCeiling,
    PrematureCompletion,
    UnapprovedWrite,
    Escalation,
}

impl ViolationKind {
    /// Compliance-score penalty applied when a violation of this kind is recorded.
    pub fn default_severity(self) -> u32 {
        match self {
            ViolationKind::PhaseRule => 10,
            ViolationKind::LowQuality => 5,
            ViolationKind::IllegalTransition => 15,
            ViolationKind::ResourceCeiling => 25,
            ViolationKind::PrematureCompletion => 20,
            ViolationKind::UnapprovedWrite => 15,
            ViolationKind::Escalation => 10,
        }
    }

    /// Critical violations need an external decision (stop or escalate).
    pub fn is_critical(self) -> bool {
        self == ViolationKind::ResourceCeiling
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::PhaseRule => "phase_rule",
            ViolationKind::LowQuality => "low_quality",
            ViolationKind::IllegalTransition => "illegal_transition",
            ViolationKind::ResourceCeiling => "resource_ceiling",
            ViolationKind::PrematureCompletion => "premature_completion",
            ViolationKind::UnapprovedWrite => "unapproved_write",
            ViolationKind::Escalation => "escalation",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded instance of non-compliant behavior. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub description: String,
    /// Penalty (0-100) subtracted from the job's compliance score.
    pub severity_score: u32,
    pub timestamp: DateTime<Utc>,
}

impl Violation {
    /// Create a violation carrying the kind's default severity.
    pub fn new(kind: ViolationKind, description: impl Into<String>) -> Self {
        Self::with_severity(kind, description, kind.default_severity())
    }

    pub fn with_severity(kind: ViolationKind, description: impl Into<String>, severity: u32) -> Self {
        Self {
            kind,
            description: description.into(),
            severity_score: severity.min(100),
            timestamp: Utc::now(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.kind.is_critical()
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity attached to corrective guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// `<30` critical, `<50` high, `<70` medium, otherwise low.
    pub fn from_quality_score(score: u32) -> Self {
        match score {
            0..=29 => Severity::Critical,
            30..=49 => Severity::High,
            50..=69 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_successors() {
        assert_eq!(Phase::Assess.next(), Some(Phase::Plan));
        assert_eq!(Phase::Confirm.next(), Some(Phase::Commit));
        assert_eq!(Phase::Commit.next(), None);
        assert!(Phase::Plan < Phase::Execute);
        assert!(Phase::Commit.is_terminal());
    }

    #[test]
    fn test_phase_parse_is_case_insensitive() {
        assert_eq!("execute".parse::<Phase>().unwrap(), Phase::Execute);
        assert_eq!(" VERIFY ".parse::<Phase>().unwrap(), Phase::Verify);
        assert!("deploy".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_serializes_uppercase() {
        let json = serde_json::to_string(&Phase::Test).unwrap();
        assert_eq!(json, "\"TEST\"");
    }

    #[test]
    fn test_only_confirm_and_commit_skip_tool_requirement() {
        let exempt: Vec<Phase> = Phase::ALL
            .iter()
            .copied()
            .filter(|p| !p.requires_tool_call())
            .collect();
        assert_eq!(exempt, vec![Phase::Confirm, Phase::Commit]);
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(Severity::from_quality_score(0), Severity::Critical);
        assert_eq!(Severity::from_quality_score(29), Severity::Critical);
        assert_eq!(Severity::from_quality_score(30), Severity::High);
        assert_eq!(Severity::from_quality_score(49), Severity::High);
        assert_eq!(Severity::from_quality_score(50), Severity::Medium);
        assert_eq!(Severity::from_quality_score(69), Severity::Medium);
        assert_eq!(Severity::from_quality_score(70), Severity::Low);
        assert_eq!(Severity::from_quality_score(100), Severity::Low);
    }

    #[test]
    fn test_tool_call_target_path_and_arguments() {
        let call = ToolCall::new(
            "write_file",
            serde_json::json!({"file_path": "src/Main.rs", "content": "Fn"}),
        );
        assert_eq!(call.target_path(), Some("src/Main.rs"));
        assert!(call.argument_text().contains("src/main.rs"));
        assert_eq!(ToolCall::named("grep").argument_text(), "");
    }

    #[test]
    fn test_violation_severity_is_capped() {
        let v = Violation::with_severity(ViolationKind::PhaseRule, "x", 250);
        assert_eq!(v.severity_score, 100);
        assert!(Violation::new(ViolationKind::ResourceCeiling, "tokens").is_critical());
    }
}
