use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_core::config::LimitsConfig;
use warden_core::{Phase, Violation, ViolationKind};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Hard resource ceilings for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLimits {
    pub max_tokens_per_job: u64,
    pub max_tokens_per_phase: u64,
    pub max_tool_calls_per_phase: u32,
    pub max_tool_calls_per_job: u32,
    pub max_phase_retries: u32,
}

impl From<&LimitsConfig> for WorkflowLimits {
    fn from(cfg: &LimitsConfig) -> Self {
        Self {
            max_tokens_per_job: cfg.max_tokens_per_job,
            max_tokens_per_phase: cfg.max_tokens_per_phase,
            max_tool_calls_per_phase: cfg.max_tool_calls_per_phase,
            max_tool_calls_per_job: cfg.max_tool_calls_per_job,
            max_phase_retries: cfg.max_phase_retries,
        }
    }
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors raised when a phase change is refused.
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    /// The target is neither the current phase nor its immediate successor,
    /// or the current phase has exhausted its budget.
    #[error("invalid transition: cannot move from {from} to {to}: {reason}")]
    InvalidTransition {
        from: Phase,
        to: Phase,
        reason: String,
    },

    /// A retry was requested from a phase that does not allow one, or the
    /// retry budget is spent.
    #[error("retry refused in phase {from}: {reason}")]
    RetryRefused { from: Phase, reason: String },
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Outcome of [`WorkflowStateMachine::can_transition_to`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl TransitionCheck {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub retry: bool,
    pub at: DateTime<Utc>,
}

/// Read-only view of a job's workflow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub current_phase: Phase,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_call_count: u32,
    pub retries: u32,
    pub completed_phases: Vec<Phase>,
    pub violations: Vec<Violation>,
    pub tool_usage: BTreeMap<String, u32>,
    /// Tool calls per 1000 tokens.
    pub token_efficiency: f64,
    pub has_critical_violations: bool,
}

/// Which ceilings have already raised a violation.
#[derive(Debug, Clone, Copy, Default)]
struct Breaches {
    job_tokens: bool,
    job_tools: bool,
    phase_tokens: bool,
    phase_tools: bool,
}

// ---------------------------------------------------------------------------
// WorkflowStateMachine
// ---------------------------------------------------------------------------

/// Tracks one job's phase and resource counters.
///
/// Phases only move forward one step at a time. The single exception is
/// [`begin_retry`](Self::begin_retry), which sends a job from TEST or VERIFY
/// back to EXECUTE a bounded number of times.
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    limits: WorkflowLimits,
    current: Phase,
    input_tokens: u64,
    output_tokens: u64,
    tool_call_count: u32,
    phase_tokens: u64,
    phase_tool_calls: u32,
    retries: u32,
    tool_usage: BTreeMap<String, u32>,
    violations: Vec<Violation>,
    completed_phases: Vec<Phase>,
    history: Vec<TransitionRecord>,
    breaches: Breaches,
}

impl WorkflowStateMachine {
    /// Create a state machine starting in `Assess`.
    pub fn new(limits: WorkflowLimits) -> Self {
        Self {
            limits,
            current: Phase::Assess,
            input_tokens: 0,
            output_tokens: 0,
            tool_call_count: 0,
            phase_tokens: 0,
            phase_tool_calls: 0,
            retries: 0,
            tool_usage: BTreeMap::new(),
            violations: Vec::new(),
            completed_phases: Vec::new(),
            history: Vec::new(),
            breaches: Breaches::default(),
        }
    }

    pub fn current_phase(&self) -> Phase {
        self.current
    }

    pub fn limits(&self) -> &WorkflowLimits {
        &self.limits
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_call_count
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn completed_phases(&self) -> &[Phase] {
        &self.completed_phases
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Accumulate token usage. Returns the critical violations this call raised.
    pub fn record_token_usage(&mut self, input: u64, output: u64) -> Vec<Violation> {
        self.input_tokens = self.input_tokens.saturating_add(input);
        self.output_tokens = self.output_tokens.saturating_add(output);
        self.phase_tokens = self.phase_tokens.saturating_add(input.saturating_add(output));

        let mut raised = Vec::new();
        if !self.breaches.job_tokens && self.total_tokens() > self.limits.max_tokens_per_job {
            self.breaches.job_tokens = true;
            raised.push(self.raise_critical(format!(
                "Token budget exceeded: {} tokens used, job limit is {}",
                self.total_tokens(),
                self.limits.max_tokens_per_job
            )));
        }
        if !self.breaches.phase_tokens && self.phase_tokens > self.limits.max_tokens_per_phase {
            self.breaches.phase_tokens = true;
            raised.push(self.raise_critical(format!(
                "Token budget exceeded in {} phase: {} tokens used, phase limit is {}",
                self.current, self.phase_tokens, self.limits.max_tokens_per_phase
            )));
        }
        raised
    }

    /// Count one tool invocation. Returns the critical violations this call raised.
    pub fn record_tool_call(&mut self, name: &str) -> Vec<Violation> {
        self.tool_call_count = self.tool_call_count.saturating_add(1);
        self.phase_tool_calls = self.phase_tool_calls.saturating_add(1);
        let uses = self.tool_usage.entry(name.to_string()).or_insert(0);
        *uses = uses.saturating_add(1);

        let mut raised = Vec::new();
        if !self.breaches.job_tools && self.tool_call_count > self.limits.max_tool_calls_per_job {
            self.breaches.job_tools = true;
            raised.push(self.raise_critical(format!(
                "Tool-call budget exceeded: {} calls, job limit is {}",
                self.tool_call_count, self.limits.max_tool_calls_per_job
            )));
        }
        if !self.breaches.phase_tools
            && self.phase_tool_calls > self.limits.max_tool_calls_per_phase
        {
            self.breaches.phase_tools = true;
            raised.push(self.raise_critical(format!(
                "Tool-call budget exceeded in {} phase: {} calls, iteration limit is {}",
                self.current, self.phase_tool_calls, self.limits.max_tool_calls_per_phase
            )));
        }
        raised
    }

    /// Append a non-ceiling violation to the job's log.
    pub fn record_violation(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    /// True once any hard ceiling has been breached. Never resets.
    pub fn has_critical_violations(&self) -> bool {
        self.violations.iter().any(Violation::is_critical)
    }

    fn current_phase_exhausted(&self) -> Option<String> {
        if self.phase_tokens > self.limits.max_tokens_per_phase {
            return Some(format!(
                "{} phase token budget exhausted ({} > {})",
                self.current, self.phase_tokens, self.limits.max_tokens_per_phase
            ));
        }
        if self.phase_tool_calls > self.limits.max_tool_calls_per_phase {
            return Some(format!(
                "{} phase tool-call budget exhausted ({} > {})",
                self.current, self.phase_tool_calls, self.limits.max_tool_calls_per_phase
            ));
        }
        None
    }

    /// Only the current phase or its immediate successor is reachable, and
    /// only while the current phase is within its budgets.
    pub fn can_transition_to(&self, target: Phase) -> TransitionCheck {
        if target != self.current && Some(target) != self.current.next() {
            let reason = if target < self.current {
                format!("cannot regress from {} to {}", self.current, target)
            } else {
                match self.current.next() {
                    Some(next) => format!(
                        "cannot skip from {} to {}; next phase is {}",
                        self.current, target, next
                    ),
                    None => format!("{} is terminal", self.current),
                }
            };
            return TransitionCheck::deny(reason);
        }
        match self.current_phase_exhausted() {
            Some(reason) => TransitionCheck::deny(reason),
            None => TransitionCheck::allow(),
        }
    }

    /// Commit a phase change that [`can_transition_to`](Self::can_transition_to) allows.
    pub fn transition_to(&mut self, target: Phase) -> Result<Phase, StateMachineError> {
        let check = self.can_transition_to(target);
        if !check.allowed {
            return Err(StateMachineError::InvalidTransition {
                from: self.current,
                to: target,
                reason: check.reason.unwrap_or_default(),
            });
        }
        if target == self.current {
            return Ok(target);
        }

        let from = self.current;
        self.mark_completed(from);
        self.enter(target, false);
        tracing::debug!(from = %from, to = %target, "workflow phase transition");
        Ok(target)
    }

    /// Re-enter EXECUTE from TEST or VERIFY after a failed check.
    pub fn begin_retry(&mut self, target: Phase) -> Result<Phase, StateMachineError> {
        let from = self.current;
        if target != Phase::Execute || !matches!(from, Phase::Test | Phase::Verify) {
            return Err(StateMachineError::RetryRefused {
                from,
                reason: format!("only TEST or VERIFY may return to EXECUTE, not {} to {}", from, target),
            });
        }
        if self.retries >= self.limits.max_phase_retries {
            return Err(StateMachineError::RetryRefused {
                from,
                reason: format!("retry budget of {} spent", self.limits.max_phase_retries),
            });
        }
        self.retries += 1;
        self.enter(target, true);
        tracing::info!(from = %from, retries = self.retries, "workflow retry into EXECUTE");
        Ok(target)
    }

    /// Record the terminal phase as completed once the job finishes.
    pub fn finish(&mut self) {
        if self.current.is_terminal() {
            self.mark_completed(self.current);
        }
    }

    /// Tool calls per 1000 tokens; 0 before any tokens are recorded.
    pub fn token_efficiency(&self) -> f64 {
        let tokens = self.total_tokens();
        if tokens == 0 {
            return 0.0;
        }
        self.tool_call_count as f64 * 1000.0 / tokens as f64
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            current_phase: self.current,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            tool_call_count: self.tool_call_count,
            retries: self.retries,
            completed_phases: self.completed_phases.clone(),
            violations: self.violations.clone(),
            tool_usage: self.tool_usage.clone(),
            token_efficiency: self.token_efficiency(),
            has_critical_violations: self.has_critical_violations(),
        }
    }

    fn mark_completed(&mut self, phase: Phase) {
        if !self.completed_phases.contains(&phase) {
            self.completed_phases.push(phase);
        }
    }

    fn enter(&mut self, target: Phase, retry: bool) {
        self.history.push(TransitionRecord {
            from: self.current,
            to: target,
            retry,
            at: Utc::now(),
        });
        self.current = target;
        self.phase_tokens = 0;
        self.phase_tool_calls = 0;
        self.breaches.phase_tokens = false;
        self.breaches.phase_tools = false;
    }

    fn raise_critical(&mut self, description: String) -> Violation {
        tracing::warn!(phase = %self.current, %description, "resource ceiling breached");
        let violation = Violation::new(ViolationKind::ResourceCeiling, description);
        self.violations.push(violation.clone());
        violation
    }
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new(WorkflowLimits::default())
    }
}
