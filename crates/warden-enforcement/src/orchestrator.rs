//! Orchestrator: the single per-turn entry point of the enforcement engine.
//!
//! Each turn runs a fixed sequential pipeline:
//! - phase sync and resource accounting (WorkflowStateMachine)
//! - phase-rule validation (PhaseComplianceGate)
//! - quality scoring (ResponseQualityAnalyzer)
//! - premature-completion and write-approval checks
//! - reflection scheduling (ReflectionScheduler)
//! - corrective guidance and three-strikes escalation (GuidanceEscalationService)
//! - KPI bookkeeping (ComplianceMetricsTracker)
//!
//! Turns of one job are serialised by a per-job mutex; different jobs run in
//! parallel.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::Instrument;
use warden_advisor::AdvisoryModel;
use warden_core::config::{Config, EnforcementConfig};
use warden_core::{Phase, ToolCall, Violation, ViolationKind};
use warden_telemetry::metrics::{
    MetricsCollector, ACTIVE_JOBS, ESCALATIONS_TOTAL, QUALITY_SCORE, TURNS_TOTAL, VIOLATIONS_TOTAL,
};

use crate::approval::{ApprovalError, WriteApprovalStore};
use crate::compliance_metrics::{
    self, AggregateKpis, ComplianceMetricsTracker, JobKpis, MetricsError, ParityCheck,
};
use crate::guidance::{GuidanceContext, GuidanceEscalationService, GuidanceRequest, GuidanceResponse};
use crate::phase_gate::PhaseComplianceGate;
use crate::quality::{ResponseQualityAnalyzer, RETRY_THRESHOLD};
use crate::reflection::{ReflectionScheduler, ReflectionStats, ReflectionValidation};
use crate::state_machine::{StateMachineError, WorkflowLimits, WorkflowSnapshot, WorkflowStateMachine};
use crate::tools::{FILE_MODIFICATION, TASK_LIST, TEST_EXECUTION};

/// Phrases that claim the task is finished.
pub const COMPLETION_CLAIMS: &[&str] = &[
    "task complete",
    "task is complete",
    "all done",
    "implementation is complete",
    "everything is working",
    "successfully completed",
];

/// Claims matched as whole words, so "reinstall done" is not "all done".
static COMPLETION_CLAIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives = COMPLETION_CLAIMS
        .iter()
        .map(|claim| regex::escape(claim).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives))
        .expect("completion claims escape to a valid regex")
});

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

pub type Result<T> = std::result::Result<T, EnforcementError>;

// ---------------------------------------------------------------------------
// Turn input / output
// ---------------------------------------------------------------------------

/// Caller-supplied context of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnContext {
    pub job_id: String,
    /// The phase the conversation loop believes the job is in.
    pub phase: Phase,
    #[serde(default)]
    pub user_message: String,
}

impl TurnContext {
    pub fn new(job_id: impl Into<String>, phase: Phase) -> Self {
        Self {
            job_id: job_id.into(),
            phase,
            user_message: String::new(),
        }
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }
}

/// What the primary model produced in one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurn {
    pub response: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl AgentTurn {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    pub fn with_tool(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }
}

/// The per-turn verdict handed back to the conversation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementResult {
    pub passed: bool,
    pub violations: Vec<String>,
    pub guidance_injected: Option<String>,
    pub should_retry: bool,
    pub should_escalate: bool,
    pub quality_score: u32,
    pub reflection_prompt: Option<String>,
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

struct JobState {
    workflow: WorkflowStateMachine,
    reflection: ReflectionScheduler,
    approvals: WriteApprovalStore,
}

/// KPI updates produced by one turn, applied under a single write guard.
#[derive(Default)]
struct TurnKpis {
    completed_phases: Vec<Phase>,
    task_list_created: bool,
    tests_executed: bool,
    premature_completion: bool,
    severities: Vec<u32>,
    token_efficiency: f64,
}

impl TurnKpis {
    fn apply(&self, tracker: &mut ComplianceMetricsTracker, job_id: &str) -> compliance_metrics::Result<()> {
        for phase in &self.completed_phases {
            tracker.record_phase_completion(job_id, *phase)?;
        }
        if self.task_list_created {
            tracker.record_task_list_creation(job_id)?;
        }
        if self.tests_executed {
            tracker.record_test_execution(job_id)?;
        }
        if self.premature_completion {
            tracker.record_premature_completion(job_id)?;
        }
        for severity in &self.severities {
            tracker.record_violation(job_id, *severity)?;
        }
        tracker.update_token_efficiency(job_id, self.token_efficiency)
    }
}

// ---------------------------------------------------------------------------
// EnforcementOrchestrator
// ---------------------------------------------------------------------------

pub struct EnforcementOrchestrator {
    limits: WorkflowLimits,
    reflection_interval: u32,
    enforcement: EnforcementConfig,
    workspace_root: PathBuf,
    gate: PhaseComplianceGate,
    analyzer: ResponseQualityAnalyzer,
    guidance: GuidanceEscalationService,
    jobs: DashMap<String, Arc<Mutex<JobState>>>,
    metrics: RwLock<ComplianceMetricsTracker>,
    telemetry: Arc<MetricsCollector>,
}

impl EnforcementOrchestrator {
    /// Build an orchestrator. `advisor` of `None` disables guidance.
    pub fn new(config: &Config, advisor: Option<Arc<dyn AdvisoryModel>>) -> Self {
        let telemetry = Arc::new(MetricsCollector::with_defaults());
        let workspace_root = config
            .enforcement
            .workspace_root
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));

        Self {
            limits: WorkflowLimits::from(&config.limits),
            reflection_interval: config.reflection.interval,
            enforcement: config.enforcement.clone(),
            workspace_root,
            gate: PhaseComplianceGate::new(),
            analyzer: ResponseQualityAnalyzer::new(),
            guidance: GuidanceEscalationService::new(
                advisor,
                config.guidance.clone(),
                Arc::clone(&telemetry),
            ),
            jobs: DashMap::new(),
            metrics: RwLock::new(ComplianceMetricsTracker::new()),
            telemetry,
        }
    }

    /// Replace the phase rule table.
    pub fn with_gate(mut self, gate: PhaseComplianceGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn guidance(&self) -> &GuidanceEscalationService {
        &self.guidance
    }

    pub fn telemetry(&self) -> &Arc<MetricsCollector> {
        &self.telemetry
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Create or reset a job's workflow, reflection and KPI state.
    ///
    /// Guidance history is kept; use [`clear_guidance_history`](Self::clear_guidance_history).
    pub async fn initialize_job(&self, job_id: &str) {
        self.jobs.insert(job_id.to_string(), self.fresh_state());
        self.register_job(job_id).await;
    }

    fn fresh_state(&self) -> Arc<Mutex<JobState>> {
        Arc::new(Mutex::new(JobState {
            workflow: WorkflowStateMachine::new(self.limits),
            reflection: ReflectionScheduler::new(self.reflection_interval),
            approvals: WriteApprovalStore::new(self.workspace_root.clone()),
        }))
    }

    async fn register_job(&self, job_id: &str) {
        self.metrics.write().await.start_job(job_id);
        self.telemetry.set_gauge(ACTIVE_JOBS, self.jobs.len() as i64);
        tracing::info!(job_id, "job initialized");
    }

    /// Lock a job for one turn, creating it first if it is unknown.
    ///
    /// A new job is inserted already locked, so concurrent first turns queue
    /// behind its KPI registration instead of replacing each other.
    async fn lock_or_install(&self, job_id: &str) -> OwnedMutexGuard<JobState> {
        let (handle, fresh) = match self.jobs.entry(job_id.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), None),
            Entry::Vacant(entry) => {
                let state = self.fresh_state();
                let guard = Arc::clone(&state).try_lock_owned().ok();
                entry.insert(Arc::clone(&state));
                (state, guard)
            }
        };
        match fresh {
            Some(guard) => {
                tracing::warn!(job_id, "turn for uninitialized job; initializing");
                self.register_job(job_id).await;
                guard
            }
            None => handle.lock_owned().await,
        }
    }

    fn handle(&self, job_id: &str) -> Result<Arc<Mutex<JobState>>> {
        self.jobs
            .get(job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EnforcementError::JobNotFound(job_id.to_string()))
    }

    /// Move a job forward one phase, outside of a turn.
    pub async fn advance_phase(&self, job_id: &str, target: Phase) -> Result<Phase> {
        let handle = self.handle(job_id)?;
        let mut job = handle.lock().await;
        let from = job.workflow.current_phase();
        let to = job.workflow.transition_to(target)?;
        if from != to {
            self.metrics.write().await.record_phase_completion(job_id, from)?;
        }
        Ok(to)
    }

    /// Send a job from TEST or VERIFY back to EXECUTE.
    pub async fn retry_execute(&self, job_id: &str) -> Result<Phase> {
        let handle = self.handle(job_id)?;
        let mut job = handle.lock().await;
        Ok(job.workflow.begin_retry(Phase::Execute)?)
    }

    /// Close a job and return its parity check.
    pub async fn complete_job(&self, job_id: &str) -> Result<ParityCheck> {
        let handle = self.handle(job_id)?;
        let mut job = handle.lock().await;
        job.workflow.finish();
        let current = job.workflow.current_phase();

        let mut metrics = self.metrics.write().await;
        if current.is_terminal() {
            metrics.record_phase_completion(job_id, current)?;
        }
        metrics.update_token_efficiency(job_id, job.workflow.token_efficiency())?;
        metrics.complete_job(job_id)?;
        let parity = metrics.meets_parity_targets(job_id)?;
        tracing::info!(job_id, passed = parity.passed, "job completed");
        Ok(parity)
    }

    // -- Per-turn enforcement -------------------------------------------------

    /// Enforce one turn. Never fails; an unknown job is initialised first.
    pub async fn validate_response(&self, ctx: &TurnContext, turn: &AgentTurn) -> EnforcementResult {
        let turn_id = warden_telemetry::generate_turn_id();
        let span = tracing::info_span!(
            "enforce_turn",
            job_id = %ctx.job_id,
            phase = %ctx.phase,
            turn_id = %turn_id
        );
        self.enforce_turn(ctx, turn).instrument(span).await
    }

    async fn enforce_turn(&self, ctx: &TurnContext, turn: &AgentTurn) -> EnforcementResult {
        let job_id = ctx.job_id.as_str();
        let mut job = self.lock_or_install(job_id).await;

        let mut violations: Vec<Violation> = Vec::new();
        let mut kpis = TurnKpis::default();

        // Phase sync. The turn is judged by the phase it claims to be in.
        let phase = ctx.phase;
        let current = job.workflow.current_phase();
        if phase != current {
            match job.workflow.transition_to(phase) {
                Ok(_) => kpis.completed_phases.push(current),
                Err(err) => {
                    violations.push(Violation::new(ViolationKind::IllegalTransition, err.to_string()))
                }
            }
        }

        // Resource accounting. Ceiling violations are logged by the state machine itself.
        let mut ceiling = job
            .workflow
            .record_token_usage(turn.input_tokens, turn.output_tokens);
        let mut reflection_due = false;
        for call in &turn.tool_calls {
            ceiling.extend(job.workflow.record_tool_call(&call.name));
            reflection_due |= job.reflection.record_tool_call();
        }

        let gate = self.gate.validate_response(&turn.response, phase, &turn.tool_calls);
        violations.extend(
            gate.violations
                .iter()
                .map(|msg| Violation::new(ViolationKind::PhaseRule, msg.clone())),
        );

        let quality = self
            .analyzer
            .analyze_quality(&turn.response, &turn.tool_calls, Some(phase));
        if quality.is_poor_quality {
            violations.push(Violation::new(
                ViolationKind::LowQuality,
                format!(
                    "Low response quality ({}/100): {}",
                    quality.quality_score,
                    quality.issues.join("; ")
                ),
            ));
        }

        if phase < Phase::Verify && claims_completion(&turn.response) {
            kpis.premature_completion = true;
            violations.push(Violation::new(
                ViolationKind::PrematureCompletion,
                format!("Completion claimed during {} phase before verification", phase),
            ));
        }

        if self.enforcement.enforce_write_approvals {
            for call in turn.tool_calls.iter().filter(|c| FILE_MODIFICATION.matches(c)) {
                match call.target_path() {
                    Some(path) if job.approvals.is_approved(path) => {}
                    Some(path) => violations.push(Violation::new(
                        ViolationKind::UnapprovedWrite,
                        format!("Unapproved write to {} via {}", path, call.name),
                    )),
                    None => violations.push(Violation::new(
                        ViolationKind::UnapprovedWrite,
                        format!("{} call has no target path to approve", call.name),
                    )),
                }
            }
        }

        for violation in &violations {
            job.workflow.record_violation(violation.clone());
        }
        violations.extend(ceiling);

        let reflection_prompt = (reflection_due && !turn.tool_calls.is_empty())
            .then(|| job.reflection.generate_reflection_prompt(phase));

        // Guidance, only for turns that are both non-compliant and badly off course.
        let mut guidance_retry = false;
        let mut guidance_injected = None;
        if !violations.is_empty()
            && (quality.should_escalate || gate.quality_score < RETRY_THRESHOLD)
        {
            let request = GuidanceRequest {
                violation: describe(&violations),
                context: GuidanceContext {
                    phase,
                    user_message: ctx.user_message.clone(),
                    agent_response: turn.response.clone(),
                    tool_calls: turn.tool_calls.clone(),
                },
                quality_score: quality.quality_score.min(gate.quality_score),
            };
            let response = self.guidance.request_guidance(&request).await;
            if !response.is_empty() {
                guidance_retry = response.should_retry;
                guidance_injected =
                    Some(self.guidance.format_guidance_for_injection(&response, job_id));
            }
        }

        let mut should_escalate = quality.should_escalate || job.workflow.has_critical_violations();
        if self.guidance.should_escalate_job(job_id) {
            should_escalate = true;
            let violation = Violation::new(
                ViolationKind::Escalation,
                format!(
                    "Escalation required: {} guidance attempts failed for job {}",
                    self.guidance.escalation_threshold(),
                    job_id
                ),
            );
            job.workflow.record_violation(violation.clone());
            violations.push(violation);
        }

        kpis.task_list_created = TASK_LIST.any(&turn.tool_calls);
        kpis.tests_executed = TEST_EXECUTION.any(&turn.tool_calls);
        kpis.severities = violations.iter().map(|v| v.severity_score).collect();
        kpis.token_efficiency = job.workflow.token_efficiency();
        {
            let mut tracker = self.metrics.write().await;
            if let Err(err) = kpis.apply(&mut tracker, job_id) {
                tracing::warn!(job_id, error = %err, "KPI update skipped");
            }
        }
        drop(job);

        let phase_label = phase.to_string();
        self.telemetry
            .increment_counter(TURNS_TOTAL, &[("phase", phase_label.as_str())]);
        for violation in &violations {
            self.telemetry
                .increment_counter(VIOLATIONS_TOTAL, &[("kind", violation.kind.as_str())]);
        }
        self.telemetry
            .observe(QUALITY_SCORE, f64::from(quality.quality_score));
        if should_escalate {
            self.telemetry.increment_counter(ESCALATIONS_TOTAL, &[]);
            tracing::warn!(job_id, violations = violations.len(), "turn requires escalation");
        }

        let result = EnforcementResult {
            passed: violations.is_empty(),
            violations: violations.into_iter().map(|v| v.description).collect(),
            guidance_injected,
            should_retry: quality.should_retry || guidance_retry,
            should_escalate,
            quality_score: quality.quality_score,
            reflection_prompt,
        };
        tracing::info!(
            passed = result.passed,
            violations = result.violations.len(),
            quality_score = result.quality_score,
            should_retry = result.should_retry,
            should_escalate = result.should_escalate,
            "turn enforced"
        );
        result
    }

    // -- Queries -------------------------------------------------------------

    pub async fn job_snapshot(&self, job_id: &str) -> Result<WorkflowSnapshot> {
        let handle = self.handle(job_id)?;
        let job = handle.lock().await;
        Ok(job.workflow.snapshot())
    }

    pub async fn job_kpis(&self, job_id: &str) -> Option<JobKpis> {
        self.metrics.read().await.job(job_id).cloned()
    }

    pub async fn meets_parity_targets(&self, job_id: &str) -> Result<ParityCheck> {
        Ok(self.metrics.read().await.meets_parity_targets(job_id)?)
    }

    /// Computed from a snapshot of every job's KPIs.
    pub async fn calculate_aggregate_kpis(&self) -> AggregateKpis {
        let snapshot = self.metrics.read().await.clone();
        snapshot.calculate_aggregate_kpis()
    }

    pub async fn generate_compliance_report(&self, job_id: Option<&str>) -> Result<String> {
        Ok(self.metrics.read().await.generate_report(job_id)?)
    }

    pub fn validate_reflection_response(&self, response: &str) -> ReflectionValidation {
        ReflectionScheduler::validate_reflection_response(response)
    }

    pub async fn reflection_stats(&self, job_id: &str) -> Result<ReflectionStats> {
        let handle = self.handle(job_id)?;
        let job = handle.lock().await;
        Ok(job.reflection.stats())
    }

    pub fn guidance_history(&self, job_id: &str) -> Vec<GuidanceResponse> {
        self.guidance.get_guidance_history(job_id)
    }

    pub fn clear_guidance_history(&self, job_id: &str) {
        self.guidance.clear_history(job_id);
    }

    // -- Write approvals -------------------------------------------------------

    pub async fn approve_write(&self, job_id: &str, path: &str) -> Result<PathBuf> {
        let handle = self.handle(job_id)?;
        let mut job = handle.lock().await;
        Ok(job.approvals.approve(path)?)
    }

    pub async fn revoke_write(&self, job_id: &str, path: &str) -> Result<PathBuf> {
        let handle = self.handle(job_id)?;
        let mut job = handle.lock().await;
        Ok(job.approvals.revoke(path)?)
    }
}

fn claims_completion(response: &str) -> bool {
    COMPLETION_CLAIM_RE.is_match(response)
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.description.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_claims_are_case_insensitive() {
        assert!(claims_completion("Great, the Task Is Complete!"));
        assert!(!claims_completion("Starting the task now."));
    }

    #[test]
    fn test_completion_claims_match_whole_words_only() {
        assert!(!claims_completion("Reinstall done."));
        assert!(!claims_completion("npm install done, reading the lockfile next"));
        assert!(!claims_completion("The subtask completed successfully completedness"));
        assert!(claims_completion("All done."));
        assert!(claims_completion("The implementation  is\ncomplete"));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = EnforcementResult {
            passed: true,
            violations: vec![],
            guidance_injected: None,
            should_retry: false,
            should_escalate: false,
            quality_score: 100,
            reflection_prompt: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        for key in [
            "passed",
            "violations",
            "guidanceInjected",
            "shouldRetry",
            "shouldEscalate",
            "qualityScore",
            "reflectionPrompt",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json["guidanceInjected"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_job_is_initialized_on_first_turn() {
        let orch = EnforcementOrchestrator::new(&Config::default(), None);
        let ctx = TurnContext::new("fresh", Phase::Assess);
        let turn = AgentTurn::new("Reading.").with_tool(ToolCall::named("read_file"));
        let result = orch.validate_response(&ctx, &turn).await;
        assert!(result.passed, "{:?}", result.violations);
        assert_eq!(orch.job_count(), 1);
        assert!(orch.job_kpis("fresh").await.is_some());
    }
}
