//! Per-job KPI rollups and the platform-wide aggregates derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use warden_core::Phase;

/// Target: % of jobs that created a task list.
pub const TASK_LIST_TARGET: f64 = 99.0;
/// Target: % of jobs that executed tests.
pub const TEST_EXECUTION_TARGET: f64 = 97.0;
/// Ceiling: % of jobs with a premature-completion attempt.
pub const PREMATURE_COMPLETION_CEILING: f64 = 1.0;
/// Floor for the average compliance score.
pub const COMPLIANCE_SCORE_TARGET: f64 = 95.0;
/// Per-job compliance score required for parity.
pub const JOB_COMPLIANCE_TARGET: u32 = 95;
/// Violations after which a job counts as escalated.
pub const ESCALATION_VIOLATION_COUNT: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("job not found: {0}")]
    JobNotFound(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKpis {
    pub job_id: String,
    pub task_list_created: bool,
    pub tests_executed: bool,
    pub premature_completion_attempts: u32,
    /// Starts at 100; only ever decreases, never below 0.
    pub workflow_compliance_score: u32,
    pub violation_count: u32,
    pub phases_completed: BTreeSet<Phase>,
    pub token_efficiency: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobKpis {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            task_list_created: false,
            tests_executed: false,
            premature_completion_attempts: 0,
            workflow_compliance_score: 100,
            violation_count: 0,
            phases_completed: BTreeSet::new(),
            token_efficiency: 0.0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParityCheck {
    pub passed: bool,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub task_list_creation: bool,
    pub test_execution: bool,
    pub premature_completion: bool,
    pub compliance_score: bool,
}

impl TargetStatus {
    pub fn all_met(&self) -> bool {
        self.task_list_creation
            && self.test_execution
            && self.premature_completion
            && self.compliance_score
    }
}

/// Platform-wide rates, all expressed as percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateKpis {
    pub total_jobs: usize,
    pub task_list_creation_rate: f64,
    pub test_execution_rate: f64,
    pub premature_completion_rate: f64,
    pub average_compliance_score: f64,
    pub escalation_rate: f64,
    pub targets: TargetStatus,
}

// ---------------------------------------------------------------------------
// ComplianceMetricsTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ComplianceMetricsTracker {
    jobs: HashMap<String, JobKpis>,
}

impl ComplianceMetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) tracking a job with a fresh record.
    pub fn start_job(&mut self, job_id: &str) {
        self.jobs.insert(job_id.to_string(), JobKpis::new(job_id));
    }

    pub fn job(&self, job_id: &str) -> Option<&JobKpis> {
        self.jobs.get(job_id)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn job_mut(&mut self, job_id: &str) -> Result<&mut JobKpis> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| MetricsError::JobNotFound(job_id.to_string()))
    }

    pub fn record_task_list_creation(&mut self, job_id: &str) -> Result<()> {
        self.job_mut(job_id)?.task_list_created = true;
        Ok(())
    }

    pub fn record_test_execution(&mut self, job_id: &str) -> Result<()> {
        self.job_mut(job_id)?.tests_executed = true;
        Ok(())
    }

    pub fn record_premature_completion(&mut self, job_id: &str) -> Result<()> {
        self.job_mut(job_id)?.premature_completion_attempts += 1;
        Ok(())
    }

    /// Idempotent: a phase recorded twice is stored once.
    pub fn record_phase_completion(&mut self, job_id: &str, phase: Phase) -> Result<()> {
        self.job_mut(job_id)?.phases_completed.insert(phase);
        Ok(())
    }

    /// Lower the compliance score by `severity`, floored at 0.
    pub fn record_violation(&mut self, job_id: &str, severity: u32) -> Result<()> {
        let kpis = self.job_mut(job_id)?;
        kpis.workflow_compliance_score = kpis.workflow_compliance_score.saturating_sub(severity);
        kpis.violation_count += 1;
        Ok(())
    }

    pub fn update_token_efficiency(&mut self, job_id: &str, efficiency: f64) -> Result<()> {
        self.job_mut(job_id)?.token_efficiency = efficiency;
        Ok(())
    }

    pub fn complete_job(&mut self, job_id: &str) -> Result<()> {
        self.job_mut(job_id)?.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn meets_parity_targets(&self, job_id: &str) -> Result<ParityCheck> {
        let kpis = self
            .jobs
            .get(job_id)
            .ok_or_else(|| MetricsError::JobNotFound(job_id.to_string()))?;

        let mut failures = Vec::new();
        if !kpis.task_list_created {
            failures.push("Task list not created".to_string());
        }
        if !kpis.tests_executed {
            failures.push("Tests not executed".to_string());
        }
        if kpis.premature_completion_attempts > 0 {
            failures.push(format!(
                "Premature completion attempts: {} (target 0)",
                kpis.premature_completion_attempts
            ));
        }
        if kpis.workflow_compliance_score < JOB_COMPLIANCE_TARGET {
            failures.push(format!(
                "Workflow compliance score {} below target {}",
                kpis.workflow_compliance_score, JOB_COMPLIANCE_TARGET
            ));
        }

        Ok(ParityCheck {
            passed: failures.is_empty(),
            failures,
        })
    }

    /// Recomputed from every job on each call.
    pub fn calculate_aggregate_kpis(&self) -> AggregateKpis {
        let total = self.jobs.len();
        if total == 0 {
            return AggregateKpis {
                total_jobs: 0,
                task_list_creation_rate: 0.0,
                test_execution_rate: 0.0,
                premature_completion_rate: 0.0,
                average_compliance_score: 0.0,
                escalation_rate: 0.0,
                targets: TargetStatus {
                    task_list_creation: false,
                    test_execution: false,
                    premature_completion: false,
                    compliance_score: false,
                },
            };
        }

        let pct = |n: usize| n as f64 * 100.0 / total as f64;
        let jobs = self.jobs.values();
        let task_lists = jobs.clone().filter(|j| j.task_list_created).count();
        let tests = jobs.clone().filter(|j| j.tests_executed).count();
        let premature = jobs
            .clone()
            .filter(|j| j.premature_completion_attempts > 0)
            .count();
        let escalated = jobs
            .clone()
            .filter(|j| j.violation_count >= ESCALATION_VIOLATION_COUNT)
            .count();
        let score_sum: u64 = jobs.map(|j| u64::from(j.workflow_compliance_score)).sum();

        let task_list_creation_rate = pct(task_lists);
        let test_execution_rate = pct(tests);
        let premature_completion_rate = pct(premature);
        let average_compliance_score = score_sum as f64 / total as f64;

        AggregateKpis {
            total_jobs: total,
            task_list_creation_rate,
            test_execution_rate,
            premature_completion_rate,
            average_compliance_score,
            escalation_rate: pct(escalated),
            targets: TargetStatus {
                task_list_creation: task_list_creation_rate >= TASK_LIST_TARGET,
                test_execution: test_execution_rate >= TEST_EXECUTION_TARGET,
                premature_completion: premature_completion_rate <= PREMATURE_COMPLETION_CEILING,
                compliance_score: average_compliance_score >= COMPLIANCE_SCORE_TARGET,
            },
        }
    }

    /// Human-readable summary of one job, or of the whole platform.
    pub fn generate_report(&self, job_id: Option<&str>) -> Result<String> {
        match job_id {
            Some(id) => self.job_report(id),
            None => Ok(self.platform_report()),
        }
    }

    fn job_report(&self, job_id: &str) -> Result<String> {
        let kpis = self
            .jobs
            .get(job_id)
            .ok_or_else(|| MetricsError::JobNotFound(job_id.to_string()))?;
        let parity = self.meets_parity_targets(job_id)?;
        let phases: Vec<String> = kpis.phases_completed.iter().map(|p| p.to_string()).collect();

        let mut out = String::new();
        let _ = writeln!(out, "=== Compliance report: job {} ===", job_id);
        let _ = writeln!(out, "Task list created:        {}", yes_no(kpis.task_list_created));
        let _ = writeln!(out, "Tests executed:           {}", yes_no(kpis.tests_executed));
        let _ = writeln!(out, "Premature completions:    {}", kpis.premature_completion_attempts);
        let _ = writeln!(out, "Compliance score:         {}/100", kpis.workflow_compliance_score);
        let _ = writeln!(out, "Violations:               {}", kpis.violation_count);
        let _ = writeln!(
            out,
            "Phases completed:         {}",
            if phases.is_empty() { "-".to_string() } else { phases.join(" → ") }
        );
        let _ = writeln!(out, "Token efficiency:         {:.2} calls/1k tokens", kpis.token_efficiency);
        let _ = writeln!(out, "Parity:                   {}", if parity.passed { "PASS" } else { "FAIL" });
        for failure in &parity.failures {
            let _ = writeln!(out, "  - {}", failure);
        }
        Ok(out)
    }

    fn platform_report(&self) -> String {
        let agg = self.calculate_aggregate_kpis();
        let mark = |ok: bool| if ok { "✅" } else { "❌" };

        let mut out = String::new();
        let _ = writeln!(out, "=== Platform compliance report ({} jobs) ===", agg.total_jobs);
        let _ = writeln!(
            out,
            "{} Task list creation:    {:.1}% (target ≥{}%)",
            mark(agg.targets.task_list_creation),
            agg.task_list_creation_rate,
            TASK_LIST_TARGET
        );
        let _ = writeln!(
            out,
            "{} Test execution:        {:.1}% (target ≥{}%)",
            mark(agg.targets.test_execution),
            agg.test_execution_rate,
            TEST_EXECUTION_TARGET
        );
        let _ = writeln!(
            out,
            "{} Premature completion:  {:.1}% (target ≤{}%)",
            mark(agg.targets.premature_completion),
            agg.premature_completion_rate,
            PREMATURE_COMPLETION_CEILING
        );
        let _ = writeln!(
            out,
            "{} Avg compliance score:  {:.1} (target ≥{})",
            mark(agg.targets.compliance_score),
            agg.average_compliance_score,
            COMPLIANCE_SCORE_TARGET
        );
        let _ = writeln!(out, "   Escalation rate:       {:.1}%", agg.escalation_rate);
        out
    }
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
