//! Corrective guidance from the advisory model, and the per-job history that
//! drives the three-strikes escalation rule.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use warden_advisor::{AdvisorError, AdvisoryModel};
use warden_core::config::GuidanceConfig;
use warden_core::{Phase, Severity, ToolCall};
use warden_telemetry::metrics::{MetricsCollector, ADVISOR_DURATION_SECONDS, GUIDANCE_REQUESTS_TOTAL};

use crate::quality::RETRY_THRESHOLD;

const MAX_SUGGESTED_ACTIONS: usize = 3;
const USER_MESSAGE_EXCERPT: usize = 500;
const RESPONSE_EXCERPT: usize = 1000;

const SYSTEM_PROMPT: &str = "You supervise a coding agent that must follow a fixed workflow: \
ASSESS, PLAN, EXECUTE, TEST, VERIFY, CONFIRM, COMMIT. The agent just violated it. \
Reply with direct imperative instructions only. Give 2-3 concrete corrective actions \
as a bulleted list. No preamble, no apologies, no explanation of the workflow.";

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceContext {
    pub phase: Phase,
    pub user_message: String,
    pub agent_response: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceRequest {
    pub violation: String,
    pub context: GuidanceContext,
    pub quality_score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceResponse {
    /// Empty means "no action".
    pub guidance: String,
    pub severity: Severity,
    pub should_retry: bool,
    pub suggested_actions: Vec<String>,
}

impl GuidanceResponse {
    /// The response used when no advisory model is configured.
    pub fn empty() -> Self {
        Self {
            guidance: String::new(),
            severity: Severity::Low,
            should_retry: false,
            suggested_actions: Vec::new(),
        }
    }

    fn fallback(request: &GuidanceRequest) -> Self {
        let phase = request.context.phase;
        Self {
            guidance: format!(
                "Workflow violation: {}. Return to the {} phase requirements and call the \
                 appropriate tool immediately.",
                request.violation, phase
            ),
            severity: Severity::Medium,
            should_retry: true,
            suggested_actions: vec![
                format!("Re-read the {} phase requirements", phase),
                "Call the required tool before explaining".to_string(),
                "Keep explanation under 5 words before tool calls".to_string(),
            ],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.guidance.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// GuidanceEscalationService
// ---------------------------------------------------------------------------

pub struct GuidanceEscalationService {
    advisor: Option<Arc<dyn AdvisoryModel>>,
    config: GuidanceConfig,
    history: DashMap<String, Vec<GuidanceResponse>>,
    metrics: Arc<MetricsCollector>,
}

impl GuidanceEscalationService {
    pub fn new(
        advisor: Option<Arc<dyn AdvisoryModel>>,
        config: GuidanceConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            advisor,
            config,
            history: DashMap::new(),
            metrics,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.advisor.is_some()
    }

    pub fn escalation_threshold(&self) -> usize {
        self.config.escalation_threshold
    }

    /// Ask the advisory model for corrective guidance.
    ///
    /// Never fails: an unconfigured advisor yields [`GuidanceResponse::empty`],
    /// and errors or timeouts yield a deterministic fallback.
    pub async fn request_guidance(&self, request: &GuidanceRequest) -> GuidanceResponse {
        let Some(advisor) = &self.advisor else {
            self.metrics
                .increment_counter(GUIDANCE_REQUESTS_TOTAL, &[("outcome", "empty")]);
            return GuidanceResponse::empty();
        };

        let user_prompt = self.build_user_prompt(request);
        let started = Instant::now();
        let reply = match tokio::time::timeout(
            self.config.timeout(),
            advisor.advise(SYSTEM_PROMPT, &user_prompt),
        )
        .await
        {
            Ok(Ok(text)) if text.trim().is_empty() => Err(AdvisorError::EmptyReply),
            Ok(result) => result,
            Err(_) => Err(AdvisorError::Timeout),
        };
        self.metrics
            .observe(ADVISOR_DURATION_SECONDS, started.elapsed().as_secs_f64());

        match reply {
            Ok(text) => {
                self.metrics
                    .increment_counter(GUIDANCE_REQUESTS_TOTAL, &[("outcome", "advised")]);
                tracing::info!(
                    advisor = advisor.name(),
                    phase = %request.context.phase,
                    quality_score = request.quality_score,
                    "guidance received"
                );
                let text = text.trim().to_string();
                GuidanceResponse {
                    suggested_actions: extract_actions(&text),
                    guidance: text,
                    severity: Severity::from_quality_score(request.quality_score),
                    should_retry: request.quality_score < RETRY_THRESHOLD,
                }
            }
            Err(err) => {
                self.metrics
                    .increment_counter(GUIDANCE_REQUESTS_TOTAL, &[("outcome", "fallback")]);
                tracing::warn!(
                    advisor = advisor.name(),
                    error = %err,
                    "advisory model failed; using fallback guidance"
                );
                GuidanceResponse::fallback(request)
            }
        }
    }

    fn build_user_prompt(&self, request: &GuidanceRequest) -> String {
        let ctx = &request.context;
        let tools = if ctx.tool_calls.is_empty() {
            "none".to_string()
        } else {
            ctx.tool_calls
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Current phase: {}\n\
             Violation: {}\n\
             Quality score: {}/100\n\
             Tools called: {}\n\
             User request: {}\n\
             Agent response: {}\n\n\
             Respond in at most {} words.",
            ctx.phase,
            request.violation,
            request.quality_score,
            tools,
            excerpt(&ctx.user_message, USER_MESSAGE_EXCERPT),
            excerpt(&ctx.agent_response, RESPONSE_EXCERPT),
            self.config.max_reply_words
        )
    }

    /// Render guidance for the agent's next turn and record it in the job's
    /// history.
    pub fn format_guidance_for_injection(&self, guidance: &GuidanceResponse, job_id: &str) -> String {
        let (icon, label) = match guidance.severity {
            Severity::Critical => ("🚨", "CRITICAL"),
            Severity::High => ("⚠️", "HIGH"),
            Severity::Medium => ("📋", "MEDIUM"),
            Severity::Low => ("💡", "LOW"),
        };
        let border = "═".repeat(50);

        let mut out = format!("╔{}╗\n", border);
        out.push_str(&format!("{} WORKFLOW GUIDANCE [{}]\n", icon, label));
        out.push_str(guidance.guidance.trim());
        out.push('\n');
        if !guidance.suggested_actions.is_empty() {
            out.push_str("\nRequired actions:\n");
            for (i, action) in guidance.suggested_actions.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", i + 1, action));
            }
        }
        out.push_str(&format!("╚{}╝", border));

        let mut entries = self.history.entry(job_id.to_string()).or_default();
        entries.push(guidance.clone());
        tracing::debug!(job_id, attempts = entries.len(), "guidance injected");
        out
    }

    /// True once the job's guidance history reaches the escalation threshold.
    pub fn should_escalate_job(&self, job_id: &str) -> bool {
        self.history
            .get(job_id)
            .map(|h| h.len() >= self.config.escalation_threshold)
            .unwrap_or(false)
    }

    pub fn get_guidance_history(&self, job_id: &str) -> Vec<GuidanceResponse> {
        self.history
            .get(job_id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub fn clear_history(&self, job_id: &str) {
        self.history.remove(job_id);
    }
}

/// Up to three actions taken from bulleted or numbered reply lines.
fn extract_actions(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = if let Some(rest) = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.strip_prefix("• "))
            {
                rest
            } else {
                let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
                if digits == 0 {
                    return None;
                }
                line[digits..]
                    .strip_prefix(". ")
                    .or_else(|| line[digits..].strip_prefix(") "))?
            };
            let rest = rest.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .take(MAX_SUGGESTED_ACTIONS)
        .collect()
}

/// At most `max` characters, cut on a char boundary.
fn excerpt(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_from_bullets_and_numbers() {
        let text = "Stop narrating.\n- Run the tests\n2. Read the diff\n* Commit\n- Extra";
        assert_eq!(
            extract_actions(text),
            vec!["Run the tests", "Read the diff", "Commit"]
        );
        assert!(extract_actions("No list here.\n10 tools").is_empty());
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("abc", 10), "abc");
    }

    #[test]
    fn test_unconfigured_service_never_escalates_without_history() {
        let svc = GuidanceEscalationService::new(
            None,
            GuidanceConfig::default(),
            Arc::new(MetricsCollector::new()),
        );
        assert!(!svc.is_configured());
        assert!(!svc.should_escalate_job("j"));
        assert!(svc.get_guidance_history("j").is_empty());
    }
}
