//! Guidance escalation: advisor delegation, degradation and three strikes.

use std::sync::Arc;
use std::time::Duration;

use warden_advisor::{AdvisorError, AdvisoryModel, MockAdvisor};
use warden_core::config::GuidanceConfig;
use warden_core::{Phase, Severity, ToolCall};
use warden_enforcement::guidance::{
    GuidanceContext, GuidanceEscalationService, GuidanceRequest, GuidanceResponse,
};
use warden_telemetry::metrics::{MetricsCollector, GUIDANCE_REQUESTS_TOTAL};

fn request(quality_score: u32) -> GuidanceRequest {
    GuidanceRequest {
        violation: "PLAN phase requires creating a task list".into(),
        context: GuidanceContext {
            phase: Phase::Plan,
            user_message: "Add retry support to the HTTP client".into(),
            agent_response: "I will now think about the plan in depth.".into(),
            tool_calls: vec![ToolCall::named("read_file")],
        },
        quality_score,
    }
}

fn service(advisor: Option<MockAdvisor>, config: GuidanceConfig) -> GuidanceEscalationService {
    let advisor = advisor.map(|m| Arc::new(m) as Arc<dyn AdvisoryModel>);
    GuidanceEscalationService::new(advisor, config, Arc::new(MetricsCollector::with_defaults()))
}

// ===========================================================================
// Unconfigured
// ===========================================================================

#[tokio::test]
async fn test_unconfigured_advisor_returns_empty_guidance() {
    let svc = service(None, GuidanceConfig::default());
    let response = svc.request_guidance(&request(20)).await;

    assert_eq!(response, GuidanceResponse::empty());
    assert!(response.is_empty());

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "guidance": "",
            "severity": "low",
            "shouldRetry": false,
            "suggestedActions": []
        })
    );
}

// ===========================================================================
// Configured
// ===========================================================================

#[tokio::test]
async fn test_reply_severity_follows_quality_score() {
    let reply = "Create the task list now.\n- Call todo_write with 3 steps\n- Stop narrating";
    let cases = [
        (10, Severity::Critical, true),
        (45, Severity::High, true),
        (55, Severity::Medium, false),
        (90, Severity::Low, false),
    ];
    for (score, severity, retry) in cases {
        let svc = service(Some(MockAdvisor::new().with_reply(reply)), GuidanceConfig::default());
        let response = svc.request_guidance(&request(score)).await;
        assert_eq!(response.severity, severity, "score {}", score);
        assert_eq!(response.should_retry, retry, "score {}", score);
        assert_eq!(response.guidance, reply);
        assert_eq!(
            response.suggested_actions,
            vec!["Call todo_write with 3 steps", "Stop narrating"]
        );
    }
}

#[tokio::test]
async fn test_prompt_carries_violation_and_word_limit() {
    let mock = MockAdvisor::new();
    let svc = service(Some(mock.clone()), GuidanceConfig::default());
    svc.request_guidance(&request(30)).await;

    let prompts = mock.captured_prompts();
    assert_eq!(prompts.len(), 1);
    let (system, user) = &prompts[0];
    assert!(system.contains("2-3"));
    assert!(user.contains("PLAN phase requires creating a task list"));
    assert!(user.contains("Current phase: PLAN"));
    assert!(user.contains("read_file"));
    assert!(user.contains("at most 100 words"));
}

#[tokio::test]
async fn test_advisor_error_yields_fallback() {
    let metrics = Arc::new(MetricsCollector::with_defaults());
    let mock = MockAdvisor::new().with_error(AdvisorError::Api {
        status: 500,
        message: "overloaded".into(),
    });
    let svc = GuidanceEscalationService::new(
        Some(Arc::new(mock)),
        GuidanceConfig::default(),
        Arc::clone(&metrics),
    );

    let response = svc.request_guidance(&request(15)).await;
    assert_eq!(response.severity, Severity::Medium);
    assert!(response.should_retry);
    assert!(response
        .guidance
        .contains("PLAN phase requires creating a task list"));
    assert_eq!(response.suggested_actions.len(), 3);
    assert_eq!(
        metrics.counter(GUIDANCE_REQUESTS_TOTAL, &[("outcome", "fallback")]),
        1
    );
}

#[tokio::test]
async fn test_blank_reply_yields_fallback() {
    let svc = service(
        Some(MockAdvisor::new().with_reply("   \n")),
        GuidanceConfig::default(),
    );
    let response = svc.request_guidance(&request(15)).await;
    assert_eq!(response.severity, Severity::Medium);
    assert!(!response.is_empty());
}

#[tokio::test]
async fn test_slow_advisor_times_out_to_fallback() {
    let config = GuidanceConfig {
        timeout_secs: 1,
        ..GuidanceConfig::default()
    };
    let slow = MockAdvisor::new()
        .with_reply("too late")
        .with_delay(Duration::from_secs(3));
    let svc = service(Some(slow), config);

    let response = svc.request_guidance(&request(20)).await;
    assert_ne!(response.guidance, "too late");
    assert_eq!(response.severity, Severity::Medium);
}

// ===========================================================================
// History and three strikes
// ===========================================================================

#[test]
fn test_injection_renders_block_and_appends_history() {
    let svc = service(None, GuidanceConfig::default());
    let guidance = GuidanceResponse {
        guidance: "Run the tests now.".into(),
        severity: Severity::Critical,
        should_retry: true,
        suggested_actions: vec!["Call run_tests".into()],
    };

    let block = svc.format_guidance_for_injection(&guidance, "job-1");
    assert!(block.starts_with('╔'));
    assert!(block.ends_with('╝'));
    assert!(block.contains("🚨"));
    assert!(block.contains("Run the tests now."));
    assert!(block.contains("1. Call run_tests"));
    assert_eq!(svc.get_guidance_history("job-1"), vec![guidance]);
    assert!(svc.get_guidance_history("job-2").is_empty());
}

#[test]
fn test_escalation_iff_history_reaches_threshold() {
    let svc = service(None, GuidanceConfig::default());
    let guidance = GuidanceResponse {
        guidance: "Stop.".into(),
        severity: Severity::High,
        should_retry: true,
        suggested_actions: vec![],
    };

    for expected_len in 1..=4 {
        svc.format_guidance_for_injection(&guidance, "job");
        assert_eq!(svc.get_guidance_history("job").len(), expected_len);
        assert_eq!(svc.should_escalate_job("job"), expected_len >= 3);
    }
    assert!(!svc.should_escalate_job("other"));

    svc.clear_history("job");
    assert!(!svc.should_escalate_job("job"));
    assert!(svc.get_guidance_history("job").is_empty());
}

#[test]
fn test_threshold_is_configurable() {
    let svc = service(
        None,
        GuidanceConfig {
            escalation_threshold: 1,
            ..GuidanceConfig::default()
        },
    );
    svc.format_guidance_for_injection(&GuidanceResponse::empty(), "job");
    assert!(svc.should_escalate_job("job"));
}
