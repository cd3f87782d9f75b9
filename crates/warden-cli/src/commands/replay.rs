use std::path::Path;

use serde::Deserialize;
use warden_core::config::Config;
use warden_core::Phase;
use warden_enforcement::{AgentTurn, EnforcementOrchestrator, EnforcementResult, TurnContext};

/// One line of a replay transcript.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub job_id: String,
    pub phase: Phase,
    #[serde(default)]
    pub user_message: String,
    #[serde(flatten)]
    pub turn: AgentTurn,
}

/// Parse a JSON-lines transcript. Blank lines and `#` comments are skipped.
pub fn parse_transcript(text: &str) -> anyhow::Result<Vec<TurnRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("transcript line {}: {e}", idx + 1))
        })
        .collect()
}

/// Run the `replay` subcommand.
pub async fn run(config: &Config, transcript: &Path, json: bool) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(transcript)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", transcript.display()))?;
    let records = parse_transcript(&text)?;

    let advisor = warden_advisor::advisor_from_config(&config.advisor);
    let orchestrator = EnforcementOrchestrator::new(config, advisor);
    let results = replay(&orchestrator, &records).await?;

    for (record, result) in records.iter().zip(&results) {
        if json {
            println!("{}", serde_json::to_string(result)?);
        } else {
            print_turn(record, result);
        }
    }
    if json {
        return Ok(());
    }

    let mut seen: Vec<&str> = Vec::new();
    for record in &records {
        if !seen.contains(&record.job_id.as_str()) {
            seen.push(&record.job_id);
        }
    }
    println!();
    for job_id in seen {
        let parity = orchestrator.complete_job(job_id).await?;
        println!(
            "{job_id}: parity {}",
            if parity.passed { "PASS" } else { "FAIL" }
        );
        for failure in &parity.failures {
            println!("  - {failure}");
        }
    }
    println!();
    println!("{}", orchestrator.generate_compliance_report(None).await?);
    Ok(())
}

/// Feed every record through the orchestrator in order.
///
/// Jobs are initialised on first sight. A record that moves a job from TEST
/// or VERIFY back to EXECUTE is treated as a retry.
pub async fn replay(
    orchestrator: &EnforcementOrchestrator,
    records: &[TurnRecord],
) -> anyhow::Result<Vec<EnforcementResult>> {
    let mut known: Vec<&str> = Vec::new();
    let mut results = Vec::with_capacity(records.len());

    for record in records {
        if !known.contains(&record.job_id.as_str()) {
            orchestrator.initialize_job(&record.job_id).await;
            known.push(&record.job_id);
        }

        let current = orchestrator.job_snapshot(&record.job_id).await?.current_phase;
        if record.phase == Phase::Execute && matches!(current, Phase::Test | Phase::Verify) {
            if let Err(e) = orchestrator.retry_execute(&record.job_id).await {
                tracing::warn!(job_id = %record.job_id, error = %e, "retry refused");
            }
        }

        let ctx = TurnContext::new(record.job_id.clone(), record.phase)
            .with_user_message(record.user_message.clone());
        results.push(orchestrator.validate_response(&ctx, &record.turn).await);
    }
    Ok(results)
}

fn print_turn(record: &TurnRecord, result: &EnforcementResult) {
    println!(
        "[{}] {:<8} {} score={}{}{}",
        record.job_id,
        record.phase.to_string(),
        if result.passed { "PASS" } else { "FAIL" },
        result.quality_score,
        if result.should_retry { " retry" } else { "" },
        if result.should_escalate { " ESCALATE" } else { "" },
    );
    for violation in &result.violations {
        println!("    - {violation}");
    }
    if let Some(prompt) = &result.reflection_prompt {
        println!("    reflection: {}", prompt.lines().next().unwrap_or_default());
    }
    if let Some(guidance) = &result.guidance_injected {
        println!("{guidance}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = r#"
# compliant job
{"jobId":"j1","phase":"ASSESS","response":"","toolCalls":[{"name":"read_file","arguments":{"path":"src/lib.rs"}}],"inputTokens":100,"outputTokens":20}
{"jobId":"j1","phase":"PLAN","response":"","toolCalls":[{"name":"todo_write"}]}

{"jobId":"j2","phase":"ASSESS","userMessage":"fix it","response":"Looking around.","toolCalls":[{"name":"grep"}]}
"#;

    #[test]
    fn test_parse_transcript_skips_blanks_and_comments() {
        let records = parse_transcript(TRANSCRIPT).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].job_id, "j1");
        assert_eq!(records[0].turn.tool_calls[0].arguments["path"], "src/lib.rs");
        assert_eq!(records[0].turn.input_tokens, 100);
        assert_eq!(records[1].phase, Phase::Plan);
        assert_eq!(records[1].turn.output_tokens, 0);
        assert_eq!(records[2].user_message, "fix it");
    }

    #[test]
    fn test_parse_transcript_reports_line_number() {
        let err = parse_transcript("{\"jobId\":\"a\",\"phase\":\"PLAN\",\"response\":\"\"}\n{oops")
            .unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[tokio::test]
    async fn test_replay_runs_every_record() {
        let records = parse_transcript(TRANSCRIPT).unwrap();
        let orchestrator = EnforcementOrchestrator::new(&Config::default(), None);
        let results = replay(&orchestrator, &records).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[1].passed, "{:?}", results[1].violations);
        assert_eq!(orchestrator.job_count(), 2);
        let kpis = orchestrator.job_kpis("j1").await.unwrap();
        assert!(kpis.task_list_created);
    }
}
