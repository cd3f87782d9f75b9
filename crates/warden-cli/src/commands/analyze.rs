use std::io::Read;
use std::path::Path;

use serde::Serialize;
use warden_core::Phase;
use warden_enforcement::{GateResult, PhaseComplianceGate, QualityAnalysis, ResponseQualityAnalyzer};

use super::parse_tool_spec;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeReport {
    phase: Phase,
    quality: QualityAnalysis,
    gate: GateResult,
}

/// Run the `analyze` subcommand: score one response offline.
pub async fn run(phase: Phase, file: Option<&Path>, tools: &[String], json: bool) -> anyhow::Result<()> {
    let response = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let tool_calls = tools
        .iter()
        .map(|spec| parse_tool_spec(spec))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let quality = ResponseQualityAnalyzer::new().analyze_quality(&response, &tool_calls, Some(phase));
    let gate = PhaseComplianceGate::new().validate_response(&response, phase, &tool_calls);
    tracing::debug!(%phase, tools = tool_calls.len(), score = quality.quality_score, "analyzed turn");

    let report = AnalyzeReport { phase, quality, gate };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

fn render(report: &AnalyzeReport) -> String {
    let q = &report.quality;
    let mut out = String::new();
    out.push_str(&format!("Phase:          {}\n", report.phase));
    out.push_str(&format!(
        "Quality score:  {}/100{}\n",
        q.quality_score,
        if q.is_poor_quality { "  (poor)" } else { "" }
    ));
    out.push_str(&format!("Action ratio:   {:.2} tools per 100 words\n", q.action_ratio));
    out.push_str(&format!(
        "Retry/escalate: {}/{}\n",
        yes_no(q.should_retry),
        yes_no(q.should_escalate)
    ));
    for issue in &q.issues {
        out.push_str(&format!("  - {issue}\n"));
    }

    let g = &report.gate;
    out.push_str(&format!(
        "Phase gate:     {} (score {})\n",
        if g.passed { "PASS" } else { "FAIL" },
        g.quality_score
    ));
    for violation in &g.violations {
        out.push_str(&format!("  - {violation}\n"));
    }
    out
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ToolCall;

    #[test]
    fn test_render_flags_failing_gate() {
        let tools = [ToolCall::named("read_file")];
        let response = "I will now write the plan.";
        let report = AnalyzeReport {
            phase: Phase::Plan,
            quality: ResponseQualityAnalyzer::new().analyze_quality(response, &tools, Some(Phase::Plan)),
            gate: PhaseComplianceGate::new().validate_response(response, Phase::Plan, &tools),
        };
        let text = render(&report);
        assert!(text.contains("Phase:          PLAN"));
        assert!(text.contains("Phase gate:     FAIL (score 40)"));
    }
}
