//! Deterministic scoring of a single agent turn.
//!
//! The analyzer starts every turn at 100 and subtracts penalties from a fixed
//! table of anti-pattern rules plus a few structural checks. It performs no
//! I/O and reads no clock, so identical inputs always score identically.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use warden_core::{Phase, ToolCall};

use crate::tools::prose_word_count;

/// Scores below this are poor quality.
pub const POOR_QUALITY_THRESHOLD: u32 = 60;
/// Scores below this should be retried.
pub const RETRY_THRESHOLD: u32 = 50;
/// Scores below this should be escalated.
pub const ESCALATE_THRESHOLD: u32 = 40;

/// Words of prose tolerated before the first tool call in EXECUTE.
pub const EXECUTE_PROSE_ALLOWANCE: usize = 5;
pub const MAX_PROSE_PENALTY: u32 = 30;
pub const MISSING_TOOL_PENALTY: u32 = 40;
/// Minimum tool calls per 100 words of response text.
pub const MIN_ACTION_RATIO: f64 = 1.0;
pub const LOW_ACTION_RATIO_PENALTY: u32 = 15;

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    Disclaimer,
    MetaCommentary,
    Apology,
    Hedging,
}

/// One anti-pattern: it fires when `pattern` matches at least `min_matches`
/// times in the response text.
#[derive(Debug, Clone, Copy)]
pub struct AntiPatternRule {
    pub name: &'static str,
    pub category: PatternCategory,
    pub pattern: &'static str,
    pub penalty: u32,
    pub min_matches: usize,
    pub issue: &'static str,
}

pub const ANTI_PATTERN_RULES: &[AntiPatternRule] = &[
    AntiPatternRule {
        name: "identity_disclaimer",
        category: PatternCategory::Disclaimer,
        pattern: r"(?i)\bas an? (ai|agent|language model|assistant)\b[^.]{0,40}\b(cannot|can't|am unable|am not able|don't|do not)\b",
        penalty: 40,
        min_matches: 1,
        issue: "Generic disclaimer about being an AI instead of acting",
    },
    AntiPatternRule {
        name: "capability_disclaimer",
        category: PatternCategory::Disclaimer,
        pattern: r"(?i)\bi (cannot|can't|am unable to|am not able to) (directly |actually )?(access|execute|run|modify|browse|edit)\b",
        penalty: 30,
        min_matches: 1,
        issue: "Claims an inability the available tools cover",
    },
    AntiPatternRule {
        name: "access_disclaimer",
        category: PatternCategory::Disclaimer,
        pattern: r"(?i)\bi (don't|do not) have (the ability|access|permission)\b",
        penalty: 30,
        min_matches: 1,
        issue: "Claims missing access instead of using tools",
    },
    AntiPatternRule {
        name: "excessive_meta_commentary",
        category: PatternCategory::MetaCommentary,
        pattern: r"(?i)\b(i will now|i'll now|let me|i'm going to|i am going to|next, i will)\b",
        penalty: 15,
        min_matches: 3,
        issue: "Repeated narration of upcoming actions",
    },
    AntiPatternRule {
        name: "apologetic_language",
        category: PatternCategory::Apology,
        pattern: r"(?i)\b(i apologi[sz]e|sorry|my apologies)\b",
        penalty: 10,
        min_matches: 1,
        issue: "Apologetic language",
    },
    AntiPatternRule {
        name: "hedging_language",
        category: PatternCategory::Hedging,
        pattern: r"(?i)\b(it seems|perhaps|possibly|might be|i think|i believe)\b",
        penalty: 8,
        min_matches: 1,
        issue: "Hedging language",
    },
];

static COMPILED_RULES: LazyLock<Vec<(AntiPatternRule, Regex)>> = LazyLock::new(|| {
    ANTI_PATTERN_RULES
        .iter()
        .map(|rule| {
            let re = Regex::new(rule.pattern).expect("anti-pattern table holds valid regexes");
            (*rule, re)
        })
        .collect()
});

// ---------------------------------------------------------------------------
// QualityAnalysis
// ---------------------------------------------------------------------------

/// Outcome of scoring one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAnalysis {
    pub quality_score: u32,
    pub is_poor_quality: bool,
    pub should_retry: bool,
    pub should_escalate: bool,
    pub detected_patterns: Vec<String>,
    pub issues: Vec<String>,
    /// Tool calls per 100 words of response text.
    pub action_ratio: f64,
    pub pre_tool_word_count: usize,
}

impl QualityAnalysis {
    fn from_score(score: u32) -> Self {
        Self {
            quality_score: score,
            is_poor_quality: score < POOR_QUALITY_THRESHOLD,
            should_retry: score < RETRY_THRESHOLD,
            should_escalate: score < ESCALATE_THRESHOLD,
            detected_patterns: Vec::new(),
            issues: Vec::new(),
            action_ratio: 0.0,
            pre_tool_word_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseQualityAnalyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseQualityAnalyzer;

impl ResponseQualityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Score one turn. `phase` enables the phase-specific checks.
    pub fn analyze_quality(
        &self,
        response: &str,
        tool_calls: &[ToolCall],
        phase: Option<Phase>,
    ) -> QualityAnalysis {
        let mut penalty: u32 = 0;
        let mut patterns = Vec::new();
        let mut issues = Vec::new();

        for (rule, re) in COMPILED_RULES.iter() {
            let hits = re.find_iter(response).count();
            if hits >= rule.min_matches && hits > 0 {
                penalty += rule.penalty;
                patterns.push(rule.name.to_string());
                issues.push(if hits > 1 {
                    format!("{} ({} occurrences)", rule.issue, hits)
                } else {
                    rule.issue.to_string()
                });
            }
        }

        let pre_tool_words = prose_word_count(response);
        if phase == Some(Phase::Execute)
            && !tool_calls.is_empty()
            && pre_tool_words > EXECUTE_PROSE_ALLOWANCE
        {
            let excess = (pre_tool_words - EXECUTE_PROSE_ALLOWANCE) as u32;
            penalty += (excess * 2).min(MAX_PROSE_PENALTY);
            patterns.push("excessive_pre_execution_prose".to_string());
            issues.push(format!(
                "{} words of explanation before the first tool call (allowed {})",
                pre_tool_words, EXECUTE_PROSE_ALLOWANCE
            ));
        }

        if let Some(p) = phase {
            if p.requires_tool_call() && tool_calls.is_empty() {
                penalty += MISSING_TOOL_PENALTY;
                patterns.push("missing_tool_call".to_string());
                issues.push(format!("No tool call in {} phase", p));
            }
        }

        let total_words = response.split_whitespace().count();
        let action_ratio = tool_calls.len() as f64 * 100.0 / total_words.max(1) as f64;
        if !tool_calls.is_empty() && action_ratio < MIN_ACTION_RATIO {
            penalty += LOW_ACTION_RATIO_PENALTY;
            patterns.push("low_action_ratio".to_string());
            issues.push(format!(
                "Explanation outweighs action: {} tool call(s) for {} words",
                tool_calls.len(),
                total_words
            ));
        }

        let score = 100u32.saturating_sub(penalty);
        let mut analysis = QualityAnalysis::from_score(score);
        analysis.detected_patterns = patterns;
        analysis.issues = issues;
        analysis.action_ratio = action_ratio;
        analysis.pre_tool_word_count = pre_tool_words;
        analysis
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
