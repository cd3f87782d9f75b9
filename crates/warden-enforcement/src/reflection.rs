use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::Phase;

/// Longest acceptable reflection answer, in words.
pub const MAX_REFLECTION_WORDS: usize = 20;
/// Fields a reflection answer must fill in.
pub const REQUIRED_FIELDS: &[&str] = &["phase:", "compliance:", "next action:"];
/// Phrases that mark a rambling answer.
pub const RAMBLING_MARKERS: &[&str] = &["let me", "however", "i will"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionCheck {
    pub trigger_count: u32,
    pub prompt_text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionValidation {
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionStats {
    pub count: usize,
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Periodic self-check prompts for one job.
#[derive(Debug, Clone)]
pub struct ReflectionScheduler {
    interval: u32,
    tool_calls: u32,
    history: Vec<ReflectionCheck>,
}

impl ReflectionScheduler {
    /// `interval` of 0 is treated as 1.
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            tool_calls: 0,
            history: Vec::new(),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_calls
    }

    /// Count one tool call; true when a reflection is due.
    pub fn record_tool_call(&mut self) -> bool {
        self.tool_calls += 1;
        self.tool_calls % self.interval == 0
    }

    pub fn generate_reflection_prompt(&mut self, phase: Phase) -> String {
        let prompt = format!(
            "🔍 REFLECTION CHECK ({} tool calls)\n\
             Current phase: {}\n\
             Confirm compliance in 10 words or fewer, then continue:\n\
             Phase: <phase> | Compliance: <yes/no> | Next action: <action>",
            self.tool_calls, phase
        );
        self.history.push(ReflectionCheck {
            trigger_count: self.tool_calls,
            prompt_text: prompt.clone(),
            timestamp: Utc::now(),
        });
        tracing::debug!(phase = %phase, tool_calls = self.tool_calls, "reflection prompt issued");
        prompt
    }

    /// Advisory check of an agent's reflection answer.
    pub fn validate_reflection_response(response: &str) -> ReflectionValidation {
        let mut issues = Vec::new();
        let lower = response.to_lowercase();

        let words = response.split_whitespace().count();
        if words > MAX_REFLECTION_WORDS {
            issues.push(format!(
                "Reflection too long: {} words (max {})",
                words, MAX_REFLECTION_WORDS
            ));
        }
        for field in REQUIRED_FIELDS {
            if !lower.contains(field) {
                issues.push(format!("Missing field '{}'", field));
            }
        }
        for marker in RAMBLING_MARKERS {
            if lower.contains(marker) {
                issues.push(format!("Rambling marker '{}'", marker));
            }
        }

        ReflectionValidation {
            valid: issues.is_empty(),
            issues,
        }
    }

    pub fn history(&self) -> &[ReflectionCheck] {
        &self.history
    }

    pub fn stats(&self) -> ReflectionStats {
        ReflectionStats {
            count: self.history.len(),
            last_triggered: self.history.last().map(|c| c.timestamp),
        }
    }

    pub fn reset(&mut self) {
        self.tool_calls = 0;
        self.history.clear();
    }
}

impl Default for ReflectionScheduler {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_on_multiples_of_interval() {
        let mut s = ReflectionScheduler::new(3);
        let due: Vec<bool> = (0..7).map(|_| s.record_tool_call()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_prompt_is_recorded_in_history() {
        let mut s = ReflectionScheduler::default();
        for _ in 0..5 {
            s.record_tool_call();
        }
        let prompt = s.generate_reflection_prompt(Phase::Execute);
        assert!(prompt.contains("EXECUTE"));
        let stats = s.stats();
        assert_eq!(stats.count, 1);
        assert!(stats.last_triggered.is_some());
        assert_eq!(s.history()[0].trigger_count, 5);

        s.reset();
        assert_eq!(s.stats().count, 0);
        assert_eq!(s.tool_call_count(), 0);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut s = ReflectionScheduler::new(0);
        assert!(s.record_tool_call());
    }
}
