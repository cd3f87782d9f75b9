use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use warden_core::config::{AdvisorConfig, CredentialProvider};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when consulting the advisory model.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// An HTTP-level error (connection failure, DNS, TLS, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API returned a non-success status with a message.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse the API response body.
    #[error("parse error: {0}")]
    Parse(String),

    /// The API indicated rate limiting (HTTP 429).
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The advisor returned no usable text.
    #[error("empty reply from advisor")]
    EmptyReply,
}

impl From<reqwest::Error> for AdvisorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdvisorError::Timeout
        } else {
            AdvisorError::Http(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// AdvisoryModel trait
// ---------------------------------------------------------------------------

/// A secondary model that returns free-text corrective guidance.
#[async_trait]
pub trait AdvisoryModel: Send + Sync {
    /// Send one system/user prompt pair and return the reply text.
    async fn advise(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AdvisorError>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

/// Build the advisory client described by `config`.
///
/// Returns `None` when the provider is `none` or its credential env var is
/// unset. The engine treats a missing advisor as "no guidance", not an error.
pub fn advisor_from_config(config: &AdvisorConfig) -> Option<Arc<dyn AdvisoryModel>> {
    if config.provider != "anthropic" {
        tracing::info!(provider = %config.provider, "advisory model disabled");
        return None;
    }
    let Some(key) = CredentialProvider::from_env(&config.api_key_env) else {
        tracing::info!(
            env = %config.api_key_env,
            "advisory model credential not set; guidance disabled"
        );
        return None;
    };
    let advisor = AnthropicAdvisor::new(key, config.model.clone())
        .with_base_url(config.base_url.clone())
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature);
    Some(Arc::new(advisor))
}

// ---------------------------------------------------------------------------
// AnthropicAdvisor
// ---------------------------------------------------------------------------

/// Advisory model backed by the Anthropic Messages API.
pub struct AnthropicAdvisor {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicAdvisor {
    /// `api_key` is sent as the `x-api-key` header.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            model: model.into(),
            max_tokens: 300,
            temperature: 0.2,
        }
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Build the JSON request body for the Messages API. The system prompt
    /// goes in the top-level `system` field, not in `messages`.
    pub fn build_request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system_prompt,
            "messages": [
                { "role": "user", "content": user_prompt }
            ],
        })
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    text: Option<String>,
}

#[async_trait]
impl AdvisoryModel for AnthropicAdvisor {
    async fn advise(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AdvisorError> {
        let body = self.build_request_body(system_prompt, user_prompt);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();

        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(AdvisorError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AdvisorError::Api {
                status,
                message: text,
            });
        }

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| AdvisorError::Parse(e.to_string()))?;

        let text = api_resp
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(AdvisorError::EmptyReply);
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ---------------------------------------------------------------------------
// MockAdvisor
// ---------------------------------------------------------------------------

/// Scriptable advisor for tests. Replies are served in FIFO order; once the
/// queue is empty every call returns a fixed default reply.
#[derive(Clone)]
pub struct MockAdvisor {
    replies: Arc<Mutex<VecDeque<Result<String, AdvisorError>>>>,
    captured: Arc<Mutex<Vec<(String, String)>>>,
    delay: Option<Duration>,
}

impl MockAdvisor {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            captured: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Queue a successful reply.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
        self
    }

    /// Queue an error reply.
    pub fn with_error(self, error: AdvisorError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    /// Sleep before answering, to exercise caller timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// (system, user) prompt pairs received so far.
    pub fn captured_prompts(&self) -> Vec<(String, String)> {
        self.captured.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }

    fn default_reply() -> String {
        "Stop narrating and call the required tool now.\n\
         - Invoke the tool for the current phase immediately\n\
         - Keep prose under five words before tool calls"
            .to_string()
    }
}

impl Default for MockAdvisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdvisoryModel for MockAdvisor {
    async fn advise(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AdvisorError> {
        self.captured
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Self::default_reply()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_puts_system_prompt_at_top_level() {
        let advisor = AnthropicAdvisor::new("key", "claude-test").with_max_tokens(123);
        let body = advisor.build_request_body("be terse", "agent rambled");

        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 123);
        assert_eq!(body["system"], "be terse");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "agent rambled");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let advisor = AnthropicAdvisor::new("key", "m").with_base_url("http://localhost:9000/");
        assert_eq!(advisor.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_disabled_provider_yields_no_advisor() {
        let config = AdvisorConfig {
            provider: "none".into(),
            ..AdvisorConfig::default()
        };
        assert!(advisor_from_config(&config).is_none());
    }

    #[test]
    fn test_missing_credential_yields_no_advisor() {
        let config = AdvisorConfig {
            api_key_env: "WARDEN_ADVISOR_TEST_UNSET_KEY".into(),
            ..AdvisorConfig::default()
        };
        assert!(advisor_from_config(&config).is_none());
    }

    #[tokio::test]
    async fn test_mock_serves_queue_then_default() {
        let mock = MockAdvisor::new()
            .with_reply("first")
            .with_error(AdvisorError::Timeout);

        assert_eq!(mock.advise("s", "u1").await.unwrap(), "first");
        assert!(matches!(mock.advise("s", "u2").await, Err(AdvisorError::Timeout)));
        assert!(mock.advise("s", "u3").await.unwrap().contains("tool"));

        let prompts = mock.captured_prompts();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[1].1, "u2");
    }
}
