use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.workflow-warden/config.toml`.
///
/// **Security**: This struct NEVER stores API keys or tokens. The advisory
/// model's key is read from the environment variable named by
/// [`AdvisorConfig::api_key_env`] via [`CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub reflection: ReflectionConfig,
    #[serde(default)]
    pub guidance: GuidanceConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub enforcement: EnforcementConfig,
}

impl Config {
    /// Load config from `~/.workflow-warden/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(cfg)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.limits.validate()?;
        if self.reflection.interval == 0 {
            return Err(ConfigError::Validation(
                "reflection.interval must be greater than zero".into(),
            ));
        }
        self.guidance.validate()?;
        self.advisor.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".workflow-warden")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `human` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.log_format.as_str() {
            "human" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "general.log_format must be 'human' or 'json', got '{}'",
                other
            ))),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

/// Resource ceilings enforced by the workflow state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_tokens_per_job")]
    pub max_tokens_per_job: u64,
    #[serde(default = "default_max_tokens_per_phase")]
    pub max_tokens_per_phase: u64,
    /// Tool-call ceiling for a single phase iteration.
    #[serde(default = "default_max_tool_calls_per_phase")]
    pub max_tool_calls_per_phase: u32,
    #[serde(default = "default_max_tool_calls_per_job")]
    pub max_tool_calls_per_job: u32,
    /// How many times a job may re-enter EXECUTE from TEST or VERIFY.
    #[serde(default = "default_max_phase_retries")]
    pub max_phase_retries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_job: default_max_tokens_per_job(),
            max_tokens_per_phase: default_max_tokens_per_phase(),
            max_tool_calls_per_phase: default_max_tool_calls_per_phase(),
            max_tool_calls_per_job: default_max_tool_calls_per_job(),
            max_phase_retries: default_max_phase_retries(),
        }
    }
}

impl LimitsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens_per_job == 0
            || self.max_tokens_per_phase == 0
            || self.max_tool_calls_per_phase == 0
            || self.max_tool_calls_per_job == 0
        {
            return Err(ConfigError::Validation(
                "limits must all be greater than zero".into(),
            ));
        }
        if self.max_tokens_per_phase > self.max_tokens_per_job {
            return Err(ConfigError::Validation(format!(
                "limits.max_tokens_per_phase ({}) exceeds limits.max_tokens_per_job ({})",
                self.max_tokens_per_phase, self.max_tokens_per_job
            )));
        }
        Ok(())
    }
}

fn default_max_tokens_per_job() -> u64 {
    200_000
}
fn default_max_tokens_per_phase() -> u64 {
    80_000
}
fn default_max_tool_calls_per_phase() -> u32 {
    50
}
fn default_max_tool_calls_per_job() -> u32 {
    150
}
fn default_max_phase_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// A self-check prompt is due every `interval` tool calls.
    #[serde(default = "default_reflection_interval")]
    pub interval: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            interval: default_reflection_interval(),
        }
    }
}

fn default_reflection_interval() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceConfig {
    /// Guidance injections per job before the job is escalated.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: usize,
    #[serde(default = "default_guidance_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on the advisory reply length requested in the prompt.
    #[serde(default = "default_max_reply_words")]
    pub max_reply_words: u32,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
            timeout_secs: default_guidance_timeout(),
            max_reply_words: default_max_reply_words(),
        }
    }
}

impl GuidanceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.escalation_threshold == 0 {
            return Err(ConfigError::Validation(
                "guidance.escalation_threshold must be greater than zero".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "guidance.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_escalation_threshold() -> usize {
    3
}
fn default_guidance_timeout() -> u64 {
    30
}
fn default_max_reply_words() -> u32 {
    100
}

/// Connection settings for the advisory model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// `anthropic` or `none`.
    #[serde(default = "default_advisor_provider")]
    pub provider: String,
    #[serde(default = "default_advisor_model")]
    pub model: String,
    #[serde(default = "default_advisor_base_url")]
    pub base_url: String,
    /// Name of the env var holding the API key.
    #[serde(default = "default_advisor_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_advisor_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_advisor_temperature")]
    pub temperature: f32,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            provider: default_advisor_provider(),
            model: default_advisor_model(),
            base_url: default_advisor_base_url(),
            api_key_env: default_advisor_key_env(),
            max_tokens: default_advisor_max_tokens(),
            temperature: default_advisor_temperature(),
        }
    }
}

impl AdvisorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.provider.as_str() {
            "anthropic" | "none" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "advisor.provider must be 'anthropic' or 'none', got '{}'",
                    other
                )))
            }
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Validation(format!(
                "advisor.temperature must be within 0.0..=1.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

fn default_advisor_provider() -> String {
    "anthropic".into()
}
fn default_advisor_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_advisor_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_advisor_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_advisor_max_tokens() -> u32 {
    300
}
fn default_advisor_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnforcementConfig {
    /// Flag file-modifying tool calls whose target path was never approved.
    #[serde(default)]
    pub enforce_write_approvals: bool,
    /// Root that relative write paths are resolved against.
    #[serde(default)]
    pub workspace_root: Option<String>,
}

// ---------------------------------------------------------------------------
// Credential provider: reads secrets from the environment at runtime
// ---------------------------------------------------------------------------

/// Reads credentials from environment variables at runtime.
///
/// Config stores env var *names*; this provider resolves them to values on
/// demand.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read a credential from a named env var. Empty values count as unset.
    pub fn from_env(var_name: &str) -> Option<String> {
        std::env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
