use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` overrides the configured `general.log_level`.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Human-readable logs on stderr, for interactive `warden` runs.
///
/// Enforcement decisions (`enforce_turn` spans, ceiling breaches, guidance
/// fallbacks) go to stderr so `warden analyze --json` and `warden replay
/// --json` keep stdout parseable. A second call is a no-op.
pub fn init_logging(service_name: &str, default_level: &str) {
    fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .ok();

    tracing::debug!(service = service_name, format = "human", "warden logging ready");
}

/// One JSON object per event, with the current span's fields (`job_id`, `phase`,
/// `turn_id`) attached, for shipping enforcement logs to a collector.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    fmt()
        .json()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .ok();

    tracing::debug!(service = service_name, format = "json", "warden logging ready");
}

/// Dispatch on `general.log_format`. Anything but `json` gets human output;
/// config validation has already rejected unknown formats.
pub fn init_from_format(service_name: &str, format: &str, default_level: &str) {
    match format {
        "json" => init_logging_json(service_name, default_level),
        _ => init_logging(service_name, default_level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_from_format("warden-test", "json", "debug");
        init_from_format("warden-test", "human", "info");
        tracing::info!(job_id = "job-1", "still logging");
    }
}
