//! Observability for workflow-warden.
//!
//! - **Logging**: human-readable and JSON output via `tracing-subscriber`
//! - **Metrics**: labelled counters, gauges and histograms with Prometheus
//!   text export, owned by whoever drives enforcement
//! - **Turn ids**: 32-hex-char correlation ids for per-turn tracing spans

pub mod logging;
pub mod metrics;

/// Generate a turn correlation id (32 hex characters).
pub fn generate_turn_id() -> String {
    uuid::Uuid::new_v4().as_simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_id_format() {
        let id = generate_turn_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_turn_id());
    }
}
