//! Shared domain types and configuration for workflow-warden.
//!
//! Everything the enforcement engine, the advisory client and the CLI agree
//! on lives here: the workflow [`types::Phase`] ordering, tool calls as the
//! engine sees them, recorded violations, and the TOML configuration layer.

pub mod config;
pub mod types;

pub use types::{Phase, Severity, ToolCall, Violation, ViolationKind};
