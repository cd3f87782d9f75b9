//! Advisory-model collaborator for workflow-warden.
//!
//! The enforcement engine consults a secondary model for corrective guidance
//! when an agent keeps violating the workflow. This crate defines the
//! [`AdvisoryModel`] seam the engine depends on, a concrete client for the
//! Anthropic Messages API, and a scriptable [`MockAdvisor`] for tests.

pub mod advisor;

pub use advisor::{
    advisor_from_config, AdvisorError, AdvisoryModel, AnthropicAdvisor, MockAdvisor,
};
