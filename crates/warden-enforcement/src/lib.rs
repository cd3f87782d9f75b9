//! Workflow compliance enforcement for autonomous coding agents.
//!
//! [`EnforcementOrchestrator::validate_response`] inspects each agent turn
//! and returns an [`EnforcementResult`]: whether the turn complied with the
//! fixed ASSESS → COMMIT workflow, what was violated, whether corrective
//! guidance was injected, and whether the caller should retry or escalate.

pub mod approval;
pub mod compliance_metrics;
pub mod guidance;
pub mod orchestrator;
pub mod phase_gate;
pub mod quality;
pub mod reflection;
pub mod state_machine;
pub mod tools;

pub use approval::{ApprovalError, WriteApproval, WriteApprovalStore};
pub use compliance_metrics::{
    AggregateKpis, ComplianceMetricsTracker, JobKpis, MetricsError, ParityCheck,
};
pub use guidance::{GuidanceContext, GuidanceEscalationService, GuidanceRequest, GuidanceResponse};
pub use orchestrator::{
    AgentTurn, EnforcementError, EnforcementOrchestrator, EnforcementResult, TurnContext,
};
pub use phase_gate::{GateResult, PhaseComplianceGate, PhaseRule, Requirement};
pub use quality::{QualityAnalysis, ResponseQualityAnalyzer};
pub use reflection::{ReflectionCheck, ReflectionScheduler, ReflectionStats, ReflectionValidation};
pub use state_machine::{
    StateMachineError, TransitionCheck, WorkflowLimits, WorkflowSnapshot, WorkflowStateMachine,
};
