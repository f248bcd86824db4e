// remedy-types-rs/src/lib.rs
// Shared data model for the Aegis remediation pipeline.
//
// Every other crate in the workspace depends on this one. It carries the
// input/output records (DetectedError, FixPattern, reports, audit events),
// the closed match-expression grammar, the pipeline error taxonomy, and
// the environment-driven configuration struct.

pub mod confdoc;
pub mod config;
pub mod error;
pub mod model;
pub mod rules;

pub use config::RemediatorConfig;
pub use error::FailureReason;
pub use model::{
    ActionStatus, AppliedFix, AuditEvent, DeployReport, DetectedError, Disposition,
    ErrorCategory, ErrorSeverity, FixAction, FixPattern, PriorState, RemediationState,
    RiskLevel, TargetRef, ValidationReport,
};
pub use rules::{Field, MatchExpr};
