// remedy-types-rs/src/error.rs
// Pipeline-wide failure taxonomy.

use serde::{Deserialize, Serialize};

/// Why an attempt (or one of its candidates) failed.
///
/// Serializable and stable across journal replays; recorded in attempt
/// snapshots, audit details, and terminal results. Every reason except
/// `RestoreFailed` is recovered locally by the orchestrator: it drives a
/// rollback and surfaces only as a terminal result plus an audit event.
/// `RestoreFailed` is the one loud condition, since automated recovery is
/// no longer trustworthy once a restore has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoMatch,
    TargetUnreadable,
    BackupFailed,
    ActionFailed,
    ValidationFailed,
    ApprovalDenied,
    ApprovalTimeout,
    DeployFailed,
    RestoreFailed,
    /// Operator cancellation, honored at a state boundary.
    Aborted,
    Internal,
}
