// remedy-types-rs/src/model.rs
// Core records flowing through the remediation pipeline.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::MatchExpr;

/// Category of a detected error, as classified by the upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Security,
    Runtime,
    Syntax,
    Test,
    Dependency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Runtime => write!(f, "runtime"),
            ErrorCategory::Syntax => write!(f, "syntax"),
            ErrorCategory::Test => write!(f, "test"),
            ErrorCategory::Dependency => write!(f, "dependency"),
        }
    }
}

/// Severity of a detected error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "critical"),
            ErrorSeverity::High => write!(f, "high"),
            ErrorSeverity::Medium => write!(f, "medium"),
            ErrorSeverity::Low => write!(f, "low"),
        }
    }
}

/// Risk classification of a fix pattern, driving the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Immutable input event: one detected error produced by an external
/// collaborator (log tailer, test-result parser, cloud poller, ...).
///
/// The pipeline never mutates this value; it only consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    pub id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// Path of the artifact the error originated from.
    pub artifact: PathBuf,
    pub message: String,
    pub trace: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Reference to a single mutation target: either a whole file or one
/// dotted-path key inside a structured config document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetRef {
    File { path: PathBuf },
    ConfigKey { path: PathBuf, key: String },
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::File { path } => write!(f, "file:{}", path.display()),
            TargetRef::ConfigKey { path, key } => {
                write!(f, "config:{}#{}", path.display(), key)
            }
        }
    }
}

/// One atomic corrective operation inside a fix pattern.
///
/// This is a closed set: every new action kind must be added here and is
/// then exhaustively handled by the applier at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixAction {
    ReplaceInFile {
        target: PathBuf,
        find: String,
        replace: String,
        /// Treat `find` as a regular expression instead of a literal.
        #[serde(default)]
        is_regex: bool,
    },
    InsertInFile {
        target: PathBuf,
        content: String,
    },
    DeleteFile {
        target: PathBuf,
    },
    RunCommand {
        command: String,
        /// Override for the configured command timeout, in seconds.
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    UpdateConfigKey {
        target: PathBuf,
        /// Dotted-path key, e.g. `server.tls.enabled`. Missing intermediate
        /// levels are created on update.
        key: String,
        value: serde_json::Value,
    },
}

impl FixAction {
    /// Short kind label used in logs and action outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            FixAction::ReplaceInFile { .. } => "replace_in_file",
            FixAction::InsertInFile { .. } => "insert_in_file",
            FixAction::DeleteFile { .. } => "delete_file",
            FixAction::RunCommand { .. } => "run_command",
            FixAction::UpdateConfigKey { .. } => "update_config_key",
        }
    }

    /// The declared mutation target of this action, if it has one.
    ///
    /// `run_command` declares no target; whatever a command touches is
    /// outside the backup contract and must be covered by the pattern's
    /// `reversible` declaration instead.
    pub fn target(&self) -> Option<TargetRef> {
        match self {
            FixAction::ReplaceInFile { target, .. }
            | FixAction::InsertInFile { target, .. }
            | FixAction::DeleteFile { target } => Some(TargetRef::File {
                path: target.clone(),
            }),
            FixAction::RunCommand { .. } => None,
            FixAction::UpdateConfigKey { target, key, .. } => Some(TargetRef::ConfigKey {
                path: target.clone(),
                key: key.clone(),
            }),
        }
    }
}

/// Catalog entry mapping an error signature to corrective actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPattern {
    pub id: String,
    pub name: String,
    pub categories: Vec<ErrorCategory>,
    pub severities: Vec<ErrorSeverity>,
    /// Closed-grammar match expressions evaluated against the error's
    /// message and trace text.
    pub match_rules: Vec<MatchExpr>,
    pub actions: Vec<FixAction>,
    /// Static confidence in [0, 1]; part of the matcher's ranking key.
    pub confidence: f64,
    pub validation_required: bool,
    pub risk: RiskLevel,
    pub reversible: bool,
}

impl FixPattern {
    /// Declared mutation targets across all actions, deduplicated in
    /// first-occurrence order. The orchestrator backs up every one of
    /// these before the first action runs.
    pub fn mutation_targets(&self) -> Vec<TargetRef> {
        let mut out: Vec<TargetRef> = Vec::new();
        for action in &self.actions {
            if let Some(target) = action.target() {
                if !out.contains(&target) {
                    out.push(target);
                }
            }
        }
        out
    }
}

/// Recorded prior state of a mutation target.
///
/// `Absent` means the target did not exist before mutation; restoring it
/// deletes the target rather than writing empty content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PriorState {
    FileContent { content: String },
    ConfigValue { value: serde_json::Value },
    Absent,
}

/// Outcome status of one applied action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The action mutated its target (or ran its command successfully).
    Applied,
    /// The action ran but changed nothing (content already fixed, file
    /// already absent). Never reported as a mutation.
    NoOp,
    /// Dry run: the action was planned but not executed.
    Planned,
}

/// Result of applying one fix pattern to one detected error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFix {
    pub pattern_id: String,
    pub error_id: String,
    pub dry_run: bool,
    pub outcomes: Vec<ActionOutcome>,
    pub applied_at: DateTime<Utc>,
}

impl AppliedFix {
    /// True when at least one action actually mutated something.
    pub fn mutated(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.status == ActionStatus::Applied && o.target.is_some())
    }
}

/// Per-action record inside an [`AppliedFix`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub kind: String,
    pub target: Option<TargetRef>,
    pub status: ActionStatus,
    pub detail: String,
}

/// States of one remediation attempt's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemediationState {
    Detected,
    Matching,
    Backup,
    Applying,
    Validating,
    AwaitingApproval,
    Deploying,
    RollingBack,
    Succeeded,
    Failed,
}

impl RemediationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemediationState::Succeeded | RemediationState::Failed)
    }
}

impl fmt::Display for RemediationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemediationState::Detected => "Detected",
            RemediationState::Matching => "Matching",
            RemediationState::Backup => "Backup",
            RemediationState::Applying => "Applying",
            RemediationState::Validating => "Validating",
            RemediationState::AwaitingApproval => "AwaitingApproval",
            RemediationState::Deploying => "Deploying",
            RemediationState::RollingBack => "RollingBack",
            RemediationState::Succeeded => "Succeeded",
            RemediationState::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Final disposition of a remediation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Succeeded,
    /// Terminal failure with no mutation ever having occurred.
    Failed,
    /// At least one backup was consumed to restore state.
    RolledBack,
    /// A restore itself failed; automated recovery is no longer
    /// trustworthy and an operator must inspect the targets.
    ManualInterventionRequired,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Succeeded => write!(f, "succeeded"),
            Disposition::Failed => write!(f, "failed"),
            Disposition::RolledBack => write!(f, "rolled-back"),
            Disposition::ManualInterventionRequired => {
                write!(f, "manual-intervention-required")
            }
        }
    }
}

/// Normalized validation result (see the Validation Gate).
///
/// A tool that could not run at all normalizes to `passed: false` with
/// `total: 0`, which the orchestrator treats as a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub total: u32,
    pub passed_count: u32,
    pub failed_count: u32,
    pub details: String,
}

impl ValidationReport {
    pub fn tool_unavailable(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            total: 0,
            passed_count: 0,
            failed_count: 0,
            details: details.into(),
        }
    }
}

/// Uniform result reported by every deployment strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub strategy: String,
    pub stages_completed: u32,
    pub healthy: bool,
    pub rolled_back: bool,
}

/// One entry in the append-only audit stream: a single state transition
/// of a single attempt. This stream is the sole source of truth for
/// "what happened".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub attempt_id: String,
    pub from_state: RemediationState,
    pub to_state: RemediationState,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}
