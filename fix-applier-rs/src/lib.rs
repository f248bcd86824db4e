// fix-applier-rs/src/lib.rs
// Executes a fix pattern's declared actions against the filesystem and
// process environment.
//
// The applier runs actions strictly in declared order and stops at the
// first failure. It never rolls back partial work itself; failure
// recovery belongs to the orchestrator via the backup store, at target
// granularity. Dry-run mode produces the same action list and target set
// as a real run but performs no I/O.

mod command;
mod insert;

#[cfg(test)]
mod tests;

pub use command::{run_shell, CommandOutput};
pub use insert::InsertionPolicy;

use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::fs;

use remedy_types::{
    confdoc, ActionStatus, AppliedFix, DetectedError, FixAction, FixPattern, TargetRef,
};
use remedy_types::model::ActionOutcome;

/// Errors raised while applying a fix.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("action {index} ({kind}) failed: {detail}")]
    ActionFailed {
        index: usize,
        kind: &'static str,
        detail: String,
        /// Outcomes of the actions that ran before the failure. The
        /// orchestrator uses these to decide whether anything mutated.
        completed: Vec<ActionOutcome>,
    },
}

impl ApplyError {
    /// True when any completed action mutated a declared target.
    pub fn mutated(&self) -> bool {
        let ApplyError::ActionFailed { completed, .. } = self;
        completed
            .iter()
            .any(|o| o.status == ActionStatus::Applied && o.target.is_some())
    }
}

/// A planned action produced by [`Applier::preview`].
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub kind: &'static str,
    pub target: Option<TargetRef>,
    pub description: String,
}

/// Applies fix actions sequentially.
pub struct Applier {
    command_timeout: Duration,
    insertion_policy: InsertionPolicy,
}

impl Applier {
    pub fn new(command_timeout: Duration, insertion_policy: InsertionPolicy) -> Self {
        Self {
            command_timeout,
            insertion_policy,
        }
    }

    /// Pure preview of what a fix would do: the planned action list and
    /// declared target set, with no side effects of any kind.
    pub fn preview(&self, pattern: &FixPattern) -> Vec<PlannedAction> {
        pattern
            .actions
            .iter()
            .map(|action| PlannedAction {
                kind: action.kind(),
                target: action.target(),
                description: describe(action),
            })
            .collect()
    }

    /// Apply every action of `pattern` in declared order.
    ///
    /// With `dry_run` set, every outcome is `Planned` and no I/O happens.
    /// Otherwise a failed action aborts the remaining actions and the
    /// error carries the outcomes completed so far.
    #[tracing::instrument(
        name = "apply_fix",
        skip(self, pattern, error),
        fields(pattern.id = %pattern.id, error.id = %error.id, dry_run)
    )]
    pub async fn apply(
        &self,
        pattern: &FixPattern,
        error: &DetectedError,
        dry_run: bool,
    ) -> Result<AppliedFix, ApplyError> {
        let mut outcomes = Vec::with_capacity(pattern.actions.len());

        for (index, action) in pattern.actions.iter().enumerate() {
            if dry_run {
                outcomes.push(ActionOutcome {
                    kind: action.kind().to_string(),
                    target: action.target(),
                    status: ActionStatus::Planned,
                    detail: describe(action),
                });
                continue;
            }

            match self.apply_one(action).await {
                Ok(outcome) => {
                    tracing::debug!(
                        action.index = index,
                        action.kind = action.kind(),
                        action.status = ?outcome.status,
                        "action completed"
                    );
                    outcomes.push(outcome);
                }
                Err(detail) => {
                    tracing::warn!(
                        action.index = index,
                        action.kind = action.kind(),
                        detail = %detail,
                        "action failed; aborting remaining actions"
                    );
                    return Err(ApplyError::ActionFailed {
                        index,
                        kind: action.kind(),
                        detail,
                        completed: outcomes,
                    });
                }
            }
        }

        Ok(AppliedFix {
            pattern_id: pattern.id.clone(),
            error_id: error.id.clone(),
            dry_run,
            outcomes,
            applied_at: Utc::now(),
        })
    }

    async fn apply_one(&self, action: &FixAction) -> Result<ActionOutcome, String> {
        let outcome = |status: ActionStatus, detail: String| ActionOutcome {
            kind: action.kind().to_string(),
            target: action.target(),
            status,
            detail,
        };

        match action {
            FixAction::ReplaceInFile {
                target,
                find,
                replace,
                is_regex,
            } => {
                let existing = fs::read_to_string(target)
                    .await
                    .map_err(|e| format!("cannot read {}: {e}", target.display()))?;

                let updated = if *is_regex {
                    let re = Regex::new(find).map_err(|e| format!("invalid pattern: {e}"))?;
                    re.replace_all(&existing, replace.as_str()).into_owned()
                } else {
                    existing.replace(find.as_str(), replace.as_str())
                };

                // Unchanged content is a no-op, never a false-positive
                // modification; re-running an already-applied fix must not
                // report a second mutation.
                if updated == existing {
                    return Ok(outcome(ActionStatus::NoOp, "content unchanged".to_string()));
                }
                fs::write(target, updated)
                    .await
                    .map_err(|e| format!("cannot write {}: {e}", target.display()))?;
                Ok(outcome(ActionStatus::Applied, "content replaced".to_string()))
            }

            FixAction::InsertInFile { target, content } => {
                let existing = match fs::read_to_string(target).await {
                    Ok(raw) => raw,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(err) => return Err(format!("cannot read {}: {err}", target.display())),
                };

                if !content.is_empty() && existing.contains(content.as_str()) {
                    return Ok(outcome(
                        ActionStatus::NoOp,
                        "content already present".to_string(),
                    ));
                }

                let updated = self.insertion_policy.insert(&existing, content);
                if let Some(parent) = target.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)
                            .await
                            .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
                    }
                }
                fs::write(target, updated)
                    .await
                    .map_err(|e| format!("cannot write {}: {e}", target.display()))?;
                Ok(outcome(ActionStatus::Applied, "content inserted".to_string()))
            }

            FixAction::DeleteFile { target } => match fs::remove_file(target).await {
                Ok(()) => Ok(outcome(ActionStatus::Applied, "file deleted".to_string())),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(outcome(
                    ActionStatus::NoOp,
                    "file already absent".to_string(),
                )),
                Err(err) => Err(format!("cannot delete {}: {err}", target.display())),
            },

            FixAction::RunCommand {
                command,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.command_timeout);
                let output = run_shell(command, timeout).await?;
                if output.exit_code != 0 {
                    return Err(format!(
                        "command exited with {}: {}",
                        output.exit_code,
                        output.stderr.trim()
                    ));
                }
                Ok(outcome(
                    ActionStatus::Applied,
                    format!("command succeeded: {}", output.stdout.trim()),
                ))
            }

            FixAction::UpdateConfigKey { target, key, value } => {
                let existing = match fs::read_to_string(target).await {
                    Ok(raw) => raw,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(err) => return Err(format!("cannot read {}: {err}", target.display())),
                };

                if !existing.trim().is_empty() {
                    let current = confdoc::get_key(target, &existing, key)
                        .map_err(|e| e.to_string())?;
                    if current.as_ref() == Some(value) {
                        return Ok(outcome(
                            ActionStatus::NoOp,
                            "value already set".to_string(),
                        ));
                    }
                }

                let updated = confdoc::set_key(target, &existing, key, value)
                    .map_err(|e| e.to_string())?;
                if let Some(parent) = target.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)
                            .await
                            .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
                    }
                }
                fs::write(target, updated)
                    .await
                    .map_err(|e| format!("cannot write {}: {e}", target.display()))?;
                Ok(outcome(ActionStatus::Applied, format!("{key} updated")))
            }
        }
    }
}

fn describe(action: &FixAction) -> String {
    match action {
        FixAction::ReplaceInFile { target, find, .. } => {
            format!("replace `{find}` in {}", target.display())
        }
        FixAction::InsertInFile { target, .. } => format!("insert into {}", target.display()),
        FixAction::DeleteFile { target } => format!("delete {}", target.display()),
        FixAction::RunCommand { command, .. } => format!("run `{command}`"),
        FixAction::UpdateConfigKey { target, key, .. } => {
            format!("set {key} in {}", target.display())
        }
    }
}
