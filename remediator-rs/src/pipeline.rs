// remediator-rs/src/pipeline.rs
// The per-attempt state machine.
//
// One invocation of run_attempt drives exactly one RemediationAttempt
// from Detected to a terminal state. The attempt is sequential by
// construction (a single task owns it), so its state transitions are
// serialized; concurrency lives one level up in the dispatcher. Every
// transition emits one audit event. Cancellation is honored at state
// boundaries only, and always rolls back anything already mutated.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use backup_store::{BackupError, BackupRecord};
use deploy_driver::DeployDriver;
use fix_catalog::RankedCandidate;
use remedy_types::{
    DeployReport, DetectedError, Disposition, FailureReason, FixPattern, RemediationState,
    ValidationReport,
};

use crate::gates::{self, ApprovalStatus};
use crate::Engine;

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RemediationResult {
    pub attempt_id: String,
    pub error_id: String,
    pub disposition: Disposition,
    pub reason: Option<FailureReason>,
    /// Candidates consumed by this attempt (>= 1 once matching found any).
    pub candidates_tried: u32,
    pub validation: Option<ValidationReport>,
    pub deploy: Option<DeployReport>,
    pub started_at: chrono::DateTime<Utc>,
    pub ended_at: chrono::DateTime<Utc>,
}

struct Attempt<'a> {
    engine: &'a Engine,
    id: String,
    error: &'a DetectedError,
    state: RemediationState,
    abort_rx: watch::Receiver<bool>,
    /// Backups consumed by restores across the whole attempt.
    restored_count: usize,
}

impl<'a> Attempt<'a> {
    async fn step(&mut self, to: RemediationState, detail: impl Into<String>) {
        self.engine
            .audit
            .record(&self.id, self.state, to, detail)
            .await;
        self.state = to;
    }

    fn aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    fn result(
        &self,
        disposition: Disposition,
        reason: Option<FailureReason>,
        tried: u32,
        validation: Option<ValidationReport>,
        deploy: Option<DeployReport>,
        started_at: chrono::DateTime<Utc>,
    ) -> RemediationResult {
        RemediationResult {
            attempt_id: self.id.clone(),
            error_id: self.error.id.clone(),
            disposition,
            reason,
            candidates_tried: tried,
            validation,
            deploy,
            started_at,
            ended_at: Utc::now(),
        }
    }
}

/// What a failed candidate leaves behind.
enum CandidateFailure {
    /// Rolled back cleanly (possibly consuming zero backups); the caller
    /// may try the next candidate.
    Recovered {
        reason: FailureReason,
        validation: Option<ValidationReport>,
        deploy: Option<DeployReport>,
    },
    /// A restore failed, or backup creation failed: terminal, no further
    /// candidates.
    Terminal {
        reason: FailureReason,
        disposition_override: Option<Disposition>,
    },
}

pub(crate) async fn run_attempt(
    engine: &Engine,
    attempt_id: String,
    error: &DetectedError,
    abort_rx: watch::Receiver<bool>,
) -> RemediationResult {
    let started_at = Utc::now();
    let mut attempt = Attempt {
        engine,
        id: attempt_id,
        error,
        state: RemediationState::Detected,
        abort_rx,
        restored_count: 0,
    };

    attempt
        .step(
            RemediationState::Matching,
            format!("matching `{}`", error.message),
        )
        .await;

    let candidates = engine.matcher.find_candidates(error);
    if candidates.is_empty() {
        attempt
            .step(RemediationState::Failed, "no catalog entry scored above zero")
            .await;
        return attempt.result(
            Disposition::Failed,
            Some(FailureReason::NoMatch),
            0,
            None,
            None,
            started_at,
        );
    }

    let budget = engine
        .registry
        .retries_left(&error.id, engine.config.retry_ceiling)
        .await
        .max(1);
    let max_candidates = if engine.config.try_next_candidate {
        (budget as usize).min(candidates.len())
    } else {
        1
    };

    let mut tried: u32 = 0;
    let mut last_reason = FailureReason::NoMatch;
    let mut last_validation = None;
    let mut last_deploy = None;

    for candidate in candidates.iter().take(max_candidates) {
        tried += 1;
        if tried > 1 {
            attempt
                .step(
                    RemediationState::Matching,
                    format!("retrying with next candidate `{}`", candidate.pattern.pattern.id),
                )
                .await;
        }

        match try_candidate(&mut attempt, candidate).await {
            Ok((validation, deploy)) => {
                return attempt.result(
                    Disposition::Succeeded,
                    None,
                    tried,
                    validation,
                    deploy,
                    started_at,
                );
            }
            Err(CandidateFailure::Terminal {
                reason,
                disposition_override,
            }) => {
                let disposition = disposition_override.unwrap_or(if attempt.restored_count > 0 {
                    Disposition::RolledBack
                } else {
                    Disposition::Failed
                });
                return attempt.result(
                    disposition,
                    Some(reason),
                    tried,
                    last_validation,
                    last_deploy,
                    started_at,
                );
            }
            Err(CandidateFailure::Recovered {
                reason,
                validation,
                deploy,
            }) => {
                last_reason = reason;
                last_validation = validation.or(last_validation);
                last_deploy = deploy.or(last_deploy);

                // Cancellation never continues into another candidate.
                let more = tried < max_candidates as u32 && reason != FailureReason::Aborted;
                if !more {
                    attempt
                        .step(
                            RemediationState::Failed,
                            format!("candidates exhausted ({reason:?})"),
                        )
                        .await;
                    let disposition = if attempt.restored_count > 0 {
                        Disposition::RolledBack
                    } else {
                        Disposition::Failed
                    };
                    return attempt.result(
                        disposition,
                        Some(reason),
                        tried,
                        last_validation,
                        last_deploy,
                        started_at,
                    );
                }
            }
        }
    }

    // Loop always returns from its last iteration; this is unreachable in
    // practice but kept total for safety.
    attempt
        .step(RemediationState::Failed, "no candidate succeeded")
        .await;
    attempt.result(
        Disposition::Failed,
        Some(last_reason),
        tried,
        last_validation,
        last_deploy,
        started_at,
    )
}

/// Drive one candidate from Backup through Deploying. On any failure,
/// roll back this candidate's backups (newest first) before returning.
async fn try_candidate(
    attempt: &mut Attempt<'_>,
    candidate: &RankedCandidate,
) -> Result<(Option<ValidationReport>, Option<DeployReport>), CandidateFailure> {
    let engine = attempt.engine;
    let pattern = &candidate.pattern.pattern;

    attempt
        .step(
            RemediationState::Backup,
            format!(
                "candidate `{}` (score {}, weight {:.2})",
                pattern.id, candidate.score, candidate.weight
            ),
        )
        .await;

    if attempt.aborted() {
        // Nothing mutated yet for this candidate.
        attempt
            .step(RemediationState::RollingBack, "aborted by operator")
            .await;
        return Err(fail_rolled_back(attempt, &[], false, FailureReason::Aborted, None, None).await);
    }

    // Backup phase: a durable backup must exist for every declared target
    // before any action mutates it.
    let mut backups: Vec<BackupRecord> = Vec::new();
    for target in pattern.mutation_targets() {
        match engine.store.snapshot(&target, &attempt.id).await {
            Ok(record) => backups.push(record),
            Err(err) => {
                let reason = match &err {
                    BackupError::TargetUnreadable { .. } => FailureReason::TargetUnreadable,
                    _ => FailureReason::BackupFailed,
                };
                // No mutation has happened; abort before applying.
                attempt
                    .step(RemediationState::RollingBack, format!("backup aborted: {err}"))
                    .await;
                attempt
                    .step(RemediationState::Failed, "no mutation occurred")
                    .await;
                return Err(CandidateFailure::Terminal {
                    reason,
                    disposition_override: None,
                });
            }
        }
    }

    attempt
        .step(
            RemediationState::Applying,
            format!("{} backups recorded", backups.len()),
        )
        .await;

    if attempt.aborted() {
        attempt
            .step(RemediationState::RollingBack, "aborted by operator")
            .await;
        return Err(
            fail_rolled_back(attempt, &backups, false, FailureReason::Aborted, None, None).await,
        );
    }

    let mutated = match engine.applier.apply(pattern, attempt.error, false).await {
        Ok(applied) => applied.mutated(),
        Err(err) => {
            let mutated = err.mutated();
            attempt
                .step(RemediationState::RollingBack, err.to_string())
                .await;
            return Err(fail_rolled_back(
                attempt,
                &backups,
                mutated,
                FailureReason::ActionFailed,
                None,
                None,
            )
            .await);
        }
    };

    attempt
        .step(
            RemediationState::Validating,
            if pattern.validation_required {
                "running validation suite"
            } else {
                "validation not required by pattern"
            },
        )
        .await;

    let mut validation = None;
    if pattern.validation_required {
        let report = gates::validate(
            engine.validator.as_ref(),
            &attempt.error.artifact,
            engine.config.validation_timeout(),
        )
        .await;
        let passed = report.passed;
        let detail = report.details.clone();
        validation = Some(report);
        if !passed {
            attempt
                .step(
                    RemediationState::RollingBack,
                    format!("validation failed: {detail}"),
                )
                .await;
            return Err(fail_rolled_back(
                attempt,
                &backups,
                mutated,
                FailureReason::ValidationFailed,
                validation,
                None,
            )
            .await);
        }
    }

    if attempt.aborted() {
        attempt
            .step(RemediationState::RollingBack, "aborted by operator")
            .await;
        return Err(fail_rolled_back(
            attempt,
            &backups,
            mutated,
            FailureReason::Aborted,
            validation,
            None,
        )
        .await);
    }

    // Approval gate.
    if gates::needs_approval(pattern.risk, engine.config.require_approval) {
        attempt
            .step(
                RemediationState::AwaitingApproval,
                format!("risk {} requires approval", pattern.risk),
            )
            .await;

        match await_approval(attempt, pattern).await {
            Ok(()) => {}
            Err(reason) => {
                attempt
                    .step(RemediationState::RollingBack, format!("{reason:?}"))
                    .await;
                return Err(fail_rolled_back(
                    attempt, &backups, mutated, reason, validation, None,
                )
                .await);
            }
        }
        attempt
            .step(RemediationState::Deploying, "approval granted")
            .await;
    } else {
        attempt
            .step(
                RemediationState::Deploying,
                format!("risk {}, no approval required", pattern.risk),
            )
            .await;
    }

    let driver = DeployDriver::new(engine.deploy_backend.as_ref());
    let deploy = match driver.execute(&engine.strategy).await {
        Ok(report) => report,
        Err(err) => {
            attempt
                .step(RemediationState::RollingBack, err.to_string())
                .await;
            return Err(fail_rolled_back(
                attempt,
                &backups,
                mutated,
                FailureReason::DeployFailed,
                validation,
                None,
            )
            .await);
        }
    };

    if !deploy.healthy {
        attempt
            .step(
                RemediationState::RollingBack,
                format!(
                    "deploy unhealthy after {} stage(s)",
                    deploy.stages_completed
                ),
            )
            .await;
        return Err(fail_rolled_back(
            attempt,
            &backups,
            mutated,
            FailureReason::DeployFailed,
            validation,
            Some(deploy),
        )
        .await);
    }

    attempt
        .step(
            RemediationState::Succeeded,
            format!(
                "deployed via {} ({} stage(s))",
                deploy.strategy, deploy.stages_completed
            ),
        )
        .await;

    Ok((validation, Some(deploy)))
}

/// Restore this candidate's backups (newest first) when anything was
/// mutated, then fold the failure into a CandidateFailure. A restore
/// failure escalates to manual intervention: the one condition that is
/// surfaced loudly instead of being absorbed as an ordinary failure.
async fn fail_rolled_back(
    attempt: &mut Attempt<'_>,
    backups: &[BackupRecord],
    mutated: bool,
    reason: FailureReason,
    validation: Option<ValidationReport>,
    deploy: Option<DeployReport>,
) -> CandidateFailure {
    let engine = attempt.engine;

    if mutated {
        for record in backups.iter().rev() {
            match engine.store.restore(&record.id).await {
                Ok(()) => attempt.restored_count += 1,
                Err(err) => {
                    tracing::error!(
                        attempt.id = %attempt.id,
                        backup.id = %record.id,
                        backup.target = %record.target,
                        error = %err,
                        "RESTORE FAILED: system may be inconsistent, manual intervention required"
                    );
                    metrics::increment_counter!("remediator_manual_intervention_total");
                    attempt
                        .step(
                            RemediationState::Failed,
                            format!("restore of {} failed: {err}; manual intervention required", record.target),
                        )
                        .await;
                    return CandidateFailure::Terminal {
                        reason: FailureReason::RestoreFailed,
                        disposition_override: Some(Disposition::ManualInterventionRequired),
                    };
                }
            }
        }
        metrics::increment_counter!("remediator_rollbacks_total");
    }

    CandidateFailure::Recovered {
        reason,
        validation,
        deploy,
    }
}

/// Poll the approval broker until a decision, expiry, or the configured
/// timeout. The token is re-checked for validity (unexpired, matches the
/// attempt) before the pipeline resumes.
async fn await_approval(
    attempt: &mut Attempt<'_>,
    pattern: &FixPattern,
) -> Result<(), FailureReason> {
    let engine = attempt.engine;
    let handle = engine.broker.request(&attempt.id, pattern).await;
    let deadline = tokio::time::Instant::now() + engine.config.approval_timeout();
    let poll_every = Duration::from_millis(200);

    loop {
        if attempt.aborted() {
            return Err(FailureReason::Aborted);
        }
        if Utc::now() >= handle.expires_at || tokio::time::Instant::now() >= deadline {
            return Err(FailureReason::ApprovalTimeout);
        }

        match engine.broker.check(&attempt.id, &handle.token).await {
            ApprovalStatus::Approved => {
                if handle.is_valid_for(&attempt.id, &handle.token) {
                    return Ok(());
                }
                // Token expired between the check and here.
                return Err(FailureReason::ApprovalTimeout);
            }
            ApprovalStatus::Denied => return Err(FailureReason::ApprovalDenied),
            ApprovalStatus::Pending => tokio::time::sleep(poll_every).await,
        }
    }
}
