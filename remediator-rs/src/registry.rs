// remediator-rs/src/registry.rs
// Active-attempt registry and durable attempt journal.
//
// The registry enforces the at-most-one-active-attempt-per-error-id
// invariant and carries the per-error retry ledger. Terminal attempt
// snapshots are appended to an NDJSON journal and replayed at startup so
// the retry ceiling survives process restart.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};

use remedy_types::{Disposition, FailureReason};

/// Terminal snapshot of one attempt, journaled for durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    pub attempt_id: String,
    pub error_id: String,
    pub disposition: Disposition,
    pub reason: Option<FailureReason>,
    /// Retry budget consumed by this run, including extra candidates
    /// tried inside the same pipeline invocation. Replay adds this to the
    /// per-error ledger, so the ceiling holds across restart.
    pub tries: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Handle to an active attempt: id plus its abort flag.
#[derive(Debug, Clone)]
pub struct ActiveAttempt {
    pub attempt_id: String,
    abort_tx: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by error id; guarded against concurrent insert of the same
    /// key by the surrounding mutex.
    active: HashMap<String, ActiveAttempt>,
    /// Terminal attempts per error id, replayed from the journal.
    attempts_used: HashMap<String, u32>,
}

pub struct AttemptRegistry {
    journal_path: PathBuf,
    inner: Mutex<Inner>,
}

/// Outcome of trying to begin an attempt for an error id.
pub enum Admission {
    /// Attempt admitted; run the pipeline with this id and abort flag.
    Begin {
        attempt_id: String,
        abort_rx: watch::Receiver<bool>,
    },
    /// An attempt for this error id is already in flight.
    DuplicateOf { attempt_id: String },
    /// The retry ceiling for this error id is exhausted.
    RetriesExhausted { used: u32 },
}

impl AttemptRegistry {
    /// Open the registry, replaying the attempt journal if present.
    pub async fn open(journal_path: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let journal_path = journal_path.into();
        if let Some(parent) = journal_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut inner = Inner::default();
        if journal_path.exists() {
            let raw = fs::read_to_string(&journal_path).await?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AttemptSnapshot>(line) {
                    Ok(snapshot) => {
                        *inner.attempts_used.entry(snapshot.error_id).or_insert(0) +=
                            snapshot.tries.max(1);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to parse attempt journal line; skipping");
                    }
                }
            }
        }

        Ok(Self {
            journal_path,
            inner: Mutex::new(inner),
        })
    }

    /// Admit a new attempt for `error_id`, enforcing dedupe and the
    /// retry ceiling. The attempt id is derived from the error id and the
    /// attempt ordinal.
    pub async fn admit(&self, error_id: &str, retry_ceiling: u32) -> Admission {
        let mut inner = self.inner.lock().await;

        if let Some(active) = inner.active.get(error_id) {
            return Admission::DuplicateOf {
                attempt_id: active.attempt_id.clone(),
            };
        }

        let used = inner.attempts_used.get(error_id).copied().unwrap_or(0);
        if used >= retry_ceiling {
            return Admission::RetriesExhausted { used };
        }

        let attempt_id = format!("{error_id}-a{}", used + 1);
        let (abort_tx, abort_rx) = watch::channel(false);
        inner.active.insert(
            error_id.to_string(),
            ActiveAttempt {
                attempt_id: attempt_id.clone(),
                abort_tx,
            },
        );

        Admission::Begin {
            attempt_id,
            abort_rx,
        }
    }

    /// Remaining automatic attempts for an error id, given the ceiling.
    pub async fn retries_left(&self, error_id: &str, retry_ceiling: u32) -> u32 {
        let inner = self.inner.lock().await;
        let used = inner.attempts_used.get(error_id).copied().unwrap_or(0);
        retry_ceiling.saturating_sub(used)
    }

    /// Error ids with an attempt currently in flight. The backup store's
    /// prune pass treats these as pinned.
    pub async fn active_attempt_ids(&self) -> std::collections::HashSet<String> {
        let inner = self.inner.lock().await;
        inner
            .active
            .values()
            .map(|a| a.attempt_id.clone())
            .collect()
    }

    /// Request cancellation of the in-flight attempt for `error_id`.
    /// Honored by the pipeline at its next state boundary.
    pub async fn cancel(&self, error_id: &str) -> bool {
        let inner = self.inner.lock().await;
        match inner.active.get(error_id) {
            Some(active) => {
                tracing::info!(
                    error.id = %error_id,
                    attempt.id = %active.attempt_id,
                    "cancellation requested"
                );
                active.abort_tx.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Record a terminal attempt: bump the retry ledger by the tries the
    /// run consumed, free the active slot, and journal the snapshot.
    pub async fn finish(&self, snapshot: AttemptSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.active.remove(&snapshot.error_id);
        *inner
            .attempts_used
            .entry(snapshot.error_id.clone())
            .or_insert(0) += snapshot.tries.max(1);

        if let Err(err) = self.append(&snapshot).await {
            tracing::warn!(error = %err, "failed to journal attempt snapshot");
        }
    }

    async fn append(&self, snapshot: &AttemptSnapshot) -> Result<(), std::io::Error> {
        if let Some(parent) = self.journal_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        let line = serde_json::to_string(snapshot).map_err(std::io::Error::other)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}
