// backup-store-rs/src/lib.rs
// Durable snapshot/restore store for mutation targets.
//
// Implementation notes:
// - Append-only NDJSON journal on disk (one entry per line), replayed at
//   open. Parse failures are logged and skipped so a torn tail line never
//   breaks startup.
// - Backups are append-only: restoring consumes the latest backup for a
//   target without deleting older ones; older records only disappear when
//   the retention bound prunes them in creation order.
// - A single async mutex guards the in-memory index and the journal file,
//   which also serializes concurrent snapshots of the same target. The
//   lock is released between store operations; it never spans a pipeline
//   state transition.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use remedy_types::{confdoc, PriorState, TargetRef};

/// Errors raised by the backup store.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("target {target} cannot be read: {detail}")]
    TargetUnreadable { target: String, detail: String },

    #[error("backup {0} not found")]
    NotFound(String),

    #[error("restore of backup {backup_id} failed: {detail}")]
    RestoreFailed { backup_id: String, detail: String },

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One recorded backup: a mutation target tied to its pre-mutation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    /// Attempt that created this backup; prune never touches records of
    /// active attempts.
    pub attempt_id: String,
    pub target: TargetRef,
    pub prior: PriorState,
    pub created_at: DateTime<Utc>,
}

/// Journal entries, one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum JournalEntry {
    Created { record: BackupRecord },
    Restored { id: String },
    Pruned { id: String },
}

#[derive(Debug, Default)]
struct Inner {
    /// Creation order.
    records: Vec<BackupRecord>,
    restored: HashSet<String>,
    pruned: HashSet<String>,
}

/// Durable backup store backed by an NDJSON journal.
pub struct BackupStore {
    journal_path: PathBuf,
    inner: Mutex<Inner>,
}

impl BackupStore {
    /// Open a store, replaying any existing journal at `journal_path`.
    pub async fn open(journal_path: impl Into<PathBuf>) -> Result<Self, BackupError> {
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
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(JournalEntry::Created { record }) => inner.records.push(record),
                    Ok(JournalEntry::Restored { id }) => {
                        inner.restored.insert(id);
                    }
                    Ok(JournalEntry::Pruned { id }) => {
                        inner.pruned.insert(id);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to parse backup journal line; skipping");
                    }
                }
            }
        }

        tracing::debug!(
            journal = %journal_path.display(),
            records = inner.records.len(),
            "backup store opened"
        );

        Ok(Self {
            journal_path,
            inner: Mutex::new(inner),
        })
    }

    /// Snapshot the current content/value of `target` for `attempt_id`.
    ///
    /// A target that does not exist snapshots as `Absent`, which on
    /// restore means delete rather than write-empty. A target that exists
    /// but cannot be read fails with `TargetUnreadable` so the attempt
    /// aborts before any mutation.
    pub async fn snapshot(
        &self,
        target: &TargetRef,
        attempt_id: &str,
    ) -> Result<BackupRecord, BackupError> {
        // Lock before reading the target so concurrent snapshots of the
        // same target are serialized.
        let mut inner = self.inner.lock().await;

        let prior = read_prior_state(target).await?;
        let record = BackupRecord {
            id: Uuid::new_v4().to_string(),
            attempt_id: attempt_id.to_string(),
            target: target.clone(),
            prior,
            created_at: Utc::now(),
        };

        self.append(&JournalEntry::Created {
            record: record.clone(),
        })
        .await?;
        inner.records.push(record.clone());

        tracing::debug!(
            backup.id = %record.id,
            backup.target = %record.target,
            attempt.id = %attempt_id,
            "snapshot recorded"
        );

        Ok(record)
    }

    /// Restore the recorded prior state of a backup.
    ///
    /// Idempotent: restoring the same id a second time is a no-op. Any
    /// failure to write the prior state back is `RestoreFailed`, which the
    /// orchestrator escalates to manual intervention.
    pub async fn restore(&self, backup_id: &str) -> Result<(), BackupError> {
        let mut inner = self.inner.lock().await;

        if inner.restored.contains(backup_id) {
            tracing::debug!(backup.id = %backup_id, "restore already applied; no-op");
            return Ok(());
        }

        let record = inner
            .records
            .iter()
            .find(|r| r.id == backup_id && !inner.pruned.contains(&r.id))
            .cloned()
            .ok_or_else(|| BackupError::NotFound(backup_id.to_string()))?;

        write_prior_state(&record)
            .await
            .map_err(|detail| BackupError::RestoreFailed {
                backup_id: backup_id.to_string(),
                detail,
            })?;

        self.append(&JournalEntry::Restored {
            id: backup_id.to_string(),
        })
        .await?;
        inner.restored.insert(backup_id.to_string());

        tracing::info!(backup.id = %backup_id, backup.target = %record.target, "backup restored");
        Ok(())
    }

    /// Most recent non-pruned backup for a target, if any.
    pub async fn latest_for(&self, target: &TargetRef) -> Option<BackupRecord> {
        let inner = self.inner.lock().await;
        inner
            .records
            .iter()
            .rev()
            .find(|r| &r.target == target && !inner.pruned.contains(&r.id))
            .cloned()
    }

    /// Backups created by one attempt, in creation order.
    pub async fn records_for_attempt(&self, attempt_id: &str) -> Vec<BackupRecord> {
        let inner = self.inner.lock().await;
        inner
            .records
            .iter()
            .filter(|r| r.attempt_id == attempt_id && !inner.pruned.contains(&r.id))
            .cloned()
            .collect()
    }

    /// Prune the oldest backups beyond the `retain` most recent, in
    /// creation order. Backups belonging to an attempt id in
    /// `active_attempts` are never pruned.
    pub async fn prune(
        &self,
        retain: usize,
        active_attempts: &HashSet<String>,
    ) -> Result<usize, BackupError> {
        let mut inner = self.inner.lock().await;

        let live: Vec<String> = inner
            .records
            .iter()
            .filter(|r| !inner.pruned.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();
        if live.len() <= retain {
            return Ok(0);
        }

        let excess = live.len() - retain;
        let mut pruned = 0;
        for id in live.into_iter().take(excess) {
            let record = inner
                .records
                .iter()
                .find(|r| r.id == id)
                .expect("live id comes from records");
            if active_attempts.contains(&record.attempt_id) {
                continue;
            }
            self.append(&JournalEntry::Pruned { id: id.clone() }).await?;
            inner.pruned.insert(id);
            pruned += 1;
        }

        if pruned > 0 {
            tracing::debug!(count = pruned, "pruned old backups");
        }
        Ok(pruned)
    }

    /// Count of non-pruned backups.
    pub async fn live_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .records
            .iter()
            .filter(|r| !inner.pruned.contains(&r.id))
            .count()
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), BackupError> {
        if let Some(parent) = self.journal_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        let line = serde_json::to_string(entry)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

async fn read_prior_state(target: &TargetRef) -> Result<PriorState, BackupError> {
    let unreadable = |detail: String| BackupError::TargetUnreadable {
        target: target.to_string(),
        detail,
    };

    match target {
        TargetRef::File { path } => match fs::read_to_string(path).await {
            Ok(content) => Ok(PriorState::FileContent { content }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PriorState::Absent),
            Err(err) => Err(unreadable(err.to_string())),
        },
        TargetRef::ConfigKey { path, key } => match fs::read_to_string(path).await {
            Ok(raw) => {
                let value = confdoc::get_key(path, &raw, key)
                    .map_err(|e| unreadable(e.to_string()))?;
                Ok(match value {
                    Some(value) => PriorState::ConfigValue { value },
                    None => PriorState::Absent,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PriorState::Absent),
            Err(err) => Err(unreadable(err.to_string())),
        },
    }
}

async fn write_prior_state(record: &BackupRecord) -> Result<(), String> {
    match (&record.target, &record.prior) {
        (TargetRef::File { path }, PriorState::FileContent { content }) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
                }
            }
            fs::write(path, content).await.map_err(|e| e.to_string())
        }
        (TargetRef::File { path }, PriorState::Absent) => match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.to_string()),
        },
        (TargetRef::ConfigKey { path, key }, prior) => {
            let raw = match fs::read_to_string(path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    // Document vanished since the snapshot. A recorded
                    // absent key needs nothing; a recorded value cannot be
                    // restored into a missing document.
                    return match prior {
                        PriorState::Absent => Ok(()),
                        _ => Err(format!("config document {} is missing", path.display())),
                    };
                }
                Err(err) => return Err(err.to_string()),
            };

            let updated = match prior {
                PriorState::ConfigValue { value } => {
                    confdoc::set_key(path, &raw, key, value).map_err(|e| e.to_string())?
                }
                PriorState::Absent => {
                    confdoc::remove_key(path, &raw, key).map_err(|e| e.to_string())?
                }
                PriorState::FileContent { .. } => {
                    return Err("file content recorded for a config-key target".to_string())
                }
            };
            fs::write(path, updated).await.map_err(|e| e.to_string())
        }
        (TargetRef::File { .. }, PriorState::ConfigValue { .. }) => {
            Err("config value recorded for a file target".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_target(path: &Path) -> TargetRef {
        TargetRef::File {
            path: path.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn restore_round_trips_file_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("config.json");
        tokio::fs::write(&file, "{\"mode\": 644}").await.expect("write");

        let store = BackupStore::open(dir.path().join("journal.ndjson"))
            .await
            .expect("open");
        let backup = store
            .snapshot(&file_target(&file), "attempt-1")
            .await
            .expect("snapshot");

        tokio::fs::write(&file, "{\"mode\": 777}").await.expect("mutate");
        store.restore(&backup.id).await.expect("restore");

        let content = tokio::fs::read_to_string(&file).await.expect("read");
        assert_eq!(content, "{\"mode\": 644}");
    }

    #[tokio::test]
    async fn absent_prior_state_restores_to_deletion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("generated.txt");

        let store = BackupStore::open(dir.path().join("journal.ndjson"))
            .await
            .expect("open");
        let backup = store
            .snapshot(&file_target(&file), "attempt-1")
            .await
            .expect("snapshot of absent target");
        assert_eq!(backup.prior, PriorState::Absent);

        tokio::fs::write(&file, "created by fix").await.expect("write");
        store.restore(&backup.id).await.expect("restore");
        assert!(!file.exists(), "restore of absent prior state must delete");
    }

    #[tokio::test]
    async fn restore_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "original").await.expect("write");

        let store = BackupStore::open(dir.path().join("journal.ndjson"))
            .await
            .expect("open");
        let backup = store
            .snapshot(&file_target(&file), "attempt-1")
            .await
            .expect("snapshot");

        tokio::fs::write(&file, "mutated").await.expect("mutate");
        store.restore(&backup.id).await.expect("first restore");

        // Mutate again; the second restore must be a no-op, not a
        // re-application of the recorded content.
        tokio::fs::write(&file, "mutated again").await.expect("mutate");
        store.restore(&backup.id).await.expect("second restore");
        let content = tokio::fs::read_to_string(&file).await.expect("read");
        assert_eq!(content, "mutated again");
    }

    #[tokio::test]
    async fn config_key_snapshot_and_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("app.json");
        tokio::fs::write(&file, r#"{"server": {"port": 80}}"#)
            .await
            .expect("write");

        let target = TargetRef::ConfigKey {
            path: file.clone(),
            key: "server.port".to_string(),
        };
        let store = BackupStore::open(dir.path().join("journal.ndjson"))
            .await
            .expect("open");
        let backup = store.snapshot(&target, "attempt-1").await.expect("snapshot");
        assert_eq!(
            backup.prior,
            PriorState::ConfigValue { value: json!(80) }
        );

        // Mutate the key, then restore the prior value.
        let raw = tokio::fs::read_to_string(&file).await.expect("read");
        let updated = confdoc::set_key(&file, &raw, "server.port", &json!(8443)).expect("set");
        tokio::fs::write(&file, updated).await.expect("mutate");

        store.restore(&backup.id).await.expect("restore");
        let raw = tokio::fs::read_to_string(&file).await.expect("read");
        let value = confdoc::get_key(&file, &raw, "server.port").expect("get");
        assert_eq!(value, Some(json!(80)));
    }

    #[tokio::test]
    async fn journal_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "original").await.expect("write");
        let journal = dir.path().join("journal.ndjson");

        let backup_id = {
            let store = BackupStore::open(&journal).await.expect("open");
            store
                .snapshot(&file_target(&file), "attempt-1")
                .await
                .expect("snapshot")
                .id
        };

        tokio::fs::write(&file, "mutated").await.expect("mutate");

        // A fresh process over the same journal can still restore.
        let store = BackupStore::open(&journal).await.expect("reopen");
        store.restore(&backup_id).await.expect("restore");
        let content = tokio::fs::read_to_string(&file).await.expect("read");
        assert_eq!(content, "original");
    }

    #[tokio::test]
    async fn prune_keeps_newest_and_skips_active_attempts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BackupStore::open(dir.path().join("journal.ndjson"))
            .await
            .expect("open");

        for i in 0..6 {
            let file = dir.path().join(format!("f{i}.txt"));
            tokio::fs::write(&file, format!("content {i}")).await.expect("write");
            let attempt = if i == 0 { "active" } else { "done" };
            store
                .snapshot(&file_target(&file), attempt)
                .await
                .expect("snapshot");
        }

        let mut active = HashSet::new();
        active.insert("active".to_string());

        let pruned = store.prune(3, &active).await.expect("prune");
        // Three candidates beyond retention, but the oldest belongs to an
        // active attempt and must survive.
        assert_eq!(pruned, 2);
        assert_eq!(store.live_count().await, 4);
        assert_eq!(store.records_for_attempt("active").await.len(), 1);
    }

    #[tokio::test]
    async fn latest_for_returns_most_recent_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        let target = file_target(&file);
        let store = BackupStore::open(dir.path().join("journal.ndjson"))
            .await
            .expect("open");

        tokio::fs::write(&file, "one").await.expect("write");
        store.snapshot(&target, "attempt-1").await.expect("snapshot");
        tokio::fs::write(&file, "two").await.expect("write");
        let second = store.snapshot(&target, "attempt-2").await.expect("snapshot");

        let latest = store.latest_for(&target).await.expect("latest");
        assert_eq!(latest.id, second.id);
        assert_eq!(
            latest.prior,
            PriorState::FileContent {
                content: "two".to_string()
            }
        );
    }

    #[tokio::test]
    async fn restore_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BackupStore::open(dir.path().join("journal.ndjson"))
            .await
            .expect("open");
        let err = store.restore("no-such-backup").await.expect_err("missing");
        assert!(matches!(err, BackupError::NotFound(_)));
    }
}
