// remediator-rs/src/audit.rs
// Append-only audit stream of attempt state transitions.
//
// Every state transition emits exactly one event. The stream is the sole
// source of truth for what happened: external reporting and notification
// collaborators subscribe to the broadcast side, and the NDJSON file
// keeps a durable copy.

use std::path::PathBuf;

use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex, RwLock};

use remedy_types::{AuditEvent, RemediationState};

pub struct AuditLog {
    events: RwLock<Vec<AuditEvent>>,
    sink_path: Option<PathBuf>,
    sink_lock: Mutex<()>,
    tx: broadcast::Sender<AuditEvent>,
}

impl AuditLog {
    /// Create a log, optionally backed by an NDJSON file sink.
    pub fn new(sink_path: Option<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            events: RwLock::new(Vec::new()),
            sink_path,
            sink_lock: Mutex::new(()),
            tx,
        }
    }

    /// Subscribe to live events. Lagging subscribers miss events rather
    /// than blocking the pipeline.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    /// Record one state transition.
    pub async fn record(
        &self,
        attempt_id: &str,
        from_state: RemediationState,
        to_state: RemediationState,
        detail: impl Into<String>,
    ) {
        let event = AuditEvent {
            attempt_id: attempt_id.to_string(),
            from_state,
            to_state,
            timestamp: Utc::now(),
            detail: detail.into(),
        };

        tracing::info!(
            attempt.id = %event.attempt_id,
            from = %event.from_state,
            to = %event.to_state,
            detail = %event.detail,
            "state transition"
        );

        self.events.write().await.push(event.clone());

        if let Some(path) = &self.sink_path {
            // Serialize file appends; failures degrade to a warning so a
            // full disk never takes the pipeline down with it.
            let _guard = self.sink_lock.lock().await;
            if let Err(err) = append_line(path, &event).await {
                tracing::warn!(error = %err, "failed to append audit event to sink");
            }
        }

        let _ = self.tx.send(event);
    }

    /// Snapshot of all events recorded so far, in order.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Events for one attempt, in order.
    pub async fn events_for(&self, attempt_id: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.attempt_id == attempt_id)
            .cloned()
            .collect()
    }
}

async fn append_line(path: &PathBuf, event: &AuditEvent) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_order_and_filters_by_attempt() {
        let log = AuditLog::new(None);
        log.record("a1", RemediationState::Detected, RemediationState::Matching, "")
            .await;
        log.record("a2", RemediationState::Detected, RemediationState::Matching, "")
            .await;
        log.record("a1", RemediationState::Matching, RemediationState::Backup, "")
            .await;

        let all = log.events().await;
        assert_eq!(all.len(), 3);

        let a1 = log.events_for("a1").await;
        assert_eq!(a1.len(), 2);
        assert_eq!(a1[1].to_state, RemediationState::Backup);
    }

    #[tokio::test]
    async fn file_sink_appends_ndjson() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("audit.ndjson");
        let log = AuditLog::new(Some(sink.clone()));

        log.record("a1", RemediationState::Detected, RemediationState::Matching, "start")
            .await;
        log.record("a1", RemediationState::Matching, RemediationState::Failed, "no match")
            .await;

        let raw = tokio::fs::read_to_string(&sink).await.expect("read sink");
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let event: AuditEvent = serde_json::from_str(lines[1]).expect("parse");
        assert_eq!(event.to_state, RemediationState::Failed);
    }
}
