// remediator-rs/src/lib.rs
// Remediation orchestrator: the top-level state machine and concurrency
// controller of the Aegis pipeline.
//
// Wiring is explicit message passing: detected errors flow in through a
// single mpsc channel, audit events flow out through a broadcast
// channel. A dispatcher task dedupes against the active-attempt registry
// and admits work into a bounded pool (semaphore); each admitted attempt
// runs as one sequential task so its state transitions are serialized.
//
// The orchestrator recovers every failure except a failed restore
// locally: callers only ever see a terminal RemediationResult plus the
// audit stream. A failed restore escalates to manual intervention and is
// the one condition logged at error level.

mod audit;
mod gates;
mod pipeline;
mod registry;

pub use audit::AuditLog;
pub use gates::{
    needs_approval, validate, ApprovalBroker, ApprovalHandle, ApprovalStatus,
    PolicyApprovalBroker, ValidationRunner,
};
pub use pipeline::RemediationResult;
pub use registry::{Admission, AttemptRegistry, AttemptSnapshot};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;

use backup_store::BackupStore;
use deploy_driver::{DeployBackend, DeployStrategy};
use fix_applier::{Applier, InsertionPolicy};
use fix_catalog::{FixCatalog, Matcher};
use remedy_types::{DetectedError, Disposition, RemediationState, RemediatorConfig};

/// Shared collaborators of one pipeline instance.
pub(crate) struct Engine {
    pub(crate) config: RemediatorConfig,
    pub(crate) matcher: Matcher,
    pub(crate) store: BackupStore,
    pub(crate) applier: Applier,
    pub(crate) validator: Arc<dyn ValidationRunner>,
    pub(crate) broker: Arc<dyn ApprovalBroker>,
    pub(crate) deploy_backend: Arc<dyn DeployBackend>,
    pub(crate) strategy: DeployStrategy,
    pub(crate) audit: AuditLog,
    pub(crate) registry: AttemptRegistry,
}

/// Builder for [`Remediator`]. The catalog, validation runner, approval
/// broker, and deploy backend are injectable so independent pipelines
/// (and tests) can run side by side with different collaborators.
pub struct RemediatorBuilder {
    config: RemediatorConfig,
    catalog: Arc<FixCatalog>,
    validator: Arc<dyn ValidationRunner>,
    broker: Option<Arc<dyn ApprovalBroker>>,
    deploy_backend: Arc<dyn DeployBackend>,
    strategy: DeployStrategy,
    insertion_policy: InsertionPolicy,
}

impl RemediatorBuilder {
    pub fn new(
        config: RemediatorConfig,
        catalog: Arc<FixCatalog>,
        validator: Arc<dyn ValidationRunner>,
        deploy_backend: Arc<dyn DeployBackend>,
    ) -> Self {
        Self {
            config,
            catalog,
            validator,
            broker: None,
            deploy_backend,
            strategy: DeployStrategy::Immediate,
            insertion_policy: InsertionPolicy::default(),
        }
    }

    pub fn approval_broker(mut self, broker: Arc<dyn ApprovalBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn deploy_strategy(mut self, strategy: DeployStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Staged rollout (10% -> 50% -> 100%) using the configured
    /// stage pause.
    pub fn staged_deploy(mut self) -> Self {
        self.strategy = DeployStrategy::staged_default(self.config.deploy_stage_pause());
        self
    }

    /// Canary rollout using the configured soak period.
    pub fn canary_deploy(mut self) -> Self {
        self.strategy = DeployStrategy::Canary {
            soak: self.config.canary_soak(),
        };
        self
    }

    pub fn insertion_policy(mut self, policy: InsertionPolicy) -> Self {
        self.insertion_policy = policy;
        self
    }

    /// Open durable state under the configured data directory and start
    /// the dispatcher.
    pub async fn start(self) -> Result<Remediator, std::io::Error> {
        let data_dir = self.config.data_dir.clone();
        let store = BackupStore::open(data_dir.join("backups.ndjson"))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let registry = AttemptRegistry::open(data_dir.join("attempts.ndjson")).await?;
        let audit = AuditLog::new(Some(data_dir.join("audit.ndjson")));

        let broker: Arc<dyn ApprovalBroker> = match self.broker {
            Some(broker) => broker,
            // Unattended default: grant, with the configured token TTL.
            // High-risk fixes still pass through AwaitingApproval and the
            // token-validity check.
            None => Arc::new(PolicyApprovalBroker::new(true, self.config.approval_timeout())),
        };

        let applier = Applier::new(self.config.command_timeout(), self.insertion_policy);
        let matcher = Matcher::new(Arc::clone(&self.catalog));

        let engine = Arc::new(Engine {
            config: self.config,
            matcher,
            store,
            applier,
            validator: self.validator,
            broker,
            deploy_backend: self.deploy_backend,
            strategy: self.strategy,
            audit,
            registry,
        });

        let (tx, rx) = mpsc::channel(256);
        let (results_tx, _) = broadcast::channel(256);
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&engine),
            rx,
            results_tx.clone(),
        ));

        Ok(Remediator {
            engine,
            tx,
            results_tx,
            dispatcher,
        })
    }
}

/// Handle to a running remediation pipeline.
pub struct Remediator {
    engine: Arc<Engine>,
    tx: mpsc::Sender<DetectedError>,
    results_tx: broadcast::Sender<RemediationResult>,
    dispatcher: JoinHandle<()>,
}

impl Remediator {
    /// Ingest one detected error. This is the single ingestion call; the
    /// pipeline never polls for input itself. Returns false once the
    /// pipeline has shut down.
    pub async fn submit(&self, error: DetectedError) -> bool {
        self.tx.send(error).await.is_ok()
    }

    /// Subscribe to terminal results.
    pub fn subscribe_results(&self) -> broadcast::Receiver<RemediationResult> {
        self.results_tx.subscribe()
    }

    /// Subscribe to the live audit stream.
    pub fn subscribe_audit(&self) -> broadcast::Receiver<remedy_types::AuditEvent> {
        self.engine.audit.subscribe()
    }

    /// Full audit history recorded by this instance, in order.
    pub async fn audit_events(&self) -> Vec<remedy_types::AuditEvent> {
        self.engine.audit.events().await
    }

    /// Request cancellation of the in-flight attempt for an error id.
    /// Honored at the attempt's next state boundary; anything already
    /// mutated is rolled back.
    pub async fn cancel(&self, error_id: &str) -> bool {
        self.engine.registry.cancel(error_id).await
    }

    /// The catalog this pipeline matches against (runtime-mutable).
    pub fn catalog(&self) -> &Arc<FixCatalog> {
        self.engine.matcher.catalog()
    }

    /// Close ingestion and wait for in-flight attempts to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(err) = self.dispatcher.await {
            tracing::warn!(error = %err, "dispatcher task ended abnormally");
        }
    }
}

async fn dispatch_loop(
    engine: Arc<Engine>,
    mut rx: mpsc::Receiver<DetectedError>,
    results_tx: broadcast::Sender<RemediationResult>,
) {
    let pool = Arc::new(Semaphore::new(engine.config.max_concurrent_attempts));
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while let Some(error) = rx.recv().await {
        workers.retain(|w| !w.is_finished());

        match engine
            .registry
            .admit(&error.id, engine.config.retry_ceiling)
            .await
        {
            Admission::DuplicateOf { attempt_id } => {
                tracing::info!(
                    error.id = %error.id,
                    attempt.id = %attempt_id,
                    "duplicate detection ignored"
                );
                metrics::increment_counter!("remediator_duplicates_total");
                engine
                    .audit
                    .record(
                        &attempt_id,
                        RemediationState::Detected,
                        RemediationState::Detected,
                        format!("duplicate-ignored: {}", error.id),
                    )
                    .await;
            }
            Admission::RetriesExhausted { used } => {
                tracing::warn!(
                    error.id = %error.id,
                    attempts_used = used,
                    "retry ceiling reached; not attempting"
                );
                metrics::increment_counter!("remediator_retries_exhausted_total");
            }
            Admission::Begin {
                attempt_id,
                abort_rx,
            } => {
                // Bounded pool: queue here until a permit frees up.
                let permit = Arc::clone(&pool)
                    .acquire_owned()
                    .await
                    .expect("pool semaphore never closed");
                let engine = Arc::clone(&engine);
                let results_tx = results_tx.clone();

                workers.push(tokio::spawn(async move {
                    let result =
                        pipeline::run_attempt(&engine, attempt_id, &error, abort_rx).await;

                    metrics::increment_counter!(
                        "remediator_attempts_total",
                        "disposition" => disposition_label(result.disposition)
                    );

                    engine
                        .registry
                        .finish(AttemptSnapshot {
                            attempt_id: result.attempt_id.clone(),
                            error_id: result.error_id.clone(),
                            disposition: result.disposition,
                            reason: result.reason,
                            tries: result.candidates_tried.max(1),
                            started_at: result.started_at,
                            ended_at: result.ended_at,
                        })
                        .await;

                    if result.disposition == Disposition::Succeeded {
                        let active = engine.registry.active_attempt_ids().await;
                        if let Err(err) = engine
                            .store
                            .prune(engine.config.backup_retention, &active)
                            .await
                        {
                            tracing::warn!(error = %err, "backup prune failed");
                        }
                    }

                    let _ = results_tx.send(result);
                    drop(permit);
                }));
            }
        }
    }

    // Ingestion closed: drain the in-flight workers.
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::warn!(error = %err, "attempt task ended abnormally");
        }
    }
    tracing::debug!("dispatcher stopped at {}", Utc::now());
}

fn disposition_label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Succeeded => "succeeded",
        Disposition::Failed => "failed",
        Disposition::RolledBack => "rolled_back",
        Disposition::ManualInterventionRequired => "manual_intervention_required",
    }
}
