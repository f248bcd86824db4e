// deploy-driver-rs/src/lib.rs
// Rolls a validated fix out using one of several strategies and watches
// for post-deploy health signals.
//
// The driver is strategy logic only; the mechanics of building, shifting
// traffic, and probing health live behind the DeployBackend trait so the
// same strategies work against containers, process managers, or test
// fakes. Every strategy reports the same uniform DeployReport shape; the
// orchestrator maps an unhealthy report to DeployFailed and rolls the
// attempt back.

use std::time::Duration;

use async_trait::async_trait;

use remedy_types::DeployReport;

/// Rollout strategy, selectable per deployment.
#[derive(Debug, Clone)]
pub enum DeployStrategy {
    /// build -> deploy -> health-check in one step.
    Immediate,
    /// Deploy to an increasing traffic percentage with a pause and a
    /// health check between stages.
    Staged { stages: Vec<u8>, pause: Duration },
    /// Deploy to a single instance, soak, then promote to full rollout.
    Canary { soak: Duration },
}

impl DeployStrategy {
    /// Default staged rollout: 10% -> 50% -> 100%.
    pub fn staged_default(pause: Duration) -> Self {
        DeployStrategy::Staged {
            stages: vec![10, 50, 100],
            pause,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeployStrategy::Immediate => "immediate",
            DeployStrategy::Staged { .. } => "staged",
            DeployStrategy::Canary { .. } => "canary",
        }
    }
}

/// Deployment mechanics behind the strategy logic.
///
/// `shift_traffic(100)` means full rollout; `shift_traffic(0)` with
/// `canary_instance` semantics is expressed by the driver calling
/// `shift_traffic(1)` for the single-instance canary step.
#[async_trait]
pub trait DeployBackend: Send + Sync {
    async fn build(&self) -> Result<(), String>;
    async fn shift_traffic(&self, percent: u8) -> Result<(), String>;
    async fn health_check(&self) -> Result<bool, String>;
    /// Undo whatever traffic has been shifted so far.
    async fn rollback_traffic(&self) -> Result<(), String>;
}

/// Errors from the driver itself. Backend failures are folded into the
/// uniform report (unhealthy, rolled back) rather than surfaced here.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("traffic rollback failed: {0}")]
    RollbackFailed(String),
}

/// Drives one deployment to completion under the chosen strategy.
pub struct DeployDriver<'a> {
    backend: &'a dyn DeployBackend,
}

impl<'a> DeployDriver<'a> {
    pub fn new(backend: &'a dyn DeployBackend) -> Self {
        Self { backend }
    }

    /// Execute the strategy. The returned report is uniform across
    /// strategies; `healthy: false` means the rollout halted and any
    /// already-shifted traffic was rolled back.
    #[tracing::instrument(name = "deploy", skip(self, strategy), fields(strategy = strategy.name()))]
    pub async fn execute(&self, strategy: &DeployStrategy) -> Result<DeployReport, DeployError> {
        let result = match strategy {
            DeployStrategy::Immediate => self.run_immediate().await,
            DeployStrategy::Staged { stages, pause } => self.run_staged(stages, *pause).await,
            DeployStrategy::Canary { soak } => self.run_canary(*soak).await,
        };

        match result {
            Ok(stages_completed) => {
                metrics::increment_counter!(
                    "deploy_driver_rollouts_total",
                    "strategy" => strategy.name(),
                    "outcome" => "healthy"
                );
                Ok(DeployReport {
                    strategy: strategy.name().to_string(),
                    stages_completed,
                    healthy: true,
                    rolled_back: false,
                })
            }
            Err(Halt {
                stages_completed,
                detail,
            }) => {
                tracing::warn!(
                    stages_completed,
                    detail = %detail,
                    "rollout halted; rolling back shifted traffic"
                );
                metrics::increment_counter!(
                    "deploy_driver_rollouts_total",
                    "strategy" => strategy.name(),
                    "outcome" => "rolled_back"
                );
                self.backend
                    .rollback_traffic()
                    .await
                    .map_err(DeployError::RollbackFailed)?;
                Ok(DeployReport {
                    strategy: strategy.name().to_string(),
                    stages_completed,
                    healthy: false,
                    rolled_back: true,
                })
            }
        }
    }

    async fn run_immediate(&self) -> Result<u32, Halt> {
        self.backend.build().await.map_err(Halt::at(0))?;
        self.backend.shift_traffic(100).await.map_err(Halt::at(0))?;
        self.check_health(1).await?;
        Ok(1)
    }

    async fn run_staged(&self, stages: &[u8], pause: Duration) -> Result<u32, Halt> {
        self.backend.build().await.map_err(Halt::at(0))?;

        let mut completed = 0;
        for (i, percent) in stages.iter().enumerate() {
            tracing::info!(stage = i + 1, percent, "shifting traffic");
            self.backend
                .shift_traffic(*percent)
                .await
                .map_err(Halt::at(completed))?;
            tokio::time::sleep(pause).await;
            self.check_health(completed + 1).await?;
            completed += 1;
        }
        Ok(completed)
    }

    async fn run_canary(&self, soak: Duration) -> Result<u32, Halt> {
        self.backend.build().await.map_err(Halt::at(0))?;

        // Single-instance canary, observed for the soak period.
        self.backend.shift_traffic(1).await.map_err(Halt::at(0))?;
        tokio::time::sleep(soak).await;
        self.check_health(1).await?;

        // Promote to full rollout.
        self.backend.shift_traffic(100).await.map_err(Halt::at(1))?;
        self.check_health(2).await?;
        Ok(2)
    }

    async fn check_health(&self, stages_completed: u32) -> Result<(), Halt> {
        match self.backend.health_check().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Halt {
                stages_completed,
                detail: "health check reported unhealthy".to_string(),
            }),
            Err(err) => Err(Halt {
                stages_completed,
                detail: format!("health check failed to run: {err}"),
            }),
        }
    }
}

/// Internal halt signal: how far the rollout got and why it stopped.
struct Halt {
    stages_completed: u32,
    detail: String,
}

impl Halt {
    fn at(stages_completed: u32) -> impl FnOnce(String) -> Halt {
        move |detail| Halt {
            stages_completed,
            detail,
        }
    }
}

/// Command-driven backend: each step shells out to a configured command.
///
/// The stage percentage is exported to the command as DEPLOY_PERCENT.
pub struct CommandBackend {
    pub build_command: String,
    pub deploy_command: String,
    pub health_command: String,
    pub rollback_command: String,
    pub step_timeout: Duration,
}

#[async_trait]
impl DeployBackend for CommandBackend {
    async fn build(&self) -> Result<(), String> {
        run_step(&self.build_command, None, self.step_timeout).await
    }

    async fn shift_traffic(&self, percent: u8) -> Result<(), String> {
        run_step(&self.deploy_command, Some(percent), self.step_timeout).await
    }

    async fn health_check(&self) -> Result<bool, String> {
        match run_step(&self.health_command, None, self.step_timeout).await {
            Ok(()) => Ok(true),
            // A failing health command is a negative signal, not a
            // driver error.
            Err(_) => Ok(false),
        }
    }

    async fn rollback_traffic(&self) -> Result<(), String> {
        run_step(&self.rollback_command, None, self.step_timeout).await
    }
}

async fn run_step(command: &str, percent: Option<u8>, limit: Duration) -> Result<(), String> {
    use std::process::Stdio;

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(percent) = percent {
        cmd.env("DEPLOY_PERCENT", percent.to_string());
    }

    let mut child = cmd.spawn().map_err(|e| format!("spawn `{command}`: {e}"))?;
    match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(format!(
            "`{command}` exited with {}",
            status.code().unwrap_or(-1)
        )),
        Ok(Err(err)) => Err(format!("wait for `{command}`: {err}")),
        Err(_) => Err(format!("`{command}` timed out after {}s", limit.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted backend: health answers are consumed in order; calls are
    /// recorded for assertions.
    #[derive(Default)]
    struct ScriptedBackend {
        health_script: Mutex<Vec<bool>>,
        shifts: Mutex<Vec<u8>>,
        rollbacks: AtomicU32,
    }

    impl ScriptedBackend {
        fn with_health(answers: Vec<bool>) -> Self {
            Self {
                health_script: Mutex::new(answers),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl DeployBackend for ScriptedBackend {
        async fn build(&self) -> Result<(), String> {
            Ok(())
        }

        async fn shift_traffic(&self, percent: u8) -> Result<(), String> {
            self.shifts.lock().expect("lock").push(percent);
            Ok(())
        }

        async fn health_check(&self) -> Result<bool, String> {
            let mut script = self.health_script.lock().expect("lock");
            if script.is_empty() {
                Ok(true)
            } else {
                Ok(script.remove(0))
            }
        }

        async fn rollback_traffic(&self) -> Result<(), String> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn immediate_success() {
        let backend = ScriptedBackend::with_health(vec![true]);
        let report = DeployDriver::new(&backend)
            .execute(&DeployStrategy::Immediate)
            .await
            .expect("execute");

        assert!(report.healthy);
        assert!(!report.rolled_back);
        assert_eq!(report.stages_completed, 1);
        assert_eq!(*backend.shifts.lock().expect("lock"), vec![100]);
    }

    #[tokio::test]
    async fn staged_halts_on_failed_stage_and_rolls_back() {
        let backend = ScriptedBackend::with_health(vec![true, false]);
        let strategy = DeployStrategy::Staged {
            stages: vec![10, 50, 100],
            pause: Duration::from_millis(1),
        };
        let report = DeployDriver::new(&backend)
            .execute(&strategy)
            .await
            .expect("execute");

        assert!(!report.healthy);
        assert!(report.rolled_back);
        assert_eq!(report.stages_completed, 1);
        // The third stage never runs.
        assert_eq!(*backend.shifts.lock().expect("lock"), vec![10, 50]);
        assert_eq!(backend.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn staged_full_rollout() {
        let backend = ScriptedBackend::with_health(vec![true, true, true]);
        let strategy = DeployStrategy::staged_default(Duration::from_millis(1));
        let report = DeployDriver::new(&backend)
            .execute(&strategy)
            .await
            .expect("execute");

        assert!(report.healthy);
        assert_eq!(report.stages_completed, 3);
        assert_eq!(*backend.shifts.lock().expect("lock"), vec![10, 50, 100]);
    }

    #[tokio::test]
    async fn canary_promotes_after_healthy_soak() {
        let backend = ScriptedBackend::with_health(vec![true, true]);
        let strategy = DeployStrategy::Canary {
            soak: Duration::from_millis(1),
        };
        let report = DeployDriver::new(&backend)
            .execute(&strategy)
            .await
            .expect("execute");

        assert!(report.healthy);
        assert_eq!(report.stages_completed, 2);
        assert_eq!(*backend.shifts.lock().expect("lock"), vec![1, 100]);
    }

    #[tokio::test]
    async fn canary_rolls_back_on_unhealthy_soak() {
        let backend = ScriptedBackend::with_health(vec![false]);
        let strategy = DeployStrategy::Canary {
            soak: Duration::from_millis(1),
        };
        let report = DeployDriver::new(&backend)
            .execute(&strategy)
            .await
            .expect("execute");

        assert!(!report.healthy);
        assert!(report.rolled_back);
        assert_eq!(*backend.shifts.lock().expect("lock"), vec![1]);
        assert_eq!(backend.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_probe_error_counts_as_unhealthy() {
        struct BrokenHealth;

        #[async_trait]
        impl DeployBackend for BrokenHealth {
            async fn build(&self) -> Result<(), String> {
                Ok(())
            }
            async fn shift_traffic(&self, _percent: u8) -> Result<(), String> {
                Ok(())
            }
            async fn health_check(&self) -> Result<bool, String> {
                Err("probe unreachable".to_string())
            }
            async fn rollback_traffic(&self) -> Result<(), String> {
                Ok(())
            }
        }

        let report = DeployDriver::new(&BrokenHealth)
            .execute(&DeployStrategy::Immediate)
            .await
            .expect("execute");
        assert!(!report.healthy);
        assert!(report.rolled_back);
    }
}
