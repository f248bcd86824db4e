// remedy-types-rs/src/config.rs
// Environment-driven configuration for the remediation pipeline.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the remediation pipeline.
///
/// All knobs have safe defaults; `from_env` never panics and falls back
/// to the default on any unset or unparseable variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediatorConfig {
    /// Maximum in-flight remediation attempts system-wide. Additional
    /// detections queue rather than spawn unbounded work.
    pub max_concurrent_attempts: usize,
    /// Automatic-attempt ceiling per error id. Exceeding it forces
    /// disposition `failed` with no further automatic attempts.
    pub retry_ceiling: u32,
    /// On failure, re-enter matching with the next-ranked candidate
    /// while retry budget remains.
    pub try_next_candidate: bool,
    /// Medium-risk fixes require approval when set. High risk always
    /// requires approval; low risk never does.
    pub require_approval: bool,
    /// Bound on `run_command` actions, seconds.
    pub command_timeout_secs: u64,
    /// Bound on one validation run, seconds.
    pub validation_timeout_secs: u64,
    /// Bound on waiting for an out-of-band approval, seconds.
    pub approval_timeout_secs: u64,
    /// Pause between staged-deployment stages, seconds.
    pub deploy_stage_pause_secs: u64,
    /// Canary soak period, seconds.
    pub canary_soak_secs: u64,
    /// Backup retention: keep the N most recent backups.
    pub backup_retention: usize,
    /// Directory for durable state (backup journal, attempt journal,
    /// audit log).
    pub data_dir: PathBuf,
}

impl Default for RemediatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_attempts: 5,
            retry_ceiling: 3,
            try_next_candidate: true,
            require_approval: false,
            command_timeout_secs: 120,
            validation_timeout_secs: 60,
            approval_timeout_secs: 300,
            deploy_stage_pause_secs: 30,
            canary_soak_secs: 60,
            backup_retention: 100,
            data_dir: PathBuf::from("data/remediator"),
        }
    }
}

impl RemediatorConfig {
    /// Construct configuration from environment variables, falling back
    /// to defaults for anything unset or malformed.
    ///
    /// Variables: REMEDIATOR_MAX_CONCURRENT, REMEDIATOR_RETRY_CEILING,
    /// REMEDIATOR_TRY_NEXT_CANDIDATE, REMEDIATOR_REQUIRE_APPROVAL,
    /// REMEDIATOR_COMMAND_TIMEOUT_SECS, REMEDIATOR_VALIDATION_TIMEOUT_SECS,
    /// REMEDIATOR_APPROVAL_TIMEOUT_SECS, REMEDIATOR_STAGE_PAUSE_SECS,
    /// REMEDIATOR_CANARY_SOAK_SECS, REMEDIATOR_BACKUP_RETENTION,
    /// REMEDIATOR_DATA_DIR.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_attempts: parse_var(
                "REMEDIATOR_MAX_CONCURRENT",
                defaults.max_concurrent_attempts,
            ),
            retry_ceiling: parse_var("REMEDIATOR_RETRY_CEILING", defaults.retry_ceiling),
            try_next_candidate: parse_bool_var(
                "REMEDIATOR_TRY_NEXT_CANDIDATE",
                defaults.try_next_candidate,
            ),
            require_approval: parse_bool_var(
                "REMEDIATOR_REQUIRE_APPROVAL",
                defaults.require_approval,
            ),
            command_timeout_secs: parse_var(
                "REMEDIATOR_COMMAND_TIMEOUT_SECS",
                defaults.command_timeout_secs,
            ),
            validation_timeout_secs: parse_var(
                "REMEDIATOR_VALIDATION_TIMEOUT_SECS",
                defaults.validation_timeout_secs,
            ),
            approval_timeout_secs: parse_var(
                "REMEDIATOR_APPROVAL_TIMEOUT_SECS",
                defaults.approval_timeout_secs,
            ),
            deploy_stage_pause_secs: parse_var(
                "REMEDIATOR_STAGE_PAUSE_SECS",
                defaults.deploy_stage_pause_secs,
            ),
            canary_soak_secs: parse_var(
                "REMEDIATOR_CANARY_SOAK_SECS",
                defaults.canary_soak_secs,
            ),
            backup_retention: parse_var(
                "REMEDIATOR_BACKUP_RETENTION",
                defaults.backup_retention,
            ),
            data_dir: env::var("REMEDIATOR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn deploy_stage_pause(&self) -> Duration {
        Duration::from_secs(self.deploy_stage_pause_secs)
    }

    pub fn canary_soak(&self) -> Duration {
        Duration::from_secs(self.canary_soak_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(val) => val.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(val) => {
            let v = val.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => default,
    }
}
