// remediator-rs/src/gates.rs
// Validation and approval gates.
//
// Both gates are small policy layers over injectable collaborators: the
// concrete test runner and the out-of-band approval channel are supplied
// by the embedding system.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use remedy_types::{FixPattern, RiskLevel, ValidationReport};

/// External validation capability: run the suite for `target` and report
/// raw pass/fail counts. The gate normalizes everything else.
#[async_trait]
pub trait ValidationRunner: Send + Sync {
    async fn run(&self, target: &Path) -> Result<ValidationReport, String>;
}

/// Run validation under the configured timeout and normalize the result.
///
/// A tool that cannot run (error, timeout) reports `passed: false` with
/// `total: 0`. That is a hard failure downstream; "no tests ran" is never
/// treated as a pass.
pub async fn validate(
    runner: &dyn ValidationRunner,
    target: &Path,
    limit: Duration,
) -> ValidationReport {
    match tokio::time::timeout(limit, runner.run(target)).await {
        Ok(Ok(report)) => report,
        Ok(Err(detail)) => {
            tracing::warn!(detail = %detail, "validation tool failed to run");
            ValidationReport::tool_unavailable(format!("validation tool error: {detail}"))
        }
        Err(_) => {
            tracing::warn!(timeout_secs = limit.as_secs(), "validation timed out");
            ValidationReport::tool_unavailable(format!(
                "validation timed out after {}s",
                limit.as_secs()
            ))
        }
    }
}

/// Approval policy: high-risk fixes always need approval regardless of
/// configuration, low-risk fixes never do, medium-risk follows the
/// `require_approval` flag.
pub fn needs_approval(risk: RiskLevel, require_approval: bool) -> bool {
    match risk {
        RiskLevel::High => true,
        RiskLevel::Low => false,
        RiskLevel::Medium => require_approval,
    }
}

/// Handle returned when approval is requested: a token tied to the
/// attempt id, valid until `expires_at`.
#[derive(Debug, Clone)]
pub struct ApprovalHandle {
    pub attempt_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalHandle {
    pub fn new(attempt_id: &str, ttl: Duration) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            token: Uuid::new_v4().to_string(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    /// A token is valid only for its own attempt and only before expiry.
    pub fn is_valid_for(&self, attempt_id: &str, token: &str) -> bool {
        self.attempt_id == attempt_id && self.token == token && Utc::now() < self.expires_at
    }
}

/// Decision state of a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// Out-of-band approval capability.
#[async_trait]
pub trait ApprovalBroker: Send + Sync {
    /// Register an approval request and hand back its token.
    async fn request(&self, attempt_id: &str, pattern: &FixPattern) -> ApprovalHandle;

    /// Current decision for an attempt/token pair. Implementations must
    /// report `Denied` for a token that does not match the request.
    async fn check(&self, attempt_id: &str, token: &str) -> ApprovalStatus;
}

/// Fixed-policy broker for unattended pipelines: every request resolves
/// immediately to the configured decision.
pub struct PolicyApprovalBroker {
    grant: bool,
    ttl: Duration,
}

impl PolicyApprovalBroker {
    pub fn new(grant: bool, ttl: Duration) -> Self {
        Self { grant, ttl }
    }
}

#[async_trait]
impl ApprovalBroker for PolicyApprovalBroker {
    async fn request(&self, attempt_id: &str, pattern: &FixPattern) -> ApprovalHandle {
        tracing::info!(
            attempt.id = %attempt_id,
            pattern.id = %pattern.id,
            risk = %pattern.risk,
            grant = self.grant,
            "approval requested (policy broker)"
        );
        ApprovalHandle::new(attempt_id, self.ttl)
    }

    async fn check(&self, _attempt_id: &str, _token: &str) -> ApprovalStatus {
        if self.grant {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        }
    }
}
