use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default per-check timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome classification of a health check.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// The check has not run yet.
    Unknown,
    /// The dependency is fully operational.
    Healthy,
    /// The dependency works but with reduced capacity or elevated latency.
    Degraded,
    /// The dependency is unusable.
    Unhealthy,
}

/// Result of one health check execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Classified outcome.
    pub status: HealthStatus,
    /// Cause description for non-healthy outcomes.
    pub message: Option<String>,
    /// When the check finished.
    pub checked_at: DateTime<Utc>,
    /// How long the check took (capped by the timeout).
    pub duration: Duration,
}

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, crate::Result<HealthStatus>> + Send + Sync>;

/// An async probe of one dependency, executed with a timeout.
///
/// The check function reports a [`HealthStatus`]; a returned error or an
/// elapsed timeout is recorded as [`HealthStatus::Unhealthy`] with a message
/// naming the cause.
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    description: String,
    timeout: Duration,
    check: CheckFn,
}

impl HealthCheck {
    /// Creates a check with the [default timeout](DEFAULT_CHECK_TIMEOUT).
    pub fn new<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<HealthStatus>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            timeout: DEFAULT_CHECK_TIMEOUT,
            check: Arc::new(move || Box::pin(check())),
        }
    }

    /// Sets a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Overrides the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The check's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the check once, applying the timeout.
    pub(super) async fn execute(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, (self.check)()).await;
        let duration = started.elapsed();
        let (status, message) = match outcome {
            Ok(Ok(status)) => (status, None),
            Ok(Err(error)) => (
                HealthStatus::Unhealthy,
                Some(format!("check failed: {error}")),
            ),
            Err(_) => (
                HealthStatus::Unhealthy,
                Some(format!("check timed out after {:?}", self.timeout)),
            ),
        };

        HealthCheckResult {
            status,
            message,
            checked_at: Utc::now(),
            duration,
        }
    }
}
