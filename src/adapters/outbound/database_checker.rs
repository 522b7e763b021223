//! Database health probe.

use crate::domain::entities::{HealthCheck, ProbeTimer};
use crate::domain::ports::HealthChecker;
use crate::domain::value_objects::HealthStatus;
use crate::infrastructure::connection_pool::ConnectionHandle;
use async_trait::async_trait;
use tokio::time::Instant;

/// Pings the pooled connection; any failure is unhealthy.
pub struct DatabaseChecker {
    handle: ConnectionHandle,
}

impl DatabaseChecker {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl HealthChecker for DatabaseChecker {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self, deadline: Instant) -> HealthCheck {
        let timer = ProbeTimer::start(self.name());
        match self.handle.ping(deadline).await {
            Ok(()) => timer.finish(HealthStatus::Healthy, "Database connection is healthy"),
            Err(e) => {
                tracing::warn!(error = %e, "database ping failed");
                timer.fail(e.to_string())
            }
        }
    }
}
