//! Health Checker Port
//!
//! Defines the capability every health probe provides.
//! The aggregator depends only on this trait, never on concrete probes.

use crate::domain::entities::HealthCheck;
use async_trait::async_trait;
use tokio::time::Instant;

/// A named, independently invocable health probe.
///
/// Implementations must finish by `deadline`: a probe doing network or
/// disk I/O has to abort its call once the deadline passes. Internal
/// failures are reported as an unhealthy [`HealthCheck`], never as a panic.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Stable name of this probe (unique within a registry).
    fn name(&self) -> &str;

    /// Run the probe once.
    async fn check(&self, deadline: Instant) -> HealthCheck;
}

/// Internal failure of a probe, downgraded to an unhealthy entry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckerFault {
    #[error("check did not finish before its deadline")]
    DeadlineExceeded,
    #[error("check panicked: {0}")]
    Panicked(String),
}
