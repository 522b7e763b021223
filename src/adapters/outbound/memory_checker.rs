//! Memory health probe
//!
//! Compares the process resident set size against a configured limit.

use crate::domain::entities::{HealthCheck, ProbeTimer};
use crate::domain::ports::HealthChecker;
use crate::domain::value_objects::HealthStatus;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

const MIB: u64 = 1024 * 1024;

/// Usage at or above this share of the limit is degraded.
const DEGRADED_PERCENT: u64 = 80;

type ResidentProbe = Arc<dyn Fn() -> Option<u64> + Send + Sync>;

pub struct MemoryChecker {
    limit_bytes: u64,
    probe: ResidentProbe,
}

impl MemoryChecker {
    /// Checker over this process's resident memory.
    pub fn new(limit_mb: u64) -> Self {
        Self::with_probe(limit_mb, resident_bytes)
    }

    /// Checker over a custom resident-bytes source.
    pub fn with_probe<F>(limit_mb: u64, probe: F) -> Self
    where
        F: Fn() -> Option<u64> + Send + Sync + 'static,
    {
        Self {
            limit_bytes: limit_mb.saturating_mul(MIB),
            probe: Arc::new(probe),
        }
    }

    fn classify(&self, used: u64) -> HealthStatus {
        if used > self.limit_bytes {
            HealthStatus::Unhealthy
        } else if used.saturating_mul(100) >= self.limit_bytes.saturating_mul(DEGRADED_PERCENT) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[async_trait]
impl HealthChecker for MemoryChecker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check(&self, _deadline: Instant) -> HealthCheck {
        let timer = ProbeTimer::start(self.name());

        let Some(used) = (self.probe)() else {
            return timer.finish(
                HealthStatus::Healthy,
                "Memory usage is not measurable on this platform",
            );
        };

        let status = self.classify(used);
        let usage = format!(
            "{} MiB of {} MiB",
            used / MIB,
            self.limit_bytes / MIB
        );
        let message = match status {
            HealthStatus::Healthy => format!("Memory usage is within acceptable limits ({usage})"),
            HealthStatus::Degraded => format!("Memory usage is close to the limit ({usage})"),
            HealthStatus::Unhealthy => format!("Memory usage exceeds the limit ({usage})"),
        };
        timer.finish(status, message)
    }
}

/// Resident set size from `/proc/self/status`, where available.
pub fn resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb * 1024)
}
