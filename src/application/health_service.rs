//! Health Service - Composite health use cases
//!
//! Runs the registered probes and folds their verdicts into the
//! liveness, readiness and full-health views served over HTTP.

use crate::domain::entities::{HealthCheck, HealthResponse, ProbeTimer};
use crate::domain::ports::{CheckerFault, HealthChecker};
use crate::domain::value_objects::HealthStatus;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Registration failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("health checker '{0}' is already registered")]
pub struct DuplicateChecker(pub String);

/// Ordered set of named health probes.
///
/// Built during boot, read-only once handed to the aggregator.
#[derive(Default)]
pub struct CheckerRegistry {
    checkers: Vec<Arc<dyn HealthChecker>>,
    /// Index of the probe readiness relies on
    dependency: Option<usize>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a probe. Names must be unique.
    pub fn register(&mut self, checker: Arc<dyn HealthChecker>) -> Result<&mut Self, DuplicateChecker> {
        if self.checkers.iter().any(|c| c.name() == checker.name()) {
            return Err(DuplicateChecker(checker.name().to_string()));
        }
        tracing::debug!(checker = checker.name(), "health checker registered");
        self.checkers.push(checker);
        Ok(self)
    }

    /// Append a probe and make it the one readiness consults.
    pub fn register_dependency(
        &mut self,
        checker: Arc<dyn HealthChecker>,
    ) -> Result<&mut Self, DuplicateChecker> {
        self.register(checker)?;
        self.dependency = Some(self.checkers.len() - 1);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Probe names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.checkers.iter().map(|c| c.name()).collect()
    }

    pub fn dependency(&self) -> Option<&Arc<dyn HealthChecker>> {
        self.dependency.and_then(|i| self.checkers.get(i))
    }
}

/// `GET /health/live` body.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub status: &'static str,
    pub uptime: String,
    pub service: String,
}

/// `GET /health/ready` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessReport {
    pub fn ready() -> Self {
        Self {
            status: "ready",
            reason: None,
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            status: "not ready",
            reason: Some(reason.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.reason.is_none()
    }
}

/// Runs every registered probe and builds the composite views.
pub struct HealthAggregator {
    registry: Arc<CheckerRegistry>,
    started: Instant,
    service: String,
    version: String,
}

impl HealthAggregator {
    pub fn new(registry: CheckerRegistry, service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(registry),
            started: Instant::now(),
            service: service.into(),
            version: version.into(),
        }
    }

    pub fn registry(&self) -> &CheckerRegistry {
        &self.registry
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Run every probe concurrently under one shared deadline.
    ///
    /// Probes are isolated: a panic or deadline overrun in one becomes an
    /// unhealthy entry and the others still report.
    pub async fn run_all(&self, deadline: tokio::time::Instant) -> HealthResponse {
        let timestamp = Utc::now();
        let probes = self
            .registry
            .checkers
            .iter()
            .map(|checker| run_isolated(checker.clone(), deadline));
        let checks = futures::future::join_all(probes).await;

        let status = HealthStatus::composite(checks.iter().map(|c| c.status));
        if status != HealthStatus::Healthy {
            let failing: Vec<&str> = checks
                .iter()
                .filter(|c| c.status != HealthStatus::Healthy)
                .map(|c| c.name.as_str())
                .collect();
            tracing::warn!(%status, ?failing, "service health is not healthy");
        }

        HealthResponse {
            status,
            timestamp,
            uptime: self.started.elapsed(),
            checks,
            version: self.version.clone(),
            service: self.service.clone(),
        }
    }

    /// Alive as long as the process answers. Invokes no probe.
    pub fn liveness(&self) -> LivenessReport {
        LivenessReport {
            status: "alive",
            uptime: format!("{:?}", self.started.elapsed()),
            service: self.service.clone(),
        }
    }

    /// Ready unless the dependency probe reports unhealthy.
    ///
    /// With no dependency probe registered there is nothing to wait for.
    pub async fn readiness(&self, deadline: tokio::time::Instant) -> ReadinessReport {
        let Some(checker) = self.registry.dependency() else {
            return ReadinessReport::ready();
        };

        let check = run_isolated(checker.clone(), deadline).await;
        if check.status.is_unhealthy() {
            tracing::warn!(checker = %check.name, message = %check.message, "not ready");
            ReadinessReport::not_ready(format!("{} not accessible", check.name))
        } else {
            ReadinessReport::ready()
        }
    }
}

async fn run_isolated(checker: Arc<dyn HealthChecker>, deadline: tokio::time::Instant) -> HealthCheck {
    let timer = ProbeTimer::start(checker.name());
    let probe = AssertUnwindSafe(checker.check(deadline)).catch_unwind();

    let fault = match tokio::time::timeout_at(deadline, probe).await {
        Ok(Ok(check)) => return check,
        Ok(Err(panic)) => CheckerFault::Panicked(panic_message(panic.as_ref())),
        Err(_) => CheckerFault::DeadlineExceeded,
    };
    tracing::error!(checker = checker.name(), error = %fault, "health checker fault");
    timer.fail(fault.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
