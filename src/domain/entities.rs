//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the service domain.
//! Health records are produced fresh on every probe and never mutated.

use crate::domain::value_objects::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::time::{Duration, Instant};

/// Durations go over the wire as integer nanoseconds.
fn serialize_nanos<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    serializer.serialize_u64(nanos)
}

/// Result of one invocation of one health checker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    /// Checker name, unique within a registry
    pub name: String,
    /// Verdict of this probe
    pub status: HealthStatus,
    /// Human-readable detail (error text for unhealthy probes)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Wall-clock time the probe started
    pub last_checked: DateTime<Utc>,
    /// Time consumed by this probe alone
    #[serde(serialize_with = "serialize_nanos")]
    pub duration: Duration,
}

/// Measures a single probe and stamps the resulting [`HealthCheck`].
///
/// Start it before doing any work so `duration` covers the whole probe.
#[derive(Debug)]
pub struct ProbeTimer {
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl ProbeTimer {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Finish the probe with the given verdict.
    pub fn finish(self, status: HealthStatus, message: impl Into<String>) -> HealthCheck {
        HealthCheck {
            name: self.name,
            status,
            message: message.into(),
            last_checked: self.started_at,
            duration: self.started.elapsed(),
        }
    }

    /// Finish the probe as unhealthy, keeping the failure text as message.
    pub fn fail(self, message: impl Into<String>) -> HealthCheck {
        self.finish(HealthStatus::Unhealthy, message)
    }
}

/// Composite health of the whole service at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Composite of all `checks`
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    /// Time since the service started
    #[serde(serialize_with = "serialize_nanos")]
    pub uptime: Duration,
    /// Individual results, in registration order
    pub checks: Vec<HealthCheck>,
    pub version: String,
    pub service: String,
}

/// A registered user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a user.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
}
