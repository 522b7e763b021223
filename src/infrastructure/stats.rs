//! Request statistics shared by every request task.

use axum::http::StatusCode;
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counters {
    request_count: u64,
    status_counts: BTreeMap<String, u64>,
}

/// Thread-safe request counters.
///
/// The map is only reachable through [`StatsCollector::record_completion`];
/// readers get an owned [`StatsSnapshot`].
#[derive(Debug)]
pub struct StatsCollector {
    started: Instant,
    counters: RwLock<Counters>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: RwLock::new(Counters::default()),
        }
    }

    /// Count one finished request under its status reason phrase.
    pub fn record_completion(&self, status: u16) {
        let key = status_text(status);
        let mut counters = self.counters.write();
        counters.request_count += 1;
        *counters.status_counts.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.read();
        StatsSnapshot {
            uptime: self.started.elapsed(),
            request_count: counters.request_count,
            status_counts: counters.status_counts.clone(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn status_text(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown")
}

fn serialize_debug_duration<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{:?}", d))
}

/// Point-in-time copy of the counters, as served by `/healthcheck`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    #[serde(serialize_with = "serialize_debug_duration")]
    pub uptime: Duration,
    #[serde(rename = "requestCount")]
    pub request_count: u64,
    #[serde(rename = "statuses")]
    pub status_counts: BTreeMap<String, u64>,
}
