//! boiler-api Library
//!
//! Service lifecycle and health orchestration for a small HTTP API,
//! exposed as a library for the binary and the integration tests.

pub mod adapters;
pub mod application;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{CheckerRegistry, HealthAggregator};
pub use config::{load_config, Config};
pub use domain::entities::{HealthCheck, HealthResponse};
pub use domain::ports::HealthChecker;
pub use domain::value_objects::HealthStatus;
pub use infrastructure::{BackoffConnector, ConnectionHandle, LifecycleOrchestrator, ShutdownOutcome};
