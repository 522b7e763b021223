//! Infrastructure Layer
//!
//! Connection management, request statistics and lifecycle control.

pub mod backoff_connector;
pub mod connection_pool;
pub mod lifecycle;
pub mod shutdown;
pub mod stats;

pub use backoff_connector::{
    BackoffConnector, ConnectionConfig, DependencyUnavailable, Sleeper, TokioSleeper,
};
pub use connection_pool::{
    ConnectionHandle, PoolError, PoolLimits, PoolStats, PoolTuning, PooledGuard,
};
pub use lifecycle::{LifecycleOrchestrator, LifecyclePhase, ShutdownOutcome};
pub use shutdown::{termination_signal, RequestGuard, ShutdownController, ShutdownTrigger};
pub use stats::{StatsCollector, StatsSnapshot};
