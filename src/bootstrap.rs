//! Boot sequence
//!
//! Everything between a loaded [`Config`] and the first accepted request:
//! connect, prepare the schema, register the probes and build the router.

use crate::adapters::inbound::{router, ApiState};
use crate::adapters::outbound::{DatabaseChecker, MemoryChecker, SqliteUserRepository};
use crate::application::{CheckerRegistry, DuplicateChecker, HealthAggregator, UserService};
use crate::config::Config;
use crate::domain::ports::RepositoryError;
use crate::infrastructure::backoff_connector::{BackoffConnector, DependencyUnavailable};
use crate::infrastructure::connection_pool::ConnectionHandle;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Dependency(#[from] DependencyUnavailable),
    #[error("schema bootstrap failed: {0}")]
    Schema(#[from] RepositoryError),
    #[error(transparent)]
    Registry(#[from] DuplicateChecker),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A booted service, ready to be handed to the lifecycle orchestrator.
pub struct Service {
    pub handle: ConnectionHandle,
    pub router: Router,
}

/// Connect to the database (with retries), then build the service on it.
pub async fn boot(config: &Config) -> Result<Service, BootError> {
    let connector = BackoffConnector::new("database", config.connection_config());
    let path = config.db_path.clone();
    let handle = connector
        .connect(|| ConnectionHandle::open(path.clone()))
        .await?;

    build(config, handle).await
}

/// Build the service on an established connection handle.
pub async fn build(config: &Config, handle: ConnectionHandle) -> Result<Service, BootError> {
    let users = SqliteUserRepository::new(handle.clone());
    users.migrate().await?;

    let mut registry = CheckerRegistry::new();
    registry
        .register_dependency(Arc::new(DatabaseChecker::new(handle.clone())))?
        .register(Arc::new(MemoryChecker::new(config.memory_limit_mb)))?;
    tracing::info!(checkers = ?registry.names(), "health checkers registered");

    let health = HealthAggregator::new(registry, &config.service_name, env!("CARGO_PKG_VERSION"));
    let state = ApiState::new(health, UserService::new(Arc::new(users)))
        .with_timeouts(config.health_check_timeout, config.request_timeout);

    Ok(Service {
        handle,
        router: router(state),
    })
}

pub async fn bind(addr: &str) -> Result<TcpListener, BootError> {
    TcpListener::bind(addr).await.map_err(|source| BootError::Bind {
        addr: addr.to_string(),
        source,
    })
}
