//! Backoff Connector
//!
//! Establishes a critical dependency at boot: dial up to `max_retries`
//! times, pausing a fixed `retry_delay` between attempts, and apply the
//! pool limits to whatever handle comes back.

use crate::infrastructure::connection_pool::{PoolLimits, PoolTuning};
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry and pool settings for one connection sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Total dial attempts
    pub max_retries: u32,
    /// Constant pause between attempts
    pub retry_delay: Duration,
    /// Limits applied to the handle on success
    pub limits: PoolLimits,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
            limits: PoolLimits::default(),
        }
    }
}

/// The connector's only suspension point.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Every attempt failed; boot cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{dependency} unavailable after {attempts} attempt(s): {last_error}")]
pub struct DependencyUnavailable {
    pub dependency: String,
    pub attempts: u32,
    pub last_error: String,
}

enum ConnectState<H> {
    Dialing { attempt: u32 },
    Backoff { next_attempt: u32 },
    Connected { handle: H, attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Bounded fixed-delay retry around a dial function.
pub struct BackoffConnector<S = TokioSleeper> {
    dependency: String,
    config: ConnectionConfig,
    sleeper: S,
}

impl BackoffConnector<TokioSleeper> {
    pub fn new(dependency: impl Into<String>, config: ConnectionConfig) -> Self {
        Self::with_sleeper(dependency, config, TokioSleeper)
    }
}

impl<S: Sleeper> BackoffConnector<S> {
    pub fn with_sleeper(dependency: impl Into<String>, config: ConnectionConfig, sleeper: S) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            sleeper,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Attempts made before giving up. Zero retries still dials once.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.max(1)
    }

    /// Dial until success or until the attempts run out.
    pub async fn connect<H, E, F, Fut>(&self, mut dial: F) -> Result<H, DependencyUnavailable>
    where
        H: PoolTuning,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<H, E>>,
    {
        let max_attempts = self.max_attempts();
        let mut last_error = String::new();
        let mut state = ConnectState::Dialing { attempt: 1 };

        loop {
            state = match state {
                ConnectState::Dialing { attempt } => match dial().await {
                    Ok(handle) => ConnectState::Connected { handle, attempt },
                    Err(e) => {
                        last_error = e.to_string();
                        tracing::warn!(
                            dependency = %self.dependency,
                            attempt,
                            max_attempts,
                            error = %last_error,
                            "connection attempt {}/{} failed",
                            attempt,
                            max_attempts
                        );
                        if attempt < max_attempts {
                            ConnectState::Backoff {
                                next_attempt: attempt + 1,
                            }
                        } else {
                            ConnectState::Exhausted { attempts: attempt }
                        }
                    }
                },
                ConnectState::Backoff { next_attempt } => {
                    tracing::info!(
                        dependency = %self.dependency,
                        delay = ?self.config.retry_delay,
                        next_attempt,
                        "retrying connection"
                    );
                    self.sleeper.sleep(self.config.retry_delay).await;
                    ConnectState::Dialing {
                        attempt: next_attempt,
                    }
                }
                ConnectState::Connected { handle, attempt } => {
                    handle.apply_limits(self.config.limits);
                    tracing::info!(
                        dependency = %self.dependency,
                        attempt,
                        max_idle = self.config.limits.max_idle,
                        max_open = self.config.limits.max_open,
                        "connection established"
                    );
                    return Ok(handle);
                }
                ConnectState::Exhausted { attempts } => {
                    tracing::error!(
                        dependency = %self.dependency,
                        attempts,
                        error = %last_error,
                        "giving up on dependency"
                    );
                    return Err(DependencyUnavailable {
                        dependency: self.dependency.clone(),
                        attempts,
                        last_error,
                    });
                }
            };
        }
    }
}
