//! User Repository Port
//!
//! Defines the interface for persisting user accounts.

use crate::domain::entities::{NewUser, User};
use async_trait::async_trait;

/// Storage failure surfaced by a repository implementation.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// Repository for user accounts.
///
/// Outbound port; the application layer never sees the storage engine.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persist a new user and return it with its assigned id.
    async fn save(&self, user: NewUser) -> Result<User, RepositoryError>;

    /// Look up a user by id.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError>;
}
