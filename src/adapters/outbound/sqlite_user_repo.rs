//! SQLite User Repository
//!
//! Implements UserRepository on the shared pooled connection handle.

use crate::domain::entities::{NewUser, User};
use crate::domain::ports::{RepositoryError, UserRepository};
use crate::infrastructure::connection_pool::{ConnectionHandle, PoolError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
)";

impl From<PoolError> for RepositoryError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Query(msg) => RepositoryError::Query(msg),
            other => RepositoryError::Unavailable(other.to_string()),
        }
    }
}

/// SQLite-backed user repository.
#[derive(Clone)]
pub struct SqliteUserRepository {
    handle: ConnectionHandle,
}

impl SqliteUserRepository {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self { handle }
    }

    /// Create the `users` table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        self.handle
            .with_connection(|conn| conn.execute_batch(CREATE_USERS))
            .await?;
        tracing::info!("users schema ready");
        Ok(())
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: parse_timestamp(row, 2)?,
            updated_at: parse_timestamp(row, 3)?,
        })
    }
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn save(&self, user: NewUser) -> Result<User, RepositoryError> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();

        let id = self
            .handle
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO users (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                    params![user.name, stamp],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        // Re-read so the returned timestamps are the stored ones.
        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::Query(format!("user {id} vanished after insert")))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        let user = self
            .handle
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT id, name, created_at, updated_at FROM users
                     WHERE id = ?1 AND deleted_at IS NULL",
                    params![id],
                    Self::row_to_user,
                )
                .optional()
            })
            .await?;
        Ok(user)
    }
}
