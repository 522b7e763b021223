//! User Service - registration and lookup use cases.

use crate::domain::entities::{NewUser, User};
use crate::domain::ports::{RepositoryError, UserRepository};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("name is required")]
    MissingName,
    #[error("user {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Register a user. Surrounding whitespace is not part of the name.
    pub async fn register_user(&self, name: &str) -> Result<User, UserServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(UserServiceError::MissingName);
        }

        let user = self
            .repo
            .save(NewUser {
                name: name.to_string(),
            })
            .await?;
        tracing::info!(user_id = user.id, "user registered");
        Ok(user)
    }

    pub async fn get_user(&self, id: i64) -> Result<User, UserServiceError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(UserServiceError::NotFound(id))
    }
}
