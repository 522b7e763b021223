mod health_checker;
mod user_repository;

pub use health_checker::{CheckerFault, HealthChecker};
pub use user_repository::{RepositoryError, UserRepository};
