//! Application Layer
//!
//! Use cases built on the domain ports.

pub mod health_service;
pub mod user_service;

pub use health_service::{
    CheckerRegistry, DuplicateChecker, HealthAggregator, LivenessReport, ReadinessReport,
};
pub use user_service::{UserService, UserServiceError};
