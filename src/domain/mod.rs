//! Domain Layer
//!
//! Health verdicts, health records, user accounts and the outbound ports
//! the rest of the service implements. No I/O lives here.

pub mod entities;
pub mod ports;
pub mod value_objects;

pub use entities::{HealthCheck, HealthResponse, NewUser, ProbeTimer, User};
pub use value_objects::HealthStatus;
