//! Adapters Layer
//!
//! Inbound adapters drive the application (HTTP); outbound adapters are
//! driven by it (SQLite, process memory).

pub mod inbound;
pub mod outbound;
