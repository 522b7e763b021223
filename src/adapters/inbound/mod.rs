mod api_server;

pub use api_server::{router, status_code_for, ApiState, Envelope, RegisterUserRequest};
