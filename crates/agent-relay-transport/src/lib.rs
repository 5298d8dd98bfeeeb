//! HTTP transport for the agent relay.
//!
//! Provides:
//! - Request/response schemas and the event-to-SSE mapping
//! - An expiring in-memory token store
//! - The axum router serving login, chat completions, agents and health

pub mod auth;
pub mod protocol;
pub mod routes;

pub use auth::{Credentials, TokenStore};
pub use protocol::{ChatRequest, LoginRequest, LoginResponse};
pub use routes::{AppState, create_router};
