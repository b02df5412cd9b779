//! Middleware components
//!
//! This module contains middleware for:
//! - Request UUIDs, deadlines and tracing spans
//! - The per-request database transaction
//! - Authentication (API key) and the admin gate
//! - Rate limiting

pub mod auth;
pub mod rate_limit;
pub mod request_context;
pub mod transaction;

pub use auth::{admin_middleware, authn_middleware, API_KEY_HEADER};
pub use rate_limit::{rate_limit_middleware, spawn_rate_limit_cleanup, RateLimitState};
pub use request_context::{
    make_request_span, request_uuid_middleware, timeout_middleware, RequestDeadline, RequestUuid,
};
pub use transaction::{transaction_middleware, RequestTx};
