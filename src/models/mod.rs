//! Data models

mod email;
mod jwk;
mod jwt;
mod magic_link;
mod otp;
mod service_account;
mod setup;

pub use email::*;
pub use jwk::*;
pub use jwt::*;
pub use magic_link::*;
pub use otp::*;
pub use service_account::*;
pub use setup::*;

use serde::Serialize;
use uuid::Uuid;

use crate::middleware::request_context::current_request_uuid;

/// Metadata attached to every response body
#[derive(Debug, Clone, Serialize)]
pub struct RequestMetadata {
    pub uuid: Uuid,
}

impl RequestMetadata {
    /// Metadata for the request currently being served
    ///
    /// Falls back to the nil UUID outside a request scope.
    pub fn current() -> Self {
        Self {
            uuid: current_request_uuid().unwrap_or_else(Uuid::nil),
        }
    }
}
