//! Integration tests for the magic link server
//!
//! These tests drive the full router, middleware included, against a
//! temporary SQLite database.

mod api_tests;
mod auth_tests;
mod jwks_tests;
mod otp_tests;
mod recaptcha_tests;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;

/// Decode the payload segment of a compact JWT without verifying it
pub fn jwt_payload(token: &str) -> Value {
    let payload = token.split('.').nth(1).expect("token has no payload");
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}

/// Decode the header segment of a compact JWT
pub fn jwt_header(token: &str) -> Value {
    let header = token.split('.').next().unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap()
}
