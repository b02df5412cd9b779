//! Shared utilities

pub mod error;
pub mod html;
pub mod validation;

pub use error::{AppError, AppResult, ErrorResponse};
