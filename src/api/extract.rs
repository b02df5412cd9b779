//! Request extractors

use axum::extract::FromRequest;

use crate::utils::AppError;

/// `axum::Json` whose rejections render the standard error body
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);
