//! Input validation utilities

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;
use validator::ValidationError;

use super::error::{AppError, AppResult};

/// Shortest lifespan accepted for any credential
pub const MIN_LIFESPAN_SECS: u64 = 5;

/// Longest redirect URL accepted, in characters
pub const MAX_URL_CHARS: usize = 2048;

/// Regex for query parameter names the redirect may carry the JWT in
static QUERY_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").expect("static regex"));

/// Resolve a requested lifespan in seconds
///
/// Zero selects `default_secs`; anything else must lie in
/// `[MIN_LIFESPAN_SECS, max_secs]`.
pub fn resolve_lifespan(
    requested_secs: u64,
    default_secs: u64,
    max_secs: u64,
    what: &str,
) -> AppResult<Duration> {
    let secs = if requested_secs == 0 {
        default_secs
    } else {
        requested_secs
    };

    if secs < MIN_LIFESPAN_SECS {
        return Err(AppError::BadRequest(format!(
            "{what} lifespan must be at least {MIN_LIFESPAN_SECS} seconds"
        )));
    }
    if secs > max_secs {
        return Err(AppError::BadRequest(format!(
            "{what} lifespan must be at most {max_secs} seconds"
        )));
    }

    Ok(Duration::from_secs(secs))
}

/// Validate an absolute http(s) URL supplied by a caller
pub fn validate_http_url(raw: &str, field: &str) -> AppResult<Url> {
    if raw.chars().count() > MAX_URL_CHARS {
        return Err(AppError::BadRequest(format!(
            "{field} must be at most {MAX_URL_CHARS} characters"
        )));
    }

    let url = Url::parse(raw)
        .map_err(|e| AppError::BadRequest(format!("{field} is not a valid URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::BadRequest(format!(
            "{field} must use the http or https scheme"
        )));
    }
    if url.host_str().is_none() {
        return Err(AppError::BadRequest(format!("{field} must include a host")));
    }

    Ok(url)
}

/// Validate the query parameter name the JWT is delivered in
pub fn validate_query_key(key: &str) -> AppResult<()> {
    if QUERY_KEY_REGEX.is_match(key) {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "redirectQueryKey must be 1-64 characters of letters, digits, '_', '.' or '-'"
                .to_string(),
        ))
    }
}

/// validator hook: RFC 5322 address
pub fn validate_email_address(address: &str) -> Result<(), ValidationError> {
    address
        .parse::<lettre::Address>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("email").with_message("invalid email address".into()))
}

/// validator hook: optional http(s) URL
pub fn validate_optional_url(raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Ok(());
    }
    validate_http_url(raw, "url")
        .map(|_| ())
        .map_err(|_| ValidationError::new("url").with_message("invalid http(s) URL".into()))
}
