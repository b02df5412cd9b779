//! Final hop of a magic-link redemption
//!
//! [`PlainRedirector`] answers with a 303 to the caller's URL carrying the
//! JWT. [`RecaptchaRedirector`] first serves an interstitial page running
//! reCAPTCHA v3 and only redirects once the form it posts back verifies.
//!
//! The interstitial carries the JWT and the redirect target in an encrypted
//! `state` field. The page never exposes the token, and the POST handler
//! only accepts state this process sealed.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

use crate::config::RecaptchaConfig;
use crate::services::crypto::{AtRestCipher, KEY_SIZE};
use crate::utils::html::escape_html;
use crate::utils::{AppError, AppResult};

/// Outbound timeout for the verification call when the request has no deadline
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to finish a redemption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectArgs {
    pub jwt: String,
    pub redirect_url: String,
    pub redirect_query_key: String,
}

/// Form posted back by the interstitial page
#[derive(Debug, Clone, Deserialize)]
pub struct InterstitialForm {
    pub state: String,
    #[serde(rename = "g-recaptcha-response", default)]
    pub token: Option<String>,
    #[serde(default)]
    pub button_bypass: Option<String>,
}

#[async_trait]
pub trait Redirector: Send + Sync {
    /// Respond to the GET that consumed the link
    async fn redirect(&self, args: RedirectArgs) -> AppResult<Response>;

    /// Respond to the interstitial form POST
    async fn complete(&self, _form: InterstitialForm, _deadline: Option<Instant>) -> AppResult<Response> {
        Err(AppError::NotFound("No interstitial is configured".to_string()))
    }
}

/// Append the JWT to the caller's URL
pub fn redirect_target(args: &RedirectArgs) -> AppResult<Url> {
    let mut url = Url::parse(&args.redirect_url)
        .map_err(|e| AppError::Internal(format!("Stored redirect URL is invalid: {e}")))?;
    url.query_pairs_mut()
        .append_pair(&args.redirect_query_key, &args.jwt);
    Ok(url)
}

pub fn see_other(url: &Url) -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, url.as_str().to_string())]).into_response()
}

/// Plain 303 redirect
#[derive(Debug, Default, Clone)]
pub struct PlainRedirector;

#[async_trait]
impl Redirector for PlainRedirector {
    async fn redirect(&self, args: RedirectArgs) -> AppResult<Response> {
        Ok(see_other(&redirect_target(&args)?))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedState {
    #[serde(flatten)]
    args: RedirectArgs,
    exp: i64,
}

/// Response of the reCAPTCHA `siteverify` endpoint
#[derive(Debug, Default, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub apk_package_name: Option<String>,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
}

/// reCAPTCHA v3 interstitial
pub struct RecaptchaRedirector {
    config: RecaptchaConfig,
    client: reqwest::Client,
    state_cipher: AtRestCipher,
}

impl RecaptchaRedirector {
    pub fn new(config: RecaptchaConfig) -> anyhow::Result<Self> {
        // A configured key of any length is stretched to an AES-256 key
        let key: [u8; KEY_SIZE] = match config.state_key.as_deref() {
            Some(key) if !key.is_empty() => Sha256::digest(key.as_bytes()).into(),
            _ => {
                let mut key = [0u8; KEY_SIZE];
                OsRng.fill_bytes(&mut key);
                key
            }
        };
        let state_cipher = AtRestCipher::new(&key)?;

        let client = reqwest::Client::builder().timeout(VERIFY_TIMEOUT).build()?;

        Ok(Self {
            config,
            client,
            state_cipher,
        })
    }

    fn seal_state(&self, args: RedirectArgs) -> AppResult<String> {
        let lifetime = i64::try_from(self.config.state_lifetime_secs).unwrap_or(i64::MAX);
        let state = SealedState {
            args,
            exp: Utc::now().timestamp().saturating_add(lifetime),
        };
        let sealed = self.state_cipher.seal(&serde_json::to_vec(&state)?)?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn open_state(&self, state: &str) -> AppResult<RedirectArgs> {
        let invalid = || AppError::BadRequest("Invalid or expired state".to_string());

        let sealed = URL_SAFE_NO_PAD.decode(state).map_err(|_| invalid())?;
        let json = self.state_cipher.open(&sealed).map_err(|_| invalid())?;
        let state: SealedState = serde_json::from_slice(&json).map_err(|_| invalid())?;
        if state.exp < Utc::now().timestamp() {
            return Err(invalid());
        }
        Ok(state.args)
    }

    fn render_page(&self, state: &str) -> String {
        let site_key = escape_html(&self.config.site_key);
        let state = escape_html(state);
        let bypass = if self.config.button_bypass {
            r#"<button type="submit" name="button_bypass" value="1">Continue</button>"#
        } else {
            ""
        };

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="robots" content="noindex">
<title>Continue</title>
<script src="https://www.google.com/recaptcha/api.js?render={site_key}"></script>
</head>
<body>
{instructions}
<form id="continue" method="POST">
<input type="hidden" name="state" value="{state}">
<input type="hidden" id="g-recaptcha-response" name="g-recaptcha-response" value="">
{bypass}
</form>
<script>
grecaptcha.ready(function () {{
  grecaptcha.execute("{site_key}", {{action: "redirect"}}).then(function (token) {{
    document.getElementById("g-recaptcha-response").value = token;
    document.getElementById("continue").submit();
  }});
}});
</script>
</body>
</html>
"#,
            instructions = self.config.instructions_html,
        )
    }

    async fn verify(&self, token: &str, deadline: Option<Instant>) -> AppResult<VerifyResponse> {
        let body = format!(
            "secret={}&response={}",
            urlencoding::encode(&self.config.secret_key),
            urlencoding::encode(token)
        );
        let request = self
            .client
            .post(&self.config.verify_url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send();

        let response = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, request)
                .await
                .map_err(|_| AppError::Provider("reCAPTCHA verification timed out".to_string()))?,
            None => request.await,
        }
        .map_err(|e| AppError::Provider(format!("reCAPTCHA verification failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "reCAPTCHA verification returned {}",
                response.status()
            )));
        }

        response
            .json::<VerifyResponse>()
            .await
            .map_err(|e| AppError::Provider(format!("Invalid reCAPTCHA response: {e}")))
    }

    /// Apply the score threshold and allow-lists
    pub fn check(&self, result: &VerifyResponse) -> Result<(), String> {
        if !result.success {
            return Err("verification unsuccessful".to_string());
        }
        if !result.error_codes.is_empty() {
            return Err(format!("error codes: {}", result.error_codes.join(", ")));
        }

        let score = result.score.unwrap_or(0.0);
        if score < self.config.min_score {
            return Err(format!("score {score} below {}", self.config.min_score));
        }

        allowed("hostname", &self.config.hostnames, result.hostname.as_deref())?;
        allowed("action", &self.config.actions, result.action.as_deref())?;
        allowed(
            "apk_package_name",
            &self.config.apk_package_names,
            result.apk_package_name.as_deref(),
        )?;
        Ok(())
    }
}

fn allowed(field: &str, list: &[String], value: Option<&str>) -> Result<(), String> {
    if list.is_empty() {
        return Ok(());
    }
    match value {
        Some(value) if list.iter().any(|entry| entry == value) => Ok(()),
        other => Err(format!("{field} {other:?} not allowed")),
    }
}

#[async_trait]
impl Redirector for RecaptchaRedirector {
    async fn redirect(&self, args: RedirectArgs) -> AppResult<Response> {
        let state = self.seal_state(args)?;
        Ok(Html(self.render_page(&state)).into_response())
    }

    async fn complete(&self, form: InterstitialForm, deadline: Option<Instant>) -> AppResult<Response> {
        let args = self.open_state(&form.state)?;

        if self.config.button_bypass && form.button_bypass.is_some() {
            info!("reCAPTCHA bypassed by button");
            return Ok(see_other(&redirect_target(&args)?));
        }

        let token = form
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing reCAPTCHA token".to_string()))?;

        let result = self.verify(&token, deadline).await?;
        if let Err(reason) = self.check(&result) {
            warn!(reason = %reason, "reCAPTCHA check failed");
            return Err(AppError::Forbidden("reCAPTCHA check failed".to_string()));
        }

        Ok(see_other(&redirect_target(&args)?))
    }
}
