//! Magiclinks Library
//!
//! This crate provides the core functionality of the magic-link server:
//! JWT issuance and validation, magic links, one-time passwords and the
//! managed JWK set they are signed with.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{extract::DefaultBodyLimit, middleware::from_fn, middleware::from_fn_with_state, Router};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

pub mod api;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::{AtRestPolicy, DbPool};
use config::RedirectorMode;
use middleware::RateLimitState;
use services::{
    provider_from_config, EmailProvider, JwksCache, JwtService, MagicLinkService, OtpService,
    PlainRedirector, RecaptchaRedirector, Redirector,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// Which blobs are sealed at rest, and the cipher sealing them
    pub at_rest: Arc<AtRestPolicy>,
    /// Bounded-staleness public key set
    pub jwks: Arc<JwksCache>,
    pub jwt: Arc<JwtService>,
    pub magic_links: Arc<MagicLinkService>,
    pub otp: Arc<OtpService>,
    /// Per service account token buckets
    pub rate_limit: RateLimitState,
    pub email: Arc<dyn EmailProvider>,
    /// Final hop of a magic-link redemption
    pub redirector: Arc<dyn Redirector>,
}

impl AppState {
    /// Build the state with the email provider selected in configuration
    pub fn new(config: AppConfig, db: DbPool) -> Result<Self> {
        let email: Arc<dyn EmailProvider> = Arc::from(provider_from_config(&config.email)?);
        Self::with_email_provider(config, db, email)
    }

    pub fn with_email_provider(
        config: AppConfig,
        db: DbPool,
        email: Arc<dyn EmailProvider>,
    ) -> Result<Self> {
        let at_rest = Arc::new(AtRestPolicy::from_config(&config.database)?);
        let jwks = Arc::new(JwksCache::new(
            db.clone(),
            Arc::clone(&at_rest),
            Duration::from_millis(config.jwks.refresh_interval_ms),
        ));

        let jwt = JwtService::new(config.server.iss.clone(), &config.limits);
        let magic_links = Arc::new(MagicLinkService::new(
            &config,
            jwt.clone(),
            Arc::clone(&at_rest),
        )?);

        let redirector: Arc<dyn Redirector> = match config.recaptcha.mode {
            RedirectorMode::None => Arc::new(PlainRedirector),
            RedirectorMode::RecaptchaV3 => {
                info!("reCAPTCHA v3 interstitial enabled");
                Arc::new(RecaptchaRedirector::new(config.recaptcha.clone())?)
            }
        };

        Ok(Self {
            otp: Arc::new(OtpService::new(&config.limits)),
            rate_limit: RateLimitState::new(&config.rate_limit),
            jwt: Arc::new(jwt),
            config,
            db,
            at_rest,
            jwks,
            magic_links,
            email,
            redirector,
        })
    }
}

/// Create the application router with all routes and middleware
///
/// Stages, outermost first: body limit, request UUID, timeout, request
/// logging, transaction, authentication, admin gate, rate limit.
pub fn build_router(state: AppState) -> Result<Router> {
    let server = &state.config.server;
    let prefix = server.route_prefix()?;
    let redirect_path = format!("/{}", server.relative_redirect_path.trim_matches('/'));
    let timeout = Duration::from_secs(server.request_timeout_secs);
    let max_body_bytes = server.max_body_bytes;

    let admin = api::admin_routes()
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .route_layer(from_fn(middleware::admin_middleware));

    let transactional = api::protected_routes()
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .merge(admin)
        .route_layer(from_fn(middleware::authn_middleware))
        .merge(api::redirect_routes(&redirect_path))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::transaction_middleware,
        ));

    let routes = api::public_routes().merge(transactional);
    let router = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    };

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(middleware::make_request_span)
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Ok(router
        .fallback(api::not_found)
        .layer(trace_layer)
        .layer(from_fn_with_state(timeout, middleware::timeout_middleware))
        .layer(from_fn(middleware::request_uuid_middleware))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state))
}
