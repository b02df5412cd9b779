//! Test application setup utilities
//!
//! Provides utilities for setting up test instances of the application
//! with temporary SQLite databases and a capturing email provider.

use std::sync::Arc;

use axum::{body::Body, http::Request, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use magiclinks::{
    build_router,
    config::{AdminServiceAccountConfig, AppConfig, JwksConfig},
    db,
    middleware::API_KEY_HEADER,
    models::ServiceAccount,
    services::bootstrap,
    AppState,
};

use super::fixtures::ids;
use super::mocks::CapturingEmailProvider;

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub mailer: CapturingEmailProvider,
}

impl TestApp {
    /// Create a new test application with a temporary SQLite database
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Create a new test application with custom configuration
    pub async fn with_config(config: AppConfig) -> Self {
        Self::with_mailer(config, CapturingEmailProvider::new()).await
    }

    /// Create a new test application delivering mail to the given provider
    pub async fn with_mailer(config: AppConfig, mailer: CapturingEmailProvider) -> Self {
        let db = db::init_pool(&config.database)
            .await
            .expect("Failed to initialize test database");
        let policy = db::AtRestPolicy::from_config(&config.database)
            .expect("Failed to build at-rest policy");

        bootstrap::check_setup(&db, &policy)
            .await
            .expect("Failed to write setup row");
        bootstrap::ensure_admin_accounts(&db, &config.admin_service_accounts)
            .await
            .expect("Failed to create admin account");
        bootstrap::provision_keys(&db, &policy, &config.jwks)
            .await
            .expect("Failed to provision keys");

        let state = AppState::with_email_provider(config, db, Arc::new(mailer.clone()))
            .expect("Failed to build application state");
        let router = build_router(state.clone()).expect("Failed to build router");

        Self {
            router,
            state,
            mailer,
        }
    }

    /// Admin account declared in the test configuration
    pub fn admin(&self) -> ServiceAccount {
        ServiceAccount {
            uuid: ids::ADMIN_UUID,
            api_key: ids::ADMIN_API_KEY,
            aud: ids::ADMIN_AUD,
            admin: true,
        }
    }

    /// Create a regular service account through the admin endpoint
    pub async fn create_service_account(&self) -> ServiceAccount {
        let response = self
            .post_json_with_key(
                "/admin/service-account/create",
                json!({ "serviceAccountCreateParams": {} }),
                ids::ADMIN_API_KEY,
            )
            .await;
        response.assert_created();

        let json: Value = response.json();
        serde_json::from_value(json["serviceAccountCreateResults"]["serviceAccount"].clone())
            .expect("Failed to parse service account")
    }

    /// Make a GET request to the test application
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make a POST request with JSON body and no credentials
    pub async fn post_json(&self, uri: &str, body: Value) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Make a POST request with JSON body as a service account
    pub async fn post_json_with_key(&self, uri: &str, body: Value, api_key: Uuid) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .header(API_KEY_HEADER, api_key.to_string())
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Make a POST request with a urlencoded form body
    pub async fn post_form(&self, uri: &str, form: &[(&str, &str)]) -> TestResponse {
        let body = form
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Make an arbitrary request
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Mint a JWT for the given account, returning the compact token
    pub async fn create_jwt(&self, api_key: Uuid, claims: Value) -> String {
        let response = self
            .post_json_with_key(
                "/jwt/create",
                json!({ "jwtCreateParams": { "jwtClaims": claims } }),
                api_key,
            )
            .await;
        response.assert_created();
        let json: Value = response.json();
        json["jwtCreateResults"]["jwt"]
            .as_str()
            .expect("jwt missing from response")
            .to_string()
    }

    /// Create a magic link for the given account, returning the link and its secret
    pub async fn create_magic_link(&self, api_key: Uuid, params: Value) -> (String, Uuid) {
        let response = self
            .post_json_with_key(
                "/magic-link/create",
                json!({ "magicLinkCreateParams": params }),
                api_key,
            )
            .await;
        response.assert_created();
        let json: Value = response.json();
        let results = &json["magicLinkCreateResults"];
        let link = results["magicLink"].as_str().unwrap().to_string();
        let secret = results["secret"].as_str().unwrap().parse().unwrap();
        (link, secret)
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}

impl TestResponse {
    /// Get the response body as a string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    /// Value of the Location header, if any
    pub fn location(&self) -> Option<String> {
        self.headers
            .get(axum::http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: axum::http::StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    /// Assert the response status is OK (200)
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::OK)
    }

    /// Assert the response status is Created (201)
    pub fn assert_created(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::CREATED)
    }

    /// Assert the response status is See Other (303)
    pub fn assert_see_other(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::SEE_OTHER)
    }

    /// Assert the response status is Bad Request (400)
    pub fn assert_bad_request(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::BAD_REQUEST)
    }

    /// Assert the response status is Unauthorized (401)
    pub fn assert_unauthorized(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNAUTHORIZED)
    }

    /// Assert the response status is Forbidden (403)
    pub fn assert_forbidden(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::FORBIDDEN)
    }

    /// Assert the response status is Not Found (404)
    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::NOT_FOUND)
    }

    /// Assert the response status is Unprocessable Entity (422)
    pub fn assert_unprocessable(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY)
    }

    /// Error message of a JSON error body
    pub fn error_message(&self) -> String {
        let json: Value = self.json();
        json["message"].as_str().unwrap_or_default().to_string()
    }
}

/// Create a test configuration with temporary SQLite database
pub fn test_config() -> AppConfig {
    // Use a unique temp file for each test to avoid conflicts
    let db_path = format!(
        "/tmp/magiclinks_test_{}.db",
        Uuid::new_v4().to_string().replace('-', "")
    );

    let mut config = AppConfig::default();
    config.server.base_url = "http://localhost:8080/".to_string();
    config.server.iss = "http://localhost:8080/".to_string();
    config.database.url = format!("sqlite://{}?mode=rwc", db_path);
    config.database.max_connections = 4;
    config.database.min_connections = 1;
    config.database.encryption_key = Some(BASE64.encode([7u8; 32]));
    config.jwks = JwksConfig {
        refresh_interval_ms: 50,
        auto_provision: true,
        // RSA generation is slow in debug builds
        provision_algorithms: vec!["EdDSA".to_string(), "ES256".to_string()],
    };
    config.admin_service_accounts = vec![AdminServiceAccountConfig {
        uuid: ids::ADMIN_UUID,
        api_key: ids::ADMIN_API_KEY,
        aud: ids::ADMIN_AUD,
    }];
    config.cleanup.enabled = false;
    config
}

/// Test configuration with a per-account token bucket
pub fn test_config_with_rate_limit(burst: u32, refill_per_second: f64) -> AppConfig {
    let mut config = test_config();
    config.rate_limit.burst = burst;
    config.rate_limit.refill_per_second = Some(refill_per_second);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_creation() {
        let app = TestApp::new().await;
        assert!(app.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let app = TestApp::new().await;
        let response = app.get("/ready").await;
        response.assert_ok();
    }
}
