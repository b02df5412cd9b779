//! API integration tests
//!
//! Tests the routing surface and the request pipeline shared by every endpoint.

use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::common::{ids, test_config, Bodies, TestApp};

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let app = TestApp::new().await;
    let response = app.get("/ready").await;

    response.assert_ok();

    let json: Value = response.json();
    assert_eq!(json["status"], "ready");
    assert!(json["requestMetadata"]["uuid"].is_string());
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let app = TestApp::new().await;
    let response = app.get("/does/not/exist").await;

    response.assert_not_found();
    let json: Value = response.json();
    assert_eq!(json["code"], 404);
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn test_request_uuid_is_unique_per_request() {
    let app = TestApp::new().await;
    let first: Value = app.get("/ready").await.json();
    let second: Value = app.get("/ready").await.json();

    assert_ne!(first["requestMetadata"]["uuid"], second["requestMetadata"]["uuid"]);
}

#[tokio::test]
async fn test_error_body_carries_request_metadata() {
    let app = TestApp::new().await;
    let response = app.post_json("/jwt/create", json!({})).await;

    response.assert_unauthorized();
    let json: Value = response.json();
    assert_eq!(json["code"], 401);
    assert!(json["requestMetadata"]["uuid"].is_string());
}

#[tokio::test]
async fn test_body_over_limit_is_rejected() {
    let mut config = test_config();
    config.server.max_body_bytes = 1024;
    let app = TestApp::with_config(config).await;

    let response = app
        .post_json_with_key(
            "/jwt/create",
            json!({ "jwtCreateParams": { "jwtClaims": { "pad": "x".repeat(4096) } } }),
            ids::ADMIN_API_KEY,
        )
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new().await;
    let response = app
        .request(
            axum::http::Request::builder()
                .method("POST")
                .uri("/jwt/create")
                .header("Content-Type", "application/json")
                .header("X-API-KEY", ids::ADMIN_API_KEY.to_string())
                .body(axum::body::Body::from("{not json"))
                .unwrap(),
        )
        .await;

    response.assert_bad_request();
}

#[tokio::test]
async fn test_routes_follow_base_url_path() {
    let mut config = test_config();
    config.server.base_url = "https://auth.example.com/api/v1/".to_string();
    let app = TestApp::with_config(config).await;

    app.get("/api/v1/ready").await.assert_ok();
    app.get("/ready").await.assert_not_found();

    let response = app
        .post_json_with_key(
            "/api/v1/magic-link/create",
            json!({ "magicLinkCreateParams": Bodies::magic_link() }),
            ids::ADMIN_API_KEY,
        )
        .await;
    response.assert_created();
    let json: Value = response.json();
    let link = json["magicLinkCreateResults"]["magicLink"].as_str().unwrap();
    assert!(link.starts_with("https://auth.example.com/api/v1/redirect?secret="));
}
