//! Authentication and admin gate tests

use axum::{body::Body, http::Request};
use serde_json::json;

use crate::common::{ids, TestApp};

#[tokio::test]
async fn test_missing_api_key_is_unauthorized() {
    let app = TestApp::new().await;
    let response = app
        .post_json("/otp/create", json!({ "otpCreateParams": {} }))
        .await;

    response.assert_unauthorized();
}

#[tokio::test]
async fn test_unknown_api_key_is_unauthorized() {
    let app = TestApp::new().await;
    let response = app
        .post_json_with_key(
            "/otp/create",
            json!({ "otpCreateParams": { "charSetNumeric": true } }),
            ids::UNKNOWN_API_KEY,
        )
        .await;

    response.assert_unauthorized();
}

#[tokio::test]
async fn test_malformed_api_key_is_unauthorized() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Request::builder()
                .method("POST")
                .uri("/otp/create")
                .header("Content-Type", "application/json")
                .header("X-API-KEY", "not-a-uuid")
                .body(Body::from(r#"{"otpCreateParams":{}}"#))
                .unwrap(),
        )
        .await;

    response.assert_unauthorized();
}

#[tokio::test]
async fn test_admin_creates_service_account() {
    let app = TestApp::new().await;
    let account = app.create_service_account().await;

    assert!(!account.admin);
    assert_ne!(account.uuid, account.api_key);
    assert_ne!(account.aud, ids::ADMIN_AUD);
}

#[tokio::test]
async fn test_created_account_authenticates() {
    let app = TestApp::new().await;
    let account = app.create_service_account().await;

    let response = app
        .post_json_with_key(
            "/otp/create",
            json!({ "otpCreateParams": { "charSetNumeric": true } }),
            account.api_key,
        )
        .await;

    response.assert_created();
}

#[tokio::test]
async fn test_non_admin_cannot_create_service_account() {
    let app = TestApp::new().await;
    let account = app.create_service_account().await;

    let response = app
        .post_json_with_key(
            "/admin/service-account/create",
            json!({ "serviceAccountCreateParams": {} }),
            account.api_key,
        )
        .await;

    response.assert_forbidden();
}

#[tokio::test]
async fn test_admin_route_requires_authentication() {
    let app = TestApp::new().await;
    let response = app
        .post_json(
            "/admin/service-account/create",
            json!({ "serviceAccountCreateParams": {} }),
        )
        .await;

    response.assert_unauthorized();
}
