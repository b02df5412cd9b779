//! reCAPTCHA v3 interstitial tests
//!
//! The verification endpoint is mocked with wiremock.

use regex::Regex;
use serde_json::{json, Value};
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use magiclinks::config::{AppConfig, RedirectorMode};

use crate::common::{ids, test_config, Bodies, TestApp};

fn recaptcha_config(server: &MockServer, button_bypass: bool) -> AppConfig {
    let mut config = test_config();
    config.recaptcha.mode = RedirectorMode::RecaptchaV3;
    config.recaptcha.site_key = "test-site-key".to_string();
    config.recaptcha.secret_key = "test-secret".to_string();
    config.recaptcha.verify_url = format!("{}/siteverify", server.uri());
    config.recaptcha.hostnames = vec!["app.example.com".to_string()];
    config.recaptcha.button_bypass = button_bypass;
    config
}

async fn mock_verify(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/siteverify"))
        .and(body_string_contains("secret=test-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Redeem a fresh link and return the interstitial page
async fn interstitial_page(app: &TestApp) -> String {
    let (link, _) = app
        .create_magic_link(ids::ADMIN_API_KEY, Bodies::magic_link())
        .await;
    let url = Url::parse(&link).unwrap();
    let response = app
        .get(&format!("{}?{}", url.path(), url.query().unwrap()))
        .await;
    response.assert_ok();

    let html = response.text();
    assert!(html.contains("test-site-key"));
    html
}

fn state_field(html: &str) -> String {
    let re = Regex::new(r#"name="state" value="([^"]+)""#).unwrap();
    re.captures(html).unwrap()[1].to_string()
}

/// Redeem a fresh link and pull the sealed state out of the interstitial
async fn interstitial_state(app: &TestApp) -> String {
    state_field(&interstitial_page(app).await)
}

#[tokio::test]
async fn test_verified_token_redirects() {
    let server = MockServer::start().await;
    mock_verify(
        &server,
        json!({ "success": true, "score": 0.9, "hostname": "app.example.com" }),
    )
    .await;
    let app = TestApp::with_config(recaptcha_config(&server, false)).await;
    let state = interstitial_state(&app).await;

    let response = app
        .post_form(
            "/redirect",
            &[("state", state.as_str()), ("g-recaptcha-response", "client-token")],
        )
        .await;

    response.assert_see_other();
    let location = response.location().unwrap();
    assert!(location.starts_with("https://app.example.com/callback?"));
    assert!(location.contains("jwt="));
}

#[tokio::test]
async fn test_interstitial_does_not_reveal_token() {
    let server = MockServer::start().await;
    mock_verify(
        &server,
        json!({ "success": true, "score": 0.9, "hostname": "app.example.com" }),
    )
    .await;
    let app = TestApp::with_config(recaptcha_config(&server, false)).await;
    let html = interstitial_page(&app).await;
    let state = state_field(&html);

    let response = app
        .post_form(
            "/redirect",
            &[("state", state.as_str()), ("g-recaptcha-response", "client-token")],
        )
        .await;
    response.assert_see_other();

    let location = Url::parse(&response.location().unwrap()).unwrap();
    let jwt = location
        .query_pairs()
        .find(|(key, _)| key == "jwt")
        .map(|(_, value)| value.into_owned())
        .unwrap();
    let payload = jwt.split('.').nth(1).unwrap();

    assert!(!html.contains(&jwt));
    assert!(!html.contains(payload));
    assert!(!html.contains("app.example.com/callback"));
}

#[tokio::test]
async fn test_low_score_is_forbidden() {
    let server = MockServer::start().await;
    mock_verify(
        &server,
        json!({ "success": true, "score": 0.1, "hostname": "app.example.com" }),
    )
    .await;
    let app = TestApp::with_config(recaptcha_config(&server, false)).await;
    let state = interstitial_state(&app).await;

    app.post_form(
        "/redirect",
        &[("state", state.as_str()), ("g-recaptcha-response", "client-token")],
    )
    .await
    .assert_forbidden();
}

#[tokio::test]
async fn test_unlisted_hostname_is_forbidden() {
    let server = MockServer::start().await;
    mock_verify(
        &server,
        json!({ "success": true, "score": 0.9, "hostname": "evil.example.com" }),
    )
    .await;
    let app = TestApp::with_config(recaptcha_config(&server, false)).await;
    let state = interstitial_state(&app).await;

    app.post_form(
        "/redirect",
        &[("state", state.as_str()), ("g-recaptcha-response", "client-token")],
    )
    .await
    .assert_forbidden();
}

#[tokio::test]
async fn test_tampered_state_is_bad_request() {
    let server = MockServer::start().await;
    let app = TestApp::with_config(recaptcha_config(&server, false)).await;
    let state = interstitial_state(&app).await;

    let mut tampered = state.into_bytes();
    let middle = tampered.len() / 2;
    tampered[middle] = if tampered[middle] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();

    app.post_form(
        "/redirect",
        &[("state", tampered.as_str()), ("g-recaptcha-response", "client-token")],
    )
    .await
    .assert_bad_request();
}

#[tokio::test]
async fn test_missing_token_is_bad_request() {
    let server = MockServer::start().await;
    let app = TestApp::with_config(recaptcha_config(&server, false)).await;
    let state = interstitial_state(&app).await;

    app.post_form("/redirect", &[("state", state.as_str())])
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_button_bypass_skips_verification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/siteverify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .expect(0)
        .mount(&server)
        .await;
    let app = TestApp::with_config(recaptcha_config(&server, true)).await;
    let state = interstitial_state(&app).await;

    app.post_form("/redirect", &[("state", state.as_str()), ("button_bypass", "1")])
        .await
        .assert_see_other();
}

#[tokio::test]
async fn test_post_without_interstitial_is_not_found() {
    let app = TestApp::new().await;
    app.post_form("/redirect", &[("state", "anything")])
        .await
        .assert_not_found();
}
