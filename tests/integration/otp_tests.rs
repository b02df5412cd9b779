//! One-time password tests

use rstest::rstest;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::{ids, test_config, Bodies, CapturingEmailProvider, EmailParamsFactory, TestApp};

async fn create_otp(app: &TestApp, params: Value) -> (Uuid, String) {
    let response = app
        .post_json_with_key("/otp/create", json!({ "otpCreateParams": params }), ids::ADMIN_API_KEY)
        .await;
    response.assert_created();

    let json: Value = response.json();
    let results = &json["otpCreateResults"];
    (
        results["id"].as_str().unwrap().parse().unwrap(),
        results["otp"].as_str().unwrap().to_string(),
    )
}

async fn validate_otp(app: &TestApp, id: Uuid, otp: &str) -> crate::common::TestResponse {
    validate_otp_as(app, ids::ADMIN_API_KEY, id, otp).await
}

async fn validate_otp_as(
    app: &TestApp,
    api_key: Uuid,
    id: Uuid,
    otp: &str,
) -> crate::common::TestResponse {
    app.post_json_with_key(
        "/otp/validate",
        json!({ "otpValidateParams": { "id": id, "otp": otp } }),
        api_key,
    )
    .await
}

#[tokio::test]
async fn test_numeric_code_shape() {
    let app = TestApp::new().await;
    let (_, otp) = create_otp(&app, Bodies::numeric_otp()).await;

    assert_eq!(otp.len(), 6);
    assert!(otp.chars().all(|c| c.is_ascii_digit()));
}

#[rstest]
#[case(json!({ "charSetAlphaLower": true, "length": 12 }), |c: char| c.is_ascii_lowercase())]
#[case(json!({ "charSetAlphaUpper": true, "length": 12 }), |c: char| c.is_ascii_uppercase())]
#[case(json!({ "charSetAlphaUpper": true, "charSetNumeric": true, "length": 12 }), |c: char| c.is_ascii_uppercase() || c.is_ascii_digit())]
#[tokio::test]
async fn test_code_uses_selected_alphabet(#[case] params: Value, #[case] allowed: fn(char) -> bool) {
    let app = TestApp::new().await;
    let (_, otp) = create_otp(&app, params).await;

    assert_eq!(otp.len(), 12);
    assert!(otp.chars().all(allowed), "unexpected symbol in {otp}");
}

#[tokio::test]
async fn test_default_length_applies() {
    let app = TestApp::new().await;
    let (_, otp) = create_otp(&app, json!({ "charSetNumeric": true })).await;
    assert_eq!(otp.len(), 6);
}

#[tokio::test]
async fn test_no_character_set_is_rejected() {
    let app = TestApp::new().await;
    app.post_json_with_key(
        "/otp/create",
        json!({ "otpCreateParams": { "length": 6 } }),
        ids::ADMIN_API_KEY,
    )
    .await
    .assert_bad_request();
}

#[tokio::test]
async fn test_length_over_maximum_is_rejected() {
    let app = TestApp::new().await;
    app.post_json_with_key(
        "/otp/create",
        json!({ "otpCreateParams": { "charSetNumeric": true, "length": 64 } }),
        ids::ADMIN_API_KEY,
    )
    .await
    .assert_bad_request();
}

#[tokio::test]
async fn test_code_validates_once() {
    let app = TestApp::new().await;
    let (id, otp) = create_otp(&app, Bodies::numeric_otp()).await;

    validate_otp(&app, id, &otp).await.assert_ok();
    validate_otp(&app, id, &otp).await.assert_bad_request();
}

#[tokio::test]
async fn test_wrong_code_burns_otp() {
    let app = TestApp::new().await;
    let (id, otp) = create_otp(&app, json!({ "charSetAlphaLower": true, "length": 8 })).await;

    validate_otp(&app, id, "00000000").await.assert_bad_request();
    validate_otp(&app, id, &otp).await.assert_bad_request();

    let used: Option<String> = sqlx::query_scalar("SELECT used_at FROM otps WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert!(used.is_some());
}

#[tokio::test]
async fn test_other_account_cannot_validate() {
    let app = TestApp::new().await;
    let other = app.create_service_account().await;
    let (id, otp) = create_otp(&app, Bodies::numeric_otp()).await;

    validate_otp_as(&app, other.api_key, id, &otp)
        .await
        .assert_bad_request();
    validate_otp_as(&app, other.api_key, id, "000000")
        .await
        .assert_bad_request();

    // attempts by another account leave the owner's code live
    validate_otp(&app, id, &otp).await.assert_ok();
}

#[tokio::test]
async fn test_unknown_id_is_bad_request() {
    let app = TestApp::new().await;
    validate_otp(&app, Uuid::new_v4(), "123456")
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_email_sends_code_and_hides_it() {
    let app = TestApp::new().await;
    let response = app
        .post_json_with_key(
            "/otp-email/create",
            json!({
                "otpEmailCreateParams": {
                    "otpCreateParams": Bodies::numeric_otp(),
                    "emailParams": EmailParamsFactory::create(),
                }
            }),
            ids::ADMIN_API_KEY,
        )
        .await;
    response.assert_created();

    let json: Value = response.json();
    let results = &json["otpEmailCreateResults"]["otpCreateResults"];
    assert!(results.get("otp").is_none());
    let id: Uuid = results["id"].as_str().unwrap().parse().unwrap();

    let sent = app.mailer.last().unwrap();
    let code = sent
        .text_body
        .lines()
        .find_map(|line| line.strip_prefix("Your code: "))
        .unwrap()
        .trim()
        .to_string();

    validate_otp(&app, id, &code).await.assert_ok();
}

#[tokio::test]
async fn test_failed_send_rolls_back_otp() {
    let app = TestApp::with_mailer(test_config(), CapturingEmailProvider::failing()).await;
    let response = app
        .post_json_with_key(
            "/otp-email/create",
            json!({
                "otpEmailCreateParams": {
                    "otpCreateParams": Bodies::numeric_otp(),
                    "emailParams": Bodies::email_params("jane@example.com"),
                }
            }),
            ids::ADMIN_API_KEY,
        )
        .await;

    response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM otps")
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
