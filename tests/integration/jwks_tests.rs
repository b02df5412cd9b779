//! Published key set, rotation and at-rest encryption tests

use std::time::Duration;

use serde_json::{json, Value};

use magiclinks::services::bootstrap;

use super::jwt_header;
use crate::common::{ids, test_config, TestApp};

const PRIVATE_MEMBERS: [&str; 7] = ["d", "p", "q", "dp", "dq", "qi", "k"];

#[tokio::test]
async fn test_jwks_publishes_public_keys_only() {
    let app = TestApp::new().await;
    let response = app.get("/jwks.json").await;
    response.assert_ok();

    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "application/json"
    );

    let json: Value = response.json();
    let keys = json["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    for key in keys {
        assert!(key["kid"].is_string());
        for member in PRIVATE_MEMBERS {
            assert!(key.get(member).is_none(), "{member} leaked in {key}");
        }
    }
}

#[tokio::test]
async fn test_hmac_keys_are_never_published() {
    let app = TestApp::new().await;
    let policy = app.state.at_rest.clone();
    bootstrap::rotate_key(&app.state.db, &policy, "HS512")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let json: Value = app.get("/jwks.json").await.json();
    let keys = json["keys"].as_array().unwrap();
    assert!(keys.iter().all(|key| key["kty"] != "oct"));

    // tokens signed by the new default still verify
    let token = app.create_jwt(ids::ADMIN_API_KEY, json!({})).await;
    assert_eq!(jwt_header(&token)["alg"], "HS512");
    app.post_json_with_key(
        "/jwt/validate",
        json!({ "jwtValidateParams": { "jwt": token } }),
        ids::ADMIN_API_KEY,
    )
    .await
    .assert_ok();
}

#[tokio::test]
async fn test_rotation_becomes_visible_within_refresh_interval() {
    let app = TestApp::new().await;
    let old_token = app.create_jwt(ids::ADMIN_API_KEY, json!({})).await;

    let policy = app.state.at_rest.clone();
    let rotated = bootstrap::rotate_key(&app.state.db, &policy, "EdDSA")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let json: Value = app.get("/jwks.json").await.json();
    let kids: Vec<&str> = json["keys"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|key| key["kid"].as_str())
        .collect();
    assert!(kids.contains(&rotated.kid.as_str()));

    let new_token = app.create_jwt(ids::ADMIN_API_KEY, json!({})).await;
    assert_eq!(jwt_header(&new_token)["kid"], rotated.kid.as_str());

    // tokens from the previous default keep verifying
    for token in [old_token, new_token] {
        app.post_json_with_key(
            "/jwt/validate",
            json!({ "jwtValidateParams": { "jwt": token } }),
            ids::ADMIN_API_KEY,
        )
        .await
        .assert_ok();
    }
}

#[tokio::test]
async fn test_deleted_key_stops_verifying() {
    let app = TestApp::new().await;
    let token = app.create_jwt(ids::ADMIN_API_KEY, json!({})).await;
    let kid = jwt_header(&token)["kid"].as_str().unwrap().to_string();

    let policy = app.state.at_rest.clone();
    bootstrap::rotate_key(&app.state.db, &policy, "ES256")
        .await
        .unwrap();
    bootstrap::delete_key(&app.state.db, &policy, &kid).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    app.post_json_with_key(
        "/jwt/validate",
        json!({ "jwtValidateParams": { "jwt": token } }),
        ids::ADMIN_API_KEY,
    )
    .await
    .assert_unprocessable();
}

#[tokio::test]
async fn test_stored_keys_are_encrypted() {
    let app = TestApp::new().await;

    let blobs: Vec<Vec<u8>> = sqlx::query_scalar("SELECT assets FROM jwks")
        .fetch_all(&app.state.db)
        .await
        .unwrap();
    assert!(!blobs.is_empty());
    for blob in blobs {
        assert!(serde_json::from_slice::<Value>(&blob).is_err());
        let text = String::from_utf8_lossy(&blob);
        assert!(!text.contains("\"kty\""));
    }
}

#[tokio::test]
async fn test_stored_claims_are_encrypted() {
    let app = TestApp::new().await;
    app.create_magic_link(
        ids::ADMIN_API_KEY,
        json!({
            "jwtCreateParams": { "jwtClaims": { "marker": "visible-marker" } },
            "redirectURL": "https://app.example.com/",
        }),
    )
    .await;

    let blob: Vec<u8> = sqlx::query_scalar("SELECT claims FROM magic_links")
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert!(!String::from_utf8_lossy(&blob).contains("visible-marker"));
}

#[tokio::test]
async fn test_plaintext_flags_store_json() {
    let mut config = test_config();
    config.database.plaintext_claims = true;
    config.database.plaintext_jwk = true;
    config.database.encryption_key = None;
    let app = TestApp::with_config(config).await;

    let blobs: Vec<Vec<u8>> = sqlx::query_scalar("SELECT assets FROM jwks")
        .fetch_all(&app.state.db)
        .await
        .unwrap();
    for blob in blobs {
        let jwk: Value = serde_json::from_slice(&blob).unwrap();
        assert!(jwk["d"].is_string());
    }
}

#[tokio::test]
async fn test_sealed_key_reads_back_unchanged() {
    let app = TestApp::new().await;
    let policy = app.state.at_rest.clone();
    let rotated = bootstrap::rotate_key(&app.state.db, &policy, "EdDSA")
        .await
        .unwrap();

    let mut conn = app.state.db.acquire().await.unwrap();
    let stored = magiclinks::db::JwkRepository::new(&mut conn, &policy)
        .key_read(&rotated.kid)
        .await
        .unwrap()
        .expect("rotated key is stored");
    assert_eq!(stored.jwk, rotated.jwk);

    let blob: Vec<u8> = sqlx::query_scalar("SELECT assets FROM jwks WHERE kid = ?")
        .bind(&rotated.kid)
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    let secret = rotated.jwk.d.clone().unwrap();
    assert!(!String::from_utf8_lossy(&blob).contains(&secret));
}
