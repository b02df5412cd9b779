//! Common step definitions used across features

use cucumber::{given, then, when};
use serde_json::json;

use crate::features::support::TestWorld;

#[given("a running magic link server")]
async fn running_server(world: &mut TestWorld) {
    world.start().await;
}

#[given("I am authenticated as an admin")]
async fn authenticated_as_admin(world: &mut TestWorld) {
    world.authenticate_admin();
}

#[given("I am authenticated as a service account")]
async fn authenticated_as_account(world: &mut TestWorld) {
    world.authenticate_account().await;
}

#[given("I am not authenticated")]
async fn not_authenticated(world: &mut TestWorld) {
    world.api_key = None;
}

#[when("I create a service account")]
async fn create_service_account(world: &mut TestWorld) {
    world
        .post(
            "/admin/service-account/create",
            json!({ "serviceAccountCreateParams": {} }),
        )
        .await;
}

#[then(expr = "the response status should be {int}")]
async fn response_status(world: &mut TestWorld, status: u16) {
    let response = world.response();
    assert_eq!(
        response.status.as_u16(),
        status,
        "unexpected status, body: {}",
        response.text()
    );
}

#[then(expr = "the error message should contain {string}")]
async fn error_message_contains(world: &mut TestWorld, text: String) {
    let message = world.response().error_message();
    assert!(message.contains(&text), "{message:?} does not contain {text:?}");
}

#[then("the response should carry a request UUID")]
async fn response_has_request_uuid(world: &mut TestWorld) {
    let json = world.response_json();
    assert!(json["requestMetadata"]["uuid"].is_string());
}
