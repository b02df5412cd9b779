//! JWT step definitions

use cucumber::{then, when};
use serde_json::{json, Value};

use crate::features::support::TestWorld;

#[when(expr = "I create a JWT with claims {string}")]
async fn create_jwt(world: &mut TestWorld, claims: String) {
    let claims: Value = serde_json::from_str(&claims).expect("claims must be JSON");
    world
        .post("/jwt/create", json!({ "jwtCreateParams": { "jwtClaims": claims } }))
        .await;

    if world.response().status.is_success() {
        let json = world.response_json();
        world.jwt = json["jwtCreateResults"]["jwt"].as_str().map(str::to_string);
    }
}

#[when("I validate the JWT")]
async fn validate_jwt(world: &mut TestWorld) {
    let jwt = world.jwt.clone().expect("no JWT minted");
    world
        .post("/jwt/validate", json!({ "jwtValidateParams": { "jwt": jwt } }))
        .await;
}

#[when("I validate a tampered copy of the JWT")]
async fn validate_tampered_jwt(world: &mut TestWorld) {
    let jwt = world.jwt.clone().expect("no JWT minted");
    let (signed, _) = jwt.rsplit_once('.').expect("compact JWT");
    let tampered = format!("{signed}.AAAA");
    world
        .post("/jwt/validate", json!({ "jwtValidateParams": { "jwt": tampered } }))
        .await;
}

#[then(expr = "the validated claim {string} should be {string}")]
async fn validated_claim(world: &mut TestWorld, name: String, value: String) {
    let json = world.response_json();
    assert_eq!(json["jwtValidateResults"]["jwtClaims"][&name], json!(value));
}
