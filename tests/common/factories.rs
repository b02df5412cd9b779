//! Test factories for generating test data
//!
//! Factories create randomized test data, useful when you need unique data
//! for each test.

use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Word;
use fake::faker::name::en::Name;
use fake::Fake;
use serde_json::{json, Map, Value};

use super::fixtures::REDIRECT_URL;

/// Random caller claims without any registered names
pub struct ClaimsFactory;

impl ClaimsFactory {
    pub fn create() -> Value {
        let name: String = Name().fake();
        let role: String = Word().fake();
        let level: u32 = (1..100).fake();
        json!({
            "name": name,
            "role": role,
            "level": level,
            "profile": { "sub": "nested names are not registered claims" },
        })
    }

    /// Object with `size` bytes of padding in one field
    pub fn padded(size: usize) -> Value {
        let mut map = Map::new();
        map.insert("padding".to_string(), Value::String("x".repeat(size)));
        Value::Object(map)
    }
}

/// Random email params for the email-delivery endpoints
pub struct EmailParamsFactory;

impl EmailParamsFactory {
    pub fn create() -> Value {
        let to_email: String = SafeEmail().fake();
        let to_name: String = Name().fake();
        json!({
            "serviceName": "Example",
            "subject": "Your sign-in link",
            "title": "Sign in to Example",
            "greeting": "Hello",
            "toEmail": to_email,
            "toName": to_name,
        })
    }
}

/// Builder for magic link create params
pub struct MagicLinkParamsBuilder {
    claims: Value,
    lifespan_seconds: Option<u64>,
    jwt_alg: Option<String>,
    redirect_url: String,
    redirect_query_key: Option<String>,
}

impl Default for MagicLinkParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MagicLinkParamsBuilder {
    pub fn new() -> Self {
        Self {
            claims: ClaimsFactory::create(),
            lifespan_seconds: None,
            jwt_alg: None,
            redirect_url: REDIRECT_URL.to_string(),
            redirect_query_key: None,
        }
    }

    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_lifespan(mut self, seconds: u64) -> Self {
        self.lifespan_seconds = Some(seconds);
        self
    }

    pub fn with_alg(mut self, alg: &str) -> Self {
        self.jwt_alg = Some(alg.to_string());
        self
    }

    pub fn with_redirect_url(mut self, url: &str) -> Self {
        self.redirect_url = url.to_string();
        self
    }

    pub fn with_query_key(mut self, key: &str) -> Self {
        self.redirect_query_key = Some(key.to_string());
        self
    }

    pub fn build(self) -> Value {
        let mut jwt = json!({ "jwtClaims": self.claims });
        if let Some(alg) = self.jwt_alg {
            jwt["jwtAlg"] = json!(alg);
        }

        let mut params = json!({
            "jwtCreateParams": jwt,
            "redirectURL": self.redirect_url,
        });
        if let Some(seconds) = self.lifespan_seconds {
            params["lifespanSeconds"] = json!(seconds);
        }
        if let Some(key) = self.redirect_query_key {
            params["redirectQueryKey"] = json!(key);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_factory_has_no_registered_names() {
        let claims = ClaimsFactory::create();
        for name in ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"] {
            assert!(claims.get(name).is_none());
        }
    }

    #[test]
    fn test_builder_sets_optional_fields() {
        let params = MagicLinkParamsBuilder::new()
            .with_alg("ES256")
            .with_lifespan(60)
            .with_query_key("token")
            .build();
        assert_eq!(params["jwtCreateParams"]["jwtAlg"], "ES256");
        assert_eq!(params["lifespanSeconds"], 60);
        assert_eq!(params["redirectQueryKey"], "token");
    }
}
