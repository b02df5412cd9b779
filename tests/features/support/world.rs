//! Test world for Cucumber scenarios

use std::fmt;

use cucumber::World;
use serde_json::Value;
use uuid::Uuid;

use crate::common::{ids, TestApp, TestResponse};

/// Test world that maintains state across scenario steps
#[derive(Default, World)]
pub struct TestWorld {
    /// Server under test, started by the background step
    pub app: Option<TestApp>,

    /// API key sent with requests; `None` sends no header
    pub api_key: Option<Uuid>,

    /// Response from last API call
    pub last_response: Option<TestResponse>,

    /// Most recently created magic link
    pub magic_link: Option<String>,

    /// Most recently created OTP id and code
    pub otp: Option<(Uuid, String)>,

    /// Most recently minted JWT
    pub jwt: Option<String>,
}

impl fmt::Debug for TestWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestWorld")
            .field("api_key", &self.api_key)
            .field("last_response", &self.last_response)
            .field("magic_link", &self.magic_link)
            .field("jwt", &self.jwt)
            .finish()
    }
}

impl TestWorld {
    pub fn app(&self) -> &TestApp {
        self.app.as_ref().expect("server not started")
    }

    pub async fn start(&mut self) {
        self.app = Some(TestApp::new().await);
    }

    pub fn authenticate_admin(&mut self) {
        self.api_key = Some(ids::ADMIN_API_KEY);
    }

    /// Create a regular account and act as it
    pub async fn authenticate_account(&mut self) {
        let account = self.app().create_service_account().await;
        self.api_key = Some(account.api_key);
    }

    /// POST as the current principal and keep the response
    pub async fn post(&mut self, uri: &str, body: Value) {
        let response = match self.api_key {
            Some(key) => self.app().post_json_with_key(uri, body, key).await,
            None => self.app().post_json(uri, body).await,
        };
        self.last_response = Some(response);
    }

    pub async fn get(&mut self, uri: &str) {
        let response = self.app().get(uri).await;
        self.last_response = Some(response);
    }

    pub fn response(&self) -> &TestResponse {
        self.last_response.as_ref().expect("No response available")
    }

    pub fn response_json(&self) -> Value {
        self.response().json()
    }
}
