//! Mock services for testing
//!
//! Mocks stand in for external systems the server talks to.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use magiclinks::services::{Email, EmailProvider};

/// Email provider that records every message instead of delivering it
#[derive(Debug, Clone, Default)]
pub struct CapturingEmailProvider {
    sent: Arc<Mutex<Vec<Email>>>,
    failing: bool,
}

impl CapturingEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose every send fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Messages sent so far
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    /// Most recently sent message
    pub fn last(&self) -> Option<Email> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EmailProvider for CapturingEmailProvider {
    async fn send(&self, email: &Email) -> Result<()> {
        if self.failing {
            bail!("mail relay unavailable");
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> Email {
        Email {
            to_email: "jane@example.com".to_string(),
            to_name: None,
            subject: "Sign in".to_string(),
            text_body: "body".to_string(),
            html_body: "<p>body</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_capturing_provider_records() {
        let provider = CapturingEmailProvider::new();
        provider.send(&email()).await.unwrap();
        assert_eq!(provider.sent().len(), 1);
        assert_eq!(provider.last().unwrap().subject, "Sign in");
    }

    #[tokio::test]
    async fn test_failing_provider_records_nothing() {
        let provider = CapturingEmailProvider::failing();
        assert!(provider.send(&email()).await.is_err());
        assert!(provider.sent().is_empty());
    }
}
