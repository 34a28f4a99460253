use crate::{CoreError, Notifier, OutboundMessage};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info};

/// Transactional e-mail over an HTTP API that accepts
/// `{from, to, subject, html}` with a bearer API key (Resend-compatible).
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpNotifier {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, CoreError> {
        if api_key.trim().is_empty() {
            return Err(CoreError::Configuration("EMAIL_API_KEY is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<(), CoreError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .map_err(CoreError::infra)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("E-mail API rejected message ({}): {}", status, body);
            return Err(CoreError::Internal(format!(
                "E-mail API returned {}: {}",
                status, body
            )));
        }
        info!("Sent '{}' to {} recipient(s)", message.subject, message.to.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_is_rejected() {
        let result = HttpNotifier::new("https://api.resend.com/emails", " ", Duration::from_secs(5));
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_an_error() {
        let notifier =
            HttpNotifier::new("http://127.0.0.1:9/emails", "key", Duration::from_secs(2)).unwrap();
        let result = notifier
            .send(&OutboundMessage {
                from: "kpi@clinic.test".into(),
                to: vec!["owner@clinic.test".into()],
                subject: "Daily KPI Digest".into(),
                html: "<p></p>".into(),
            })
            .await;
        assert!(matches!(result, Err(CoreError::Infrastructure(_))));
    }
}
