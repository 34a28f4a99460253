use crate::{CoreError, IpLookup};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";

/// Public-IP lookup over HTTP (ipify-style `{"ip": "..."}` response).
pub struct HttpIpLookup {
    client: reqwest::Client,
    url: String,
}

impl HttpIpLookup {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

/// Accepts `{"ip": "..."}` or a bare JSON string.
pub fn parse_ip_payload(payload: &Value) -> Result<String, CoreError> {
    let ip = match payload {
        Value::Object(map) => map.get("ip").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    ip.map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
        .ok_or_else(|| CoreError::Internal(format!("Unexpected IP lookup response: {}", payload)))
}

#[async_trait]
impl IpLookup for HttpIpLookup {
    async fn client_ip(&self) -> Result<String, CoreError> {
        let payload: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(CoreError::infra)?
            .json()
            .await
            .map_err(CoreError::infra)?;
        parse_ip_payload(&payload)
    }
}
