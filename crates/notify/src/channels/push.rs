//! Mobile push delivery via an HTTP push gateway.
//!
//! The gateway owns device token lookup and fan-out to the platform push
//! services; a user without a registered device comes back as a 4xx,
//! which the classifier turns into a permanent failure so first-available
//! categories fall through to the next channel immediately.

use async_trait::async_trait;

use agrisetu_core::channel::CHANNEL_PUSH;

use crate::adapter::{ChannelAdapter, OutboundMessage, SendOutcome};
use crate::channels::{classify_request_error, classify_status, REQUEST_TIMEOUT};

// ---------------------------------------------------------------------------
// PushGatewayConfig
// ---------------------------------------------------------------------------

/// Configuration for the push gateway adapter.
#[derive(Debug, Clone)]
pub struct PushGatewayConfig {
    /// Gateway base URL.
    pub base_url: String,
    /// Optional bearer token for the gateway.
    pub api_key: Option<String>,
}

impl PushGatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `PUSH_GATEWAY_URL` is not set.
    ///
    /// | Variable               | Required | Default |
    /// |------------------------|----------|---------|
    /// | `PUSH_GATEWAY_URL`     | yes      | —       |
    /// | `PUSH_GATEWAY_API_KEY` | no       | —       |
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("PUSH_GATEWAY_URL").ok()?;
        Some(Self {
            base_url,
            api_key: std::env::var("PUSH_GATEWAY_API_KEY").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// PushAdapter
// ---------------------------------------------------------------------------

/// Sends push notifications through the configured gateway.
pub struct PushAdapter {
    client: reqwest::Client,
    config: PushGatewayConfig,
}

impl PushAdapter {
    pub fn new(config: PushGatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client, config }
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn channel(&self) -> &str {
        CHANNEL_PUSH
    }

    async fn send(&self, message: &OutboundMessage<'_>) -> SendOutcome {
        let url = format!("{}/v1/push/send", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "user_id": message.user_id,
            "category": message.category,
            "content": message.payload,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => classify_status(response.status()),
            Err(e) => classify_request_error(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_returns_none_without_gateway_url() {
        std::env::remove_var("PUSH_GATEWAY_URL");
        assert!(PushGatewayConfig::from_env().is_none());
    }

    #[test]
    fn adapter_serves_the_push_channel() {
        let adapter = PushAdapter::new(PushGatewayConfig {
            base_url: "http://localhost:9".to_string(),
            api_key: None,
        });
        assert_eq!(adapter.channel(), "push");
    }
}
