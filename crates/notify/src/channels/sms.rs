//! SMS delivery via an HTTP SMS gateway.
//!
//! The gateway resolves the user's phone number itself; the adapter only
//! posts the message reference. If `SMS_GATEWAY_URL` is not set,
//! [`SmsGatewayConfig::from_env`] returns `None` and no adapter should be
//! registered.

use async_trait::async_trait;

use agrisetu_core::channel::CHANNEL_SMS;

use crate::adapter::{ChannelAdapter, OutboundMessage, SendOutcome};
use crate::channels::{classify_request_error, classify_status, REQUEST_TIMEOUT};

// ---------------------------------------------------------------------------
// SmsGatewayConfig
// ---------------------------------------------------------------------------

/// Configuration for the SMS gateway adapter.
#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    /// Gateway base URL, e.g. `https://sms.gateway.internal`.
    pub base_url: String,
    /// Optional bearer token for the gateway.
    pub api_key: Option<String>,
}

impl SmsGatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMS_GATEWAY_URL` is not set.
    ///
    /// | Variable              | Required | Default |
    /// |-----------------------|----------|---------|
    /// | `SMS_GATEWAY_URL`     | yes      | —       |
    /// | `SMS_GATEWAY_API_KEY` | no       | —       |
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SMS_GATEWAY_URL").ok()?;
        Some(Self {
            base_url,
            api_key: std::env::var("SMS_GATEWAY_API_KEY").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// SmsAdapter
// ---------------------------------------------------------------------------

/// Sends SMS notifications through the configured gateway.
pub struct SmsAdapter {
    client: reqwest::Client,
    config: SmsGatewayConfig,
}

impl SmsAdapter {
    pub fn new(config: SmsGatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client, config }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> &str {
        CHANNEL_SMS
    }

    async fn send(&self, message: &OutboundMessage<'_>) -> SendOutcome {
        let url = format!("{}/v1/sms/send", self.config.base_url.trim_end_matches('/'));
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
        std::env::remove_var("SMS_GATEWAY_URL");
        assert!(SmsGatewayConfig::from_env().is_none());
    }

    #[test]
    fn adapter_serves_the_sms_channel() {
        let adapter = SmsAdapter::new(SmsGatewayConfig {
            base_url: "http://localhost:9".to_string(),
            api_key: None,
        });
        assert_eq!(adapter.channel(), "sms");
    }
}
