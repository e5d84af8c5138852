//! Delivery channel capability interface.
//!
//! A [`ChannelAdapter`] sends one rendered message to one recipient over
//! one channel and classifies the result. Adapters never retry on their
//! own; retry and backoff belong to the orchestrator. Provider wire
//! formats live entirely behind this trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use agrisetu_core::types::DbId;

// ---------------------------------------------------------------------------
// SendOutcome
// ---------------------------------------------------------------------------

/// Classified result of a single delivery attempt on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the message.
    Delivered,
    /// Network, timeout, or provider-side (5xx) failure; worth retrying.
    TransientFailure(String),
    /// Invalid recipient, unsubscribed channel, or rejected message;
    /// never retried on this channel.
    PermanentFailure(String),
}

// ---------------------------------------------------------------------------
// OutboundMessage
// ---------------------------------------------------------------------------

/// The delivery request handed to an adapter.
#[derive(Debug, Clone)]
pub struct OutboundMessage<'a> {
    /// Recipient user id; the adapter (or its gateway) resolves the
    /// concrete address/token.
    pub user_id: DbId,
    /// Notification category, e.g. `weather_alerts`.
    pub category: &'a str,
    /// Message content reference carried on the record.
    pub payload: &'a serde_json::Value,
}

// ---------------------------------------------------------------------------
// ChannelAdapter
// ---------------------------------------------------------------------------

/// Sends one message to one recipient over one delivery channel.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel name this adapter serves (see `agrisetu_core::channel`).
    fn channel(&self) -> &str;

    /// Attempt delivery. Infallible at the type level: every failure mode
    /// is folded into the returned [`SendOutcome`] classification.
    async fn send(&self, message: &OutboundMessage<'_>) -> SendOutcome;
}

// ---------------------------------------------------------------------------
// AdapterRegistry
// ---------------------------------------------------------------------------

/// Immutable channel-name-to-adapter lookup built once at startup.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own channel name, replacing any
    /// previous adapter for that channel.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel().to_string(), adapter);
    }

    /// Look up the adapter for a channel.
    pub fn get(&self, channel: &str) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(channel)
    }

    /// Channel names with a registered adapter.
    pub fn channels(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct NullAdapter(&'static str);

    #[async_trait]
    impl ChannelAdapter for NullAdapter {
        fn channel(&self) -> &str {
            self.0
        }

        async fn send(&self, _message: &OutboundMessage<'_>) -> SendOutcome {
            SendOutcome::Delivered
        }
    }

    #[test]
    fn registry_lookup_by_channel_name() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter("sms")));
        registry.register(Arc::new(NullAdapter("push")));

        assert!(registry.get("sms").is_some());
        assert!(registry.get("push").is_some());
        assert!(registry.get("email").is_none());
        assert_eq!(registry.channels().len(), 2);
    }

    #[test]
    fn re_registering_replaces_previous_adapter() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter("sms")));
        registry.register(Arc::new(NullAdapter("sms")));
        assert_eq!(registry.channels().len(), 1);
    }
}
