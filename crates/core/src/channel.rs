//! Well-known delivery channel name constants.
//!
//! These must match the channel values stored in the
//! `notification_records.channel` column and the adapter names registered
//! by the worker composition root.

/// SMS delivered through the provincial SMS gateway.
pub const CHANNEL_SMS: &str = "sms";

/// Mobile push notification delivered through the push gateway.
pub const CHANNEL_PUSH: &str = "push";

/// Email delivered via SMTP.
pub const CHANNEL_EMAIL: &str = "email";

/// Channel used when a user has no stored preference row.
pub const DEFAULT_CHANNEL: &str = CHANNEL_SMS;
