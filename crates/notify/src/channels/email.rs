//! Email delivery via async SMTP.
//!
//! Unlike the SMS and push gateways, SMTP needs a concrete recipient
//! address, so the adapter carries a [`RecipientDirectory`] that resolves
//! user ids against the externally-owned `users` table. A user without an
//! email address is a permanent failure on this channel.
//!
//! If `SMTP_HOST` is not set, [`EmailConfig::from_env`] returns `None`
//! and no adapter should be constructed.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use agrisetu_core::channel::CHANNEL_EMAIL;
use agrisetu_core::types::DbId;
use agrisetu_db::DbPool;

use crate::adapter::{ChannelAdapter, OutboundMessage, SendOutcome};

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@agrisetu.local";

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Configuration for the SMTP email adapter.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    /// Optional SMTP username.
    pub smtp_user: Option<String>,
    /// Optional SMTP password.
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set, signalling that email
    /// delivery is not configured and the channel should be skipped.
    ///
    /// | Variable        | Required | Default                  |
    /// |-----------------|----------|--------------------------|
    /// | `SMTP_HOST`     | yes      | —                        |
    /// | `SMTP_PORT`     | no       | `587`                    |
    /// | `SMTP_FROM`     | no       | `noreply@agrisetu.local` |
    /// | `SMTP_USER`     | no       | —                        |
    /// | `SMTP_PASSWORD` | no       | —                        |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// RecipientDirectory
// ---------------------------------------------------------------------------

/// Resolves a user id to an email address.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// The user's email address, or `None` if they have none on file.
    async fn email_for_user(&self, user_id: DbId) -> Result<Option<String>, sqlx::Error>;
}

/// Directory backed by the account service's `users` table (read-only).
pub struct PgRecipientDirectory {
    pool: Arc<DbPool>,
}

impl PgRecipientDirectory {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn email_for_user(&self, user_id: DbId) -> Result<Option<String>, sqlx::Error> {
        let email: Option<Option<String>> =
            sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&*self.pool)
                .await?;
        Ok(email.flatten())
    }
}

// ---------------------------------------------------------------------------
// EmailAdapter
// ---------------------------------------------------------------------------

/// Sends notification emails over async SMTP.
pub struct EmailAdapter {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    directory: Arc<dyn RecipientDirectory>,
}

impl EmailAdapter {
    /// Build the SMTP transport once at startup.
    pub fn new(
        config: EmailConfig,
        directory: Arc<dyn RecipientDirectory>,
    ) -> Result<Self, lettre::transport::smtp::Error> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            mailer: builder.build(),
            from_address: config.from_address,
            directory,
        })
    }

    fn render(&self, to: &str, message: &OutboundMessage<'_>) -> Result<Message, String> {
        let subject = format!("[AgriSetu] {}", message.category);
        let body = serde_json::to_string_pretty(message.payload).unwrap_or_default();
        Message::builder()
            .from(self.from_address.parse().map_err(|e| format!("bad from address: {e}"))?)
            .to(to.parse().map_err(|e| format!("bad recipient address: {e}"))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| format!("email build failed: {e}"))
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> &str {
        CHANNEL_EMAIL
    }

    async fn send(&self, message: &OutboundMessage<'_>) -> SendOutcome {
        let to = match self.directory.email_for_user(message.user_id).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                return SendOutcome::PermanentFailure("user has no email address".to_string());
            }
            Err(e) => {
                return SendOutcome::TransientFailure(format!("recipient lookup failed: {e}"));
            }
        };

        // Malformed addresses are permanent; re-sending will not fix them.
        let email = match self.render(&to, message) {
            Ok(email) => email,
            Err(reason) => return SendOutcome::PermanentFailure(reason),
        };

        match self.mailer.send(email).await {
            Ok(_) => SendOutcome::Delivered,
            Err(e) if e.is_permanent() => {
                SendOutcome::PermanentFailure(format!("SMTP rejected message: {e}"))
            }
            Err(e) => SendOutcome::TransientFailure(format!("SMTP transport error: {e}")),
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
    fn from_env_returns_none_without_smtp_host() {
        std::env::remove_var("SMTP_HOST");
        assert!(EmailConfig::from_env().is_none());
    }

    struct FixedDirectory(Option<String>);

    #[async_trait]
    impl RecipientDirectory for FixedDirectory {
        async fn email_for_user(&self, _user_id: DbId) -> Result<Option<String>, sqlx::Error> {
            Ok(self.0.clone())
        }
    }

    fn test_adapter(directory: FixedDirectory) -> EmailAdapter {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            smtp_user: None,
            smtp_password: None,
        };
        EmailAdapter::new(config, Arc::new(directory)).unwrap()
    }

    #[tokio::test]
    async fn missing_recipient_address_is_permanent() {
        let adapter = test_adapter(FixedDirectory(None));
        let payload = serde_json::json!({ "kind": "weather_check" });
        let message = OutboundMessage {
            user_id: 7,
            category: "weather_alerts",
            payload: &payload,
        };
        assert_eq!(
            adapter.send(&message).await,
            SendOutcome::PermanentFailure("user has no email address".to_string())
        );
    }

    #[test]
    fn malformed_recipient_address_fails_render() {
        let adapter = test_adapter(FixedDirectory(None));
        let payload = serde_json::json!({});
        let message = OutboundMessage {
            user_id: 7,
            category: "weather_alerts",
            payload: &payload,
        };
        assert!(adapter.render("not-an-email", &message).is_err());
    }
}
