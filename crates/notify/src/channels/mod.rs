//! Concrete delivery channel adapters.
//!
//! Each adapter translates one provider's transport into the
//! [`ChannelAdapter`](crate::adapter::ChannelAdapter) contract and folds
//! every failure mode into a [`SendOutcome`](crate::adapter::SendOutcome)
//! classification. Adapters are constructed only when their provider is
//! configured; an unconfigured channel simply has no registry entry.

pub mod email;
pub mod push;
pub mod sms;

pub use email::{EmailAdapter, EmailConfig, PgRecipientDirectory, RecipientDirectory};
pub use push::{PushAdapter, PushGatewayConfig};
pub use sms::{SmsAdapter, SmsGatewayConfig};

use crate::adapter::SendOutcome;

/// HTTP request timeout for a single gateway call.
pub(crate) const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Classify a gateway HTTP response status.
///
/// 2xx delivered; 4xx is a permanent rejection of this recipient or
/// message, except 408 and 429 which are provider pushback worth
/// retrying; everything else (5xx) is a provider-side transient.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Delivered;
    }
    let code = status.as_u16();
    match code {
        408 | 429 => SendOutcome::TransientFailure(format!("gateway returned HTTP {code}")),
        400..=499 => SendOutcome::PermanentFailure(format!("gateway returned HTTP {code}")),
        _ => SendOutcome::TransientFailure(format!("gateway returned HTTP {code}")),
    }
}

/// Classify a reqwest transport error. Network, DNS, and timeout
/// failures are all transient; the provider was never reached.
pub(crate) fn classify_request_error(e: reqwest::Error) -> SendOutcome {
    SendOutcome::TransientFailure(format!("HTTP request failed: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn success_statuses_are_delivered() {
        assert_eq!(classify_status(StatusCode::OK), SendOutcome::Delivered);
        assert_eq!(classify_status(StatusCode::ACCEPTED), SendOutcome::Delivered);
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            SendOutcome::PermanentFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            SendOutcome::PermanentFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GONE),
            SendOutcome::PermanentFailure(_)
        ));
    }

    #[test]
    fn pushback_and_server_errors_are_transient() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(
                matches!(classify_status(status), SendOutcome::TransientFailure(_)),
                "{status} should be transient"
            );
        }
    }
}
