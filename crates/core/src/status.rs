//! Delivery record state machine.
//!
//! A notification record row moves through these states:
//!
//! ```text
//! pending ──► sent                    (terminal, success)
//! pending ──► failed ──► retrying     (transient failure, attempts left)
//! retrying ─► sent
//! retrying ─► failed ──► retrying     (bounded loop)
//! failed ───► dead                    (attempts exhausted)
//! pending / retrying ──► dead         (permanent failure)
//! ```
//!
//! `sent` and `dead` are terminal. All persisted transitions go through the
//! record store's conditional updates, which enforce this table.

use serde::{Deserialize, Serialize};

/// Status of one delivery attempt lineage.
///
/// Stored as lowercase text in the `notification_records.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Created by the campaign executor, no attempt made yet.
    Pending,
    /// Delivered successfully. Terminal.
    Sent,
    /// Last attempt failed; the retry decision has not been persisted yet.
    Failed,
    /// Waiting out the backoff window before the next attempt.
    Retrying,
    /// Retries exhausted or permanent failure. Terminal.
    Dead,
}

impl DeliveryStatus {
    /// Lowercase database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Dead => "dead",
        }
    }

    /// Whether no further transitions are allowed from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }

    /// Valid target statuses reachable from `self`.
    pub fn valid_transitions(self) -> &'static [DeliveryStatus] {
        match self {
            Self::Pending => &[Self::Sent, Self::Failed, Self::Dead],
            Self::Retrying => &[Self::Sent, Self::Failed, Self::Dead],
            Self::Failed => &[Self::Retrying, Self::Dead],
            Self::Sent | Self::Dead => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(self, to: DeliveryStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "dead" => Ok(Self::Dead),
            other => Err(crate::error::CoreError::Validation(format!(
                "Unknown delivery status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::DeliveryStatus::*;
    use super::*;

    #[test]
    fn terminal_states_have_no_transitions() {
        assert!(Sent.valid_transitions().is_empty());
        assert!(Dead.valid_transitions().is_empty());
        assert!(Sent.is_terminal());
        assert!(Dead.is_terminal());
    }

    #[test]
    fn pending_can_fail_or_send() {
        assert!(Pending.can_transition(Sent));
        assert!(Pending.can_transition(Failed));
        assert!(Pending.can_transition(Dead));
        assert!(!Pending.can_transition(Retrying));
    }

    #[test]
    fn failed_resolves_to_retry_or_dead() {
        assert!(Failed.can_transition(Retrying));
        assert!(Failed.can_transition(Dead));
        assert!(!Failed.can_transition(Sent));
    }

    #[test]
    fn retry_loop_is_expressible() {
        // pending -> failed -> retrying -> failed -> retrying -> sent
        let path = [Pending, Failed, Retrying, Failed, Retrying, Sent];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition(pair[1]),
                "{} -> {} should be valid",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn round_trips_through_str() {
        for status in [Pending, Sent, Failed, Retrying, Dead] {
            let parsed: DeliveryStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("sleeping".parse::<DeliveryStatus>().is_err());
    }
}
