//! Delivery orchestrator: the send-with-retry state machine.
//!
//! [`DeliveryOrchestrator::attempt`] drives exactly one delivery attempt
//! for one record: lease the record, invoke the channel adapter with a
//! bounded timeout, classify the outcome, and persist the resulting
//! transition before returning. It is the only component that mutates
//! notification records; the campaign executor and retry sweep both
//! funnel into it.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;

use agrisetu_core::category::{fanout_policy, FanoutPolicy};
use agrisetu_core::retry::RetryPolicy;
use agrisetu_core::status::DeliveryStatus;
use agrisetu_core::types::{DbId, Timestamp};
use agrisetu_db::models::record::NotificationRecord;

use crate::adapter::{AdapterRegistry, OutboundMessage, SendOutcome};
use crate::store::{PreferenceStore, RecordStore, StoreError, Transition};

/// Default adapter call timeout; elapsed timeouts count as transient.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default in-flight lease. Longer than the attempt timeout so a live
/// attempt can never lose its lease mid-flight.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// PausedChannels
// ---------------------------------------------------------------------------

/// Operator-level "pause channel" switch, consulted before every attempt.
///
/// Pausing is a configuration flag, not a cancellation signal: paused
/// records keep their state and are picked up again by the retry sweep
/// once the channel resumes.
#[derive(Default)]
pub struct PausedChannels {
    channels: RwLock<HashSet<String>>,
}

impl PausedChannels {
    pub fn new<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: RwLock::new(initial.into_iter().map(Into::into).collect()),
        }
    }

    pub fn pause(&self, channel: &str) {
        self.channels
            .write()
            .expect("paused channels lock poisoned")
            .insert(channel.to_string());
    }

    pub fn resume(&self, channel: &str) {
        self.channels
            .write()
            .expect("paused channels lock poisoned")
            .remove(channel);
    }

    pub fn is_paused(&self, channel: &str) -> bool {
        self.channels
            .read()
            .expect("paused channels lock poisoned")
            .contains(channel)
    }
}

// ---------------------------------------------------------------------------
// AttemptOutcome
// ---------------------------------------------------------------------------

/// What one call to [`DeliveryOrchestrator::attempt`] did to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Delivered; the record is terminally `sent`.
    Sent,
    /// Transient failure with retry budget left; scheduled for retry.
    Retrying { next_retry_at: Timestamp },
    /// Dead-lettered: retries exhausted or permanent failure.
    Dead,
    /// Nothing to do: record missing, already terminal, or leased by a
    /// concurrent attempt.
    Skipped,
    /// The record's channel is administratively paused; no state change.
    Paused,
    /// We attempted delivery but a concurrent transition won the race;
    /// our outcome was discarded (no-op loss).
    Lost,
}

// ---------------------------------------------------------------------------
// DeliveryOrchestrator
// ---------------------------------------------------------------------------

/// Drives single delivery attempts through the record state machine.
pub struct DeliveryOrchestrator {
    store: Arc<dyn RecordStore>,
    prefs: Arc<dyn PreferenceStore>,
    adapters: AdapterRegistry,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    lease: Duration,
    paused: Arc<PausedChannels>,
}

impl DeliveryOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        prefs: Arc<dyn PreferenceStore>,
        adapters: AdapterRegistry,
        policy: RetryPolicy,
        paused: Arc<PausedChannels>,
    ) -> Self {
        Self {
            store,
            prefs,
            adapters,
            policy,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            lease: DEFAULT_LEASE,
            paused,
        }
    }

    /// Override the per-attempt adapter timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Execute one delivery attempt for `record_id`.
    ///
    /// Every state transition is persisted before this returns; the
    /// record store is the single source of truth for the outcome.
    pub async fn attempt(&self, record_id: DbId) -> Result<AttemptOutcome, StoreError> {
        // Cheap pre-checks before taking the lease.
        let Some(snapshot) = self.store.find(record_id).await? else {
            tracing::warn!(record_id, "Attempted delivery for unknown record");
            return Ok(AttemptOutcome::Skipped);
        };
        if snapshot.status.is_terminal() {
            tracing::debug!(record_id, status = %snapshot.status, "Record already terminal");
            return Ok(AttemptOutcome::Skipped);
        }
        if self.paused.is_paused(&snapshot.channel) {
            tracing::debug!(record_id, channel = %snapshot.channel, "Channel paused, skipping attempt");
            return Ok(AttemptOutcome::Paused);
        }

        // Lease the record: at most one in-flight attempt per record.
        let Some(mut record) = self.store.claim(record_id, self.lease).await? else {
            tracing::debug!(record_id, "Claim lost, another attempt is in flight");
            return Ok(AttemptOutcome::Skipped);
        };
        // The status we claimed under; all CAS transitions for this
        // attempt expect it.
        let expected = record.status;

        loop {
            // Channel fallback can land on a paused channel mid-attempt;
            // defer and let the lease lapse, the sweep picks it up later.
            if self.paused.is_paused(&record.channel) {
                tracing::debug!(
                    record_id,
                    channel = %record.channel,
                    "Channel paused mid-attempt, deferring"
                );
                return Ok(AttemptOutcome::Paused);
            }

            let outcome = self.dispatch(&record).await;
            match outcome {
                SendOutcome::Delivered => {
                    return self.finish_sent(&record, expected).await;
                }
                SendOutcome::TransientFailure(reason) => {
                    return self.finish_transient(&record, expected, &reason).await;
                }
                SendOutcome::PermanentFailure(reason) => {
                    match self.try_advance_channel(&record, expected, &reason).await? {
                        Some(advanced) => {
                            // Same attempt continues on the next channel.
                            record = advanced;
                        }
                        None => {
                            return self.finish_dead(&record, expected, &reason).await;
                        }
                    }
                }
            }
        }
    }

    /// Resolve a record stranded in `failed` to `retrying` or `dead`.
    ///
    /// `failed` is normally resolved by the same attempt that produced
    /// it; a record still there was orphaned by a crash between the two
    /// transitions. The attempt is already counted, so this only applies
    /// the retry-or-dead decision, never a new delivery.
    pub async fn resolve_failed(&self, record_id: DbId) -> Result<AttemptOutcome, StoreError> {
        let Some(record) = self.store.find(record_id).await? else {
            return Ok(AttemptOutcome::Skipped);
        };
        if record.status != DeliveryStatus::Failed {
            return Ok(AttemptOutcome::Skipped);
        }

        if self.policy.is_exhausted(record.attempt_count as u32) {
            match self
                .store
                .mark_dead(record_id, DeliveryStatus::Failed, None, false)
                .await?
            {
                Transition::Applied(dead) => {
                    tracing::error!(
                        record_id,
                        user_id = record.user_id,
                        category = %record.category,
                        channel = %record.channel,
                        attempts = dead.attempt_count,
                        "Stranded failed record dead-lettered, retries exhausted"
                    );
                    Ok(AttemptOutcome::Dead)
                }
                Transition::Conflict => Ok(AttemptOutcome::Lost),
            }
        } else {
            let next_retry_at = self.next_retry_time(record.attempt_count as u32);
            match self.store.schedule_retry(record_id, next_retry_at).await? {
                Transition::Applied(_) => {
                    tracing::warn!(
                        record_id,
                        channel = %record.channel,
                        attempts = record.attempt_count,
                        next_retry_at = %next_retry_at,
                        "Stranded failed record rescheduled for retry"
                    );
                    Ok(AttemptOutcome::Retrying { next_retry_at })
                }
                Transition::Conflict => Ok(AttemptOutcome::Lost),
            }
        }
    }

    /// Backoff deadline after `attempt_count` completed attempts.
    fn next_retry_time(&self, attempt_count: u32) -> Timestamp {
        Utc::now()
            + chrono::Duration::from_std(self.policy.backoff(attempt_count))
                .unwrap_or_else(|_| chrono::Duration::seconds(self.policy.backoff_floor_secs as i64))
    }

    /// Invoke the channel adapter with the bounded attempt timeout.
    async fn dispatch(&self, record: &NotificationRecord) -> SendOutcome {
        let Some(adapter) = self.adapters.get(&record.channel) else {
            return SendOutcome::TransientFailure(format!(
                "no adapter registered for channel {}",
                record.channel
            ));
        };

        let message = OutboundMessage {
            user_id: record.user_id,
            category: &record.category,
            payload: &record.payload,
        };

        match tokio::time::timeout(self.attempt_timeout, adapter.send(&message)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::TransientFailure(format!(
                "attempt timed out after {}s",
                self.attempt_timeout.as_secs()
            )),
        }
    }

    async fn finish_sent(
        &self,
        record: &NotificationRecord,
        expected: DeliveryStatus,
    ) -> Result<AttemptOutcome, StoreError> {
        match self.store.mark_sent(record.id, expected).await? {
            Transition::Applied(sent) => {
                tracing::info!(
                    record_id = record.id,
                    user_id = record.user_id,
                    category = %record.category,
                    channel = %sent.channel,
                    attempts = sent.attempt_count,
                    "Notification delivered"
                );
                Ok(AttemptOutcome::Sent)
            }
            Transition::Conflict => {
                tracing::warn!(record_id = record.id, "Sent transition lost a race, dropping outcome");
                Ok(AttemptOutcome::Lost)
            }
        }
    }

    async fn finish_transient(
        &self,
        record: &NotificationRecord,
        expected: DeliveryStatus,
        reason: &str,
    ) -> Result<AttemptOutcome, StoreError> {
        let failed = match self.store.mark_failed(record.id, expected, reason).await? {
            Transition::Applied(failed) => failed,
            Transition::Conflict => {
                tracing::warn!(record_id = record.id, "Failed transition lost a race, dropping outcome");
                return Ok(AttemptOutcome::Lost);
            }
        };

        if self.policy.is_exhausted(failed.attempt_count as u32) {
            // Attempt already counted by mark_failed.
            match self
                .store
                .mark_dead(record.id, DeliveryStatus::Failed, None, false)
                .await?
            {
                Transition::Applied(dead) => {
                    tracing::error!(
                        record_id = record.id,
                        user_id = record.user_id,
                        category = %record.category,
                        channel = %record.channel,
                        attempts = dead.attempt_count,
                        error = reason,
                        "Notification dead-lettered after exhausting retries"
                    );
                    Ok(AttemptOutcome::Dead)
                }
                Transition::Conflict => Ok(AttemptOutcome::Lost),
            }
        } else {
            let next_retry_at = self.next_retry_time(failed.attempt_count as u32);
            match self.store.schedule_retry(record.id, next_retry_at).await? {
                Transition::Applied(_) => {
                    tracing::warn!(
                        record_id = record.id,
                        channel = %record.channel,
                        attempts = failed.attempt_count,
                        next_retry_at = %next_retry_at,
                        error = reason,
                        "Delivery failed, retry scheduled"
                    );
                    Ok(AttemptOutcome::Retrying { next_retry_at })
                }
                Transition::Conflict => Ok(AttemptOutcome::Lost),
            }
        }
    }

    async fn finish_dead(
        &self,
        record: &NotificationRecord,
        expected: DeliveryStatus,
        reason: &str,
    ) -> Result<AttemptOutcome, StoreError> {
        match self
            .store
            .mark_dead(record.id, expected, Some(reason), true)
            .await?
        {
            Transition::Applied(dead) => {
                tracing::error!(
                    record_id = record.id,
                    user_id = record.user_id,
                    category = %record.category,
                    channel = %record.channel,
                    attempts = dead.attempt_count,
                    error = reason,
                    "Notification dead-lettered on permanent failure"
                );
                Ok(AttemptOutcome::Dead)
            }
            Transition::Conflict => {
                tracing::warn!(record_id = record.id, "Dead transition lost a race, dropping outcome");
                Ok(AttemptOutcome::Lost)
            }
        }
    }

    /// On permanent per-channel failure, move a first-available record to
    /// the user's next preferred channel within the same attempt.
    ///
    /// Returns the advanced record, or `None` when the category fans out
    /// to all channels or no preferred channel remains.
    async fn try_advance_channel(
        &self,
        record: &NotificationRecord,
        expected: DeliveryStatus,
        reason: &str,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        if fanout_policy(&record.category) != FanoutPolicy::FirstAvailable {
            return Ok(None);
        }

        let channels = self
            .prefs
            .channels_for_user(record.user_id, &record.category)
            .await?;
        let Some(next) = next_preferred_channel(&channels, &record.channel) else {
            return Ok(None);
        };

        let note = format!("{}: {}", record.channel, reason);
        match self
            .store
            .advance_channel(record.id, expected, &next, &note)
            .await?
        {
            Transition::Applied(advanced) => {
                tracing::info!(
                    record_id = record.id,
                    from = %record.channel,
                    to = %next,
                    error = reason,
                    "Falling back to next preferred channel"
                );
                Ok(Some(advanced))
            }
            Transition::Conflict => Ok(None),
        }
    }
}

/// The channel after `current` in the preference-ordered list.
///
/// A `current` channel that is no longer in the list (e.g. the
/// preference row changed mid-flight) yields the first preference.
fn next_preferred_channel(channels: &[String], current: &str) -> Option<String> {
    match channels.iter().position(|c| c == current) {
        Some(idx) => channels.get(idx + 1).cloned(),
        None => channels.first().filter(|c| c.as_str() != current).cloned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_channel_walks_preference_order() {
        let channels = vec!["push".to_string(), "sms".to_string(), "email".to_string()];
        assert_eq!(next_preferred_channel(&channels, "push").as_deref(), Some("sms"));
        assert_eq!(next_preferred_channel(&channels, "sms").as_deref(), Some("email"));
        assert_eq!(next_preferred_channel(&channels, "email"), None);
    }

    #[test]
    fn unknown_current_channel_restarts_at_first_preference() {
        let channels = vec!["push".to_string(), "sms".to_string()];
        assert_eq!(
            next_preferred_channel(&channels, "telegram").as_deref(),
            Some("push")
        );
    }

    #[test]
    fn empty_preference_list_has_no_fallback() {
        assert_eq!(next_preferred_channel(&[], "push"), None);
    }

    #[test]
    fn paused_channels_toggle() {
        let paused = PausedChannels::new(["sms"]);
        assert!(paused.is_paused("sms"));
        assert!(!paused.is_paused("push"));
        paused.pause("push");
        assert!(paused.is_paused("push"));
        paused.resume("sms");
        assert!(!paused.is_paused("sms"));
    }
}
