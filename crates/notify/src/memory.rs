//! In-memory store implementations.
//!
//! Used by the test suite and by single-node development setups that run
//! without PostgreSQL. The semantics mirror the SQL implementations
//! exactly: conditional transitions, in-flight leases, and per-campaign
//! dedupe behave the same way, so pipeline tests over these stores
//! exercise the real state machine.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use agrisetu_core::category::ALL_CATEGORIES;
use agrisetu_core::channel::DEFAULT_CHANNEL;
use agrisetu_core::status::DeliveryStatus;
use agrisetu_core::types::{DbId, Timestamp};
use agrisetu_db::models::preference::TargetUser;
use agrisetu_db::models::record::{NewNotificationRecord, NotificationRecord};
use agrisetu_db::models::summary::StatusCount;

use crate::store::{
    CreateOutcome, DedupeScope, PreferenceStore, RecordStore, StoreError, SummaryStore, Transition,
};

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordState {
    next_id: DbId,
    records: BTreeMap<DbId, NotificationRecord>,
}

/// In-memory [`RecordStore`] with the same conditional-update semantics
/// as the PostgreSQL implementation.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<RecordState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, for test assertions.
    pub fn all_records(&self) -> Vec<NotificationRecord> {
        self.state
            .lock()
            .expect("record store lock poisoned")
            .records
            .values()
            .cloned()
            .collect()
    }

    fn append_error(record: &mut NotificationRecord, error: &str) {
        record.error_detail = Some(match record.error_detail.take() {
            Some(existing) => format!("{existing}; {error}"),
            None => error.to_string(),
        });
    }

    fn lease_expired(claimed_at: Option<Timestamp>, lease: Duration, now: Timestamp) -> bool {
        match claimed_at {
            None => true,
            Some(at) => {
                now.signed_duration_since(at)
                    > chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero())
            }
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_pending(
        &self,
        new: &NewNotificationRecord,
        dedupe: DedupeScope,
    ) -> Result<CreateOutcome, StoreError> {
        let mut state = self.state.lock().expect("record store lock poisoned");

        let exists = state.records.values().any(|r| {
            r.campaign_id == new.campaign_id
                && r.user_id == new.user_id
                && match dedupe {
                    DedupeScope::PerUser => true,
                    DedupeScope::PerChannel => r.channel == new.channel,
                }
        });
        if exists {
            return Ok(CreateOutcome::AlreadyExists);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.records.insert(
            id,
            NotificationRecord {
                id,
                campaign_id: new.campaign_id.clone(),
                user_id: new.user_id,
                category: new.category.clone(),
                channel: new.channel.clone(),
                status: DeliveryStatus::Pending,
                attempt_count: 0,
                payload: new.payload.clone(),
                error_detail: None,
                last_attempt_at: None,
                next_retry_at: None,
                claimed_at: None,
                created_at: Utc::now(),
            },
        );
        Ok(CreateOutcome::Created(id))
    }

    async fn claim(
        &self,
        id: DbId,
        lease: Duration,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let mut state = self.state.lock().expect("record store lock poisoned");
        let now = Utc::now();

        let Some(record) = state.records.get_mut(&id) else {
            return Ok(None);
        };
        let claimable = matches!(
            record.status,
            DeliveryStatus::Pending | DeliveryStatus::Retrying
        ) && record.next_retry_at.map_or(true, |at| at <= now)
            && Self::lease_expired(record.claimed_at, lease, now);

        if !claimable {
            return Ok(None);
        }
        record.claimed_at = Some(now);
        Ok(Some(record.clone()))
    }

    async fn mark_sent(
        &self,
        id: DbId,
        expected: DeliveryStatus,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().expect("record store lock poisoned");
        let Some(record) = state.records.get_mut(&id) else {
            return Err(StoreError::RecordNotFound(id));
        };
        if record.status != expected {
            return Ok(Transition::Conflict);
        }
        record.status = DeliveryStatus::Sent;
        record.attempt_count += 1;
        record.last_attempt_at = Some(Utc::now());
        record.next_retry_at = None;
        record.claimed_at = None;
        Ok(Transition::Applied(record.clone()))
    }

    async fn mark_failed(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        error: &str,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().expect("record store lock poisoned");
        let Some(record) = state.records.get_mut(&id) else {
            return Err(StoreError::RecordNotFound(id));
        };
        if record.status != expected {
            return Ok(Transition::Conflict);
        }
        record.status = DeliveryStatus::Failed;
        record.attempt_count += 1;
        Self::append_error(record, error);
        record.last_attempt_at = Some(Utc::now());
        record.next_retry_at = None;
        record.claimed_at = None;
        Ok(Transition::Applied(record.clone()))
    }

    async fn schedule_retry(
        &self,
        id: DbId,
        next_retry_at: Timestamp,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().expect("record store lock poisoned");
        let Some(record) = state.records.get_mut(&id) else {
            return Err(StoreError::RecordNotFound(id));
        };
        if record.status != DeliveryStatus::Failed {
            return Ok(Transition::Conflict);
        }
        record.status = DeliveryStatus::Retrying;
        record.next_retry_at = Some(next_retry_at);
        Ok(Transition::Applied(record.clone()))
    }

    async fn mark_dead(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        error: Option<&str>,
        count_attempt: bool,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().expect("record store lock poisoned");
        let Some(record) = state.records.get_mut(&id) else {
            return Err(StoreError::RecordNotFound(id));
        };
        if record.status != expected {
            return Ok(Transition::Conflict);
        }
        record.status = DeliveryStatus::Dead;
        if count_attempt {
            record.attempt_count += 1;
        }
        if let Some(error) = error {
            Self::append_error(record, error);
        }
        record.last_attempt_at = Some(Utc::now());
        record.next_retry_at = None;
        record.claimed_at = None;
        Ok(Transition::Applied(record.clone()))
    }

    async fn advance_channel(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        next_channel: &str,
        note: &str,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().expect("record store lock poisoned");
        let Some(record) = state.records.get_mut(&id) else {
            return Err(StoreError::RecordNotFound(id));
        };
        if record.status != expected {
            return Ok(Transition::Conflict);
        }
        record.channel = next_channel.to_string();
        Self::append_error(record, note);
        Ok(Transition::Applied(record.clone()))
    }

    async fn due_retries(&self, limit: i64) -> Result<Vec<DbId>, StoreError> {
        let state = self.state.lock().expect("record store lock poisoned");
        let now = Utc::now();
        let mut due: Vec<(Timestamp, DbId)> = state
            .records
            .values()
            .filter(|r| {
                r.status == DeliveryStatus::Retrying
                    && r.next_retry_at.is_some_and(|at| at <= now)
            })
            .map(|r| (r.next_retry_at.unwrap_or(now), r.id))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit as usize).map(|(_, id)| id).collect())
    }

    async fn stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<DbId>, StoreError> {
        let state = self.state.lock().expect("record store lock poisoned");
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut stale: Vec<(Timestamp, DbId)> = state
            .records
            .values()
            .filter(|r| {
                r.status == DeliveryStatus::Pending
                    && r.created_at < cutoff
                    && r.claimed_at.is_none()
            })
            .map(|r| (r.created_at, r.id))
            .collect();
        stale.sort();
        Ok(stale
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn stale_failed(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<DbId>, StoreError> {
        let state = self.state.lock().expect("record store lock poisoned");
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut stale: Vec<(Timestamp, DbId)> = state
            .records
            .values()
            .filter(|r| {
                r.status == DeliveryStatus::Failed
                    && r.last_attempt_at.unwrap_or(r.created_at) < cutoff
            })
            .map(|r| (r.last_attempt_at.unwrap_or(r.created_at), r.id))
            .collect();
        stale.sort();
        Ok(stale
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn find(&self, id: DbId) -> Result<Option<NotificationRecord>, StoreError> {
        let state = self.state.lock().expect("record store lock poisoned");
        Ok(state.records.get(&id).cloned())
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>, StoreError> {
        let state = self.state.lock().expect("record store lock poisoned");
        let mut buckets: BTreeMap<(String, String, &'static str), (DeliveryStatus, i64)> =
            BTreeMap::new();
        for record in state.records.values() {
            let key = (
                record.category.clone(),
                record.channel.clone(),
                record.status.as_str(),
            );
            buckets
                .entry(key)
                .and_modify(|(_, n)| *n += 1)
                .or_insert((record.status, 1));
        }
        Ok(buckets
            .into_iter()
            .map(|((category, channel, _), (status, record_count))| StatusCount {
                category,
                channel,
                status,
                record_count,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryPreferenceStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Preference {
    categories: Vec<String>,
    channels: Vec<String>,
}

/// In-memory [`PreferenceStore`].
///
/// Users registered without an explicit preference fall back to the
/// documented default policy: every category enabled, default channel.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    users: Mutex<BTreeMap<DbId, Option<Preference>>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with no stored preference row.
    pub fn register_user(&self, user_id: DbId) {
        self.users
            .lock()
            .expect("preference store lock poisoned")
            .entry(user_id)
            .or_insert(None);
    }

    /// Register or replace a user's stored preference row.
    pub fn set_preference(&self, user_id: DbId, categories: &[&str], channels: &[&str]) {
        self.users
            .lock()
            .expect("preference store lock poisoned")
            .insert(
                user_id,
                Some(Preference {
                    categories: categories.iter().map(|s| s.to_string()).collect(),
                    channels: channels.iter().map(|s| s.to_string()).collect(),
                }),
            );
    }

    fn resolve(pref: Option<&Preference>, category: &str) -> Vec<String> {
        match pref {
            // Default policy: all categories on, single default channel.
            None => {
                if ALL_CATEGORIES.contains(&category) {
                    vec![DEFAULT_CHANNEL.to_string()]
                } else {
                    Vec::new()
                }
            }
            Some(p) if p.categories.iter().any(|c| c == category) => p.channels.clone(),
            Some(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn list_enabled_users(&self, category: &str) -> Result<Vec<TargetUser>, StoreError> {
        let users = self.users.lock().expect("preference store lock poisoned");
        Ok(users
            .iter()
            .filter_map(|(user_id, pref)| {
                let channels = Self::resolve(pref.as_ref(), category);
                let enabled = match pref {
                    None => true,
                    Some(p) => p.categories.iter().any(|c| c == category),
                };
                enabled.then(|| TargetUser {
                    user_id: *user_id,
                    channels,
                })
            })
            .collect())
    }

    async fn channels_for_user(
        &self,
        user_id: DbId,
        category: &str,
    ) -> Result<Vec<String>, StoreError> {
        let users = self.users.lock().expect("preference store lock poisoned");
        // Unknown users get the default policy too: an explicit ad-hoc
        // target without a preference row must still be reachable.
        let pref = users.get(&user_id).cloned().flatten();
        Ok(Self::resolve(pref.as_ref(), category))
    }
}

// ---------------------------------------------------------------------------
// MemorySummaryStore
// ---------------------------------------------------------------------------

/// In-memory [`SummaryStore`] keeping the latest rollup per date.
#[derive(Default)]
pub struct MemorySummaryStore {
    rollups: Mutex<BTreeMap<chrono::NaiveDate, Vec<StatusCount>>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored rollup for a date, for test assertions.
    pub fn rollup_for(&self, date: chrono::NaiveDate) -> Option<Vec<StatusCount>> {
        self.rollups
            .lock()
            .expect("summary store lock poisoned")
            .get(&date)
            .cloned()
    }
}

#[async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn upsert_rollup(
        &self,
        rollup_date: chrono::NaiveDate,
        counts: &[StatusCount],
    ) -> Result<(), StoreError> {
        self.rollups
            .lock()
            .expect("summary store lock poisoned")
            .insert(rollup_date, counts.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn new_record(campaign: &str, user: DbId, channel: &str) -> NewNotificationRecord {
        NewNotificationRecord {
            campaign_id: campaign.to_string(),
            user_id: user,
            category: "weather_alerts".to_string(),
            channel: channel.to_string(),
            payload: json!({"ref": "test"}),
        }
    }

    #[tokio::test]
    async fn per_user_dedupe_blocks_any_channel() {
        let store = MemoryRecordStore::new();
        let created = store
            .create_pending(&new_record("c1", 1, "push"), DedupeScope::PerUser)
            .await
            .unwrap();
        assert_matches!(created, CreateOutcome::Created(_));

        // Same user, different channel: still blocked per-user.
        let dup = store
            .create_pending(&new_record("c1", 1, "sms"), DedupeScope::PerUser)
            .await
            .unwrap();
        assert_eq!(dup, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn per_channel_dedupe_allows_other_channels() {
        let store = MemoryRecordStore::new();
        store
            .create_pending(&new_record("c1", 1, "push"), DedupeScope::PerChannel)
            .await
            .unwrap();
        let other = store
            .create_pending(&new_record("c1", 1, "sms"), DedupeScope::PerChannel)
            .await
            .unwrap();
        assert_matches!(other, CreateOutcome::Created(_));
    }

    #[tokio::test]
    async fn claim_is_exclusive_within_lease() {
        let store = MemoryRecordStore::new();
        let CreateOutcome::Created(id) = store
            .create_pending(&new_record("c1", 1, "sms"), DedupeScope::PerUser)
            .await
            .unwrap()
        else {
            panic!("expected creation");
        };

        let lease = Duration::from_secs(30);
        assert!(store.claim(id, lease).await.unwrap().is_some());
        // Second concurrent claim loses.
        assert!(store.claim(id, lease).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_conflict_on_stale_expectation() {
        let store = MemoryRecordStore::new();
        let CreateOutcome::Created(id) = store
            .create_pending(&new_record("c1", 1, "sms"), DedupeScope::PerUser)
            .await
            .unwrap()
        else {
            panic!("expected creation");
        };

        store
            .mark_sent(id, DeliveryStatus::Pending)
            .await
            .unwrap();
        // Record is now sent; a racing failure report must lose.
        let conflict = store
            .mark_failed(id, DeliveryStatus::Pending, "late failure")
            .await
            .unwrap();
        assert!(matches!(conflict, Transition::Conflict));

        let record = store.find(id).await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.attempt_count, 1);
    }

    #[tokio::test]
    async fn dead_records_never_transition_again() {
        let store = MemoryRecordStore::new();
        let CreateOutcome::Created(id) = store
            .create_pending(&new_record("c1", 1, "sms"), DedupeScope::PerUser)
            .await
            .unwrap()
        else {
            panic!("expected creation");
        };

        store
            .mark_dead(id, DeliveryStatus::Pending, Some("invalid recipient"), true)
            .await
            .unwrap();

        assert!(store.claim(id, Duration::from_secs(1)).await.unwrap().is_none());
        let late = store.mark_sent(id, DeliveryStatus::Dead).await.unwrap();
        assert!(matches!(late, Transition::Conflict));
    }

    #[tokio::test]
    async fn due_retries_respects_backoff_window() {
        let store = MemoryRecordStore::new();
        let CreateOutcome::Created(id) = store
            .create_pending(&new_record("c1", 1, "sms"), DedupeScope::PerUser)
            .await
            .unwrap()
        else {
            panic!("expected creation");
        };

        store
            .mark_failed(id, DeliveryStatus::Pending, "timeout")
            .await
            .unwrap();
        store
            .schedule_retry(id, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        // Still inside the backoff window: not due.
        assert!(store.due_retries(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_policy_for_unregistered_preference() {
        let prefs = MemoryPreferenceStore::new();
        prefs.register_user(7);

        let channels = prefs.channels_for_user(7, "msp_updates").await.unwrap();
        assert_eq!(channels, vec![DEFAULT_CHANNEL.to_string()]);

        let targets = prefs.list_enabled_users("msp_updates").await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].user_id, 7);
    }

    #[tokio::test]
    async fn opted_out_category_yields_no_channels() {
        let prefs = MemoryPreferenceStore::new();
        prefs.set_preference(3, &["weather_alerts"], &["push", "sms"]);

        assert!(prefs
            .channels_for_user(3, "msp_updates")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            prefs.channels_for_user(3, "weather_alerts").await.unwrap(),
            vec!["push".to_string(), "sms".to_string()]
        );
    }
}
