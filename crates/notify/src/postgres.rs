//! Postgres-backed store implementations.
//!
//! Thin adapters from the store traits onto the `agrisetu-db`
//! repositories. All CAS/lease semantics live in the repository SQL;
//! these types only translate between trait-level outcomes
//! ([`CreateOutcome`], [`Transition`]) and the repositories'
//! affected-zero-rows convention (`Option::None`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agrisetu_core::status::DeliveryStatus;
use agrisetu_core::types::{DbId, Timestamp};
use agrisetu_db::models::preference::TargetUser;
use agrisetu_db::models::record::{NewNotificationRecord, NotificationRecord};
use agrisetu_db::models::summary::StatusCount;
use agrisetu_db::repositories::{DeliverySummaryRepo, NotificationRecordRepo, PreferenceRepo};
use agrisetu_db::DbPool;

use crate::store::{
    CreateOutcome, DedupeScope, PreferenceStore, RecordStore, StoreError, SummaryStore, Transition,
};

fn transition(row: Option<NotificationRecord>) -> Transition {
    match row {
        Some(record) => Transition::Applied(record),
        None => Transition::Conflict,
    }
}

// ---------------------------------------------------------------------------
// PgRecordStore
// ---------------------------------------------------------------------------

/// Production [`RecordStore`] over `notification_records`.
pub struct PgRecordStore {
    pool: Arc<DbPool>,
    /// Lease duration used when scanning for free records; must match the
    /// orchestrator's claim lease so both agree on expiry.
    lease: Duration,
}

impl PgRecordStore {
    pub fn new(pool: Arc<DbPool>, lease: Duration) -> Self {
        Self { pool, lease }
    }

    fn lease_secs(&self) -> i64 {
        self.lease.as_secs() as i64
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_pending(
        &self,
        new: &NewNotificationRecord,
        dedupe: DedupeScope,
    ) -> Result<CreateOutcome, StoreError> {
        let dedupe_per_user = dedupe == DedupeScope::PerUser;
        match NotificationRecordRepo::create_pending(&self.pool, new, dedupe_per_user).await? {
            Some(id) => Ok(CreateOutcome::Created(id)),
            None => Ok(CreateOutcome::AlreadyExists),
        }
    }

    async fn claim(
        &self,
        id: DbId,
        lease: Duration,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        Ok(NotificationRecordRepo::claim(&self.pool, id, lease.as_secs() as i64).await?)
    }

    async fn mark_sent(
        &self,
        id: DbId,
        expected: DeliveryStatus,
    ) -> Result<Transition, StoreError> {
        Ok(transition(
            NotificationRecordRepo::mark_sent(&self.pool, id, expected).await?,
        ))
    }

    async fn mark_failed(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        error: &str,
    ) -> Result<Transition, StoreError> {
        Ok(transition(
            NotificationRecordRepo::mark_failed(&self.pool, id, expected, error).await?,
        ))
    }

    async fn schedule_retry(
        &self,
        id: DbId,
        next_retry_at: Timestamp,
    ) -> Result<Transition, StoreError> {
        Ok(transition(
            NotificationRecordRepo::schedule_retry(&self.pool, id, next_retry_at).await?,
        ))
    }

    async fn mark_dead(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        error: Option<&str>,
        count_attempt: bool,
    ) -> Result<Transition, StoreError> {
        Ok(transition(
            NotificationRecordRepo::mark_dead(&self.pool, id, expected, error, count_attempt)
                .await?,
        ))
    }

    async fn advance_channel(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        next_channel: &str,
        note: &str,
    ) -> Result<Transition, StoreError> {
        Ok(transition(
            NotificationRecordRepo::advance_channel(&self.pool, id, expected, next_channel, note)
                .await?,
        ))
    }

    async fn due_retries(&self, limit: i64) -> Result<Vec<DbId>, StoreError> {
        Ok(NotificationRecordRepo::due_retries(&self.pool, self.lease_secs(), limit).await?)
    }

    async fn stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<DbId>, StoreError> {
        Ok(NotificationRecordRepo::stale_pending(
            &self.pool,
            older_than.as_secs() as i64,
            self.lease_secs(),
            limit,
        )
        .await?)
    }

    async fn stale_failed(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<DbId>, StoreError> {
        Ok(NotificationRecordRepo::stale_failed(
            &self.pool,
            older_than.as_secs() as i64,
            limit,
        )
        .await?)
    }

    async fn find(&self, id: DbId) -> Result<Option<NotificationRecord>, StoreError> {
        Ok(NotificationRecordRepo::find_by_id(&self.pool, id).await?)
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>, StoreError> {
        Ok(NotificationRecordRepo::status_counts(&self.pool).await?)
    }
}

// ---------------------------------------------------------------------------
// PgPreferenceStore
// ---------------------------------------------------------------------------

/// Production [`PreferenceStore`] over `notification_preferences`.
pub struct PgPreferenceStore {
    pool: Arc<DbPool>,
}

impl PgPreferenceStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn list_enabled_users(&self, category: &str) -> Result<Vec<TargetUser>, StoreError> {
        Ok(PreferenceRepo::list_enabled_users(&self.pool, category).await?)
    }

    async fn channels_for_user(
        &self,
        user_id: DbId,
        category: &str,
    ) -> Result<Vec<String>, StoreError> {
        match PreferenceRepo::get_for_user(&self.pool, user_id).await? {
            // Default policy: no stored row means every category enabled
            // on the single default channel.
            None => Ok(vec![agrisetu_core::channel::DEFAULT_CHANNEL.to_string()]),
            Some(pref) if pref.categories.iter().any(|c| c == category) => Ok(pref.channels),
            Some(_) => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// PgSummaryStore
// ---------------------------------------------------------------------------

/// Production [`SummaryStore`] over `delivery_summaries`.
pub struct PgSummaryStore {
    pool: Arc<DbPool>,
}

impl PgSummaryStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SummaryStore for PgSummaryStore {
    async fn upsert_rollup(
        &self,
        rollup_date: chrono::NaiveDate,
        counts: &[StatusCount],
    ) -> Result<(), StoreError> {
        for count in counts {
            DeliverySummaryRepo::upsert(&self.pool, rollup_date, count).await?;
        }
        Ok(())
    }
}
