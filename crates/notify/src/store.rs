//! Store capability traits for the notification pipeline.
//!
//! All delivery-record mutation flows through [`RecordStore`]'s
//! conditional transitions: a transition names the status it expects and
//! applies only if the row still holds it (compare-and-swap), so the
//! retry sweep and a concurrent fresh submission can never both drive
//! the same record. Implementations: [`postgres`](crate::postgres) for
//! production, [`memory`](crate::memory) for tests and single-node use.

use std::time::Duration;

use async_trait::async_trait;

use agrisetu_core::status::DeliveryStatus;
use agrisetu_core::types::{DbId, Timestamp};
use agrisetu_db::models::preference::TargetUser;
use agrisetu_db::models::record::{NewNotificationRecord, NotificationRecord};
use agrisetu_db::models::summary::StatusCount;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The referenced record does not exist.
    #[error("Notification record not found: {0}")]
    RecordNotFound(DbId),
}

/// Result of an idempotent record creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new `pending` record was created.
    Created(DbId),
    /// A matching record already existed; nothing was written.
    AlreadyExists,
}

/// Result of a conditional status transition.
///
/// `Conflict` means the row was no longer in the expected status: another
/// attempt won the race. Callers log it and move on (no-op loss).
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(NotificationRecord),
    Conflict,
}

/// Which existing records block creation of a new one for the same
/// campaign and user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeScope {
    /// Any record for the (campaign, user) pair blocks — used by
    /// first-available categories, where the single record may have
    /// advanced to a different channel.
    PerUser,
    /// Only a record for the same (campaign, user, channel) triple
    /// blocks — used by all-channels categories.
    PerChannel,
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Durable log of delivery attempt lineages.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Idempotently create a `pending` record.
    async fn create_pending(
        &self,
        new: &NewNotificationRecord,
        dedupe: DedupeScope,
    ) -> Result<CreateOutcome, StoreError>;

    /// Acquire the in-flight lease on a `pending`/`retrying` record whose
    /// backoff window has elapsed. `None` means another attempt holds it.
    async fn claim(
        &self,
        id: DbId,
        lease: Duration,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// `expected → sent`; counts the attempt.
    async fn mark_sent(
        &self,
        id: DbId,
        expected: DeliveryStatus,
    ) -> Result<Transition, StoreError>;

    /// `expected → failed`; counts the attempt and appends `error`.
    async fn mark_failed(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        error: &str,
    ) -> Result<Transition, StoreError>;

    /// `failed → retrying` with the backoff deadline.
    async fn schedule_retry(
        &self,
        id: DbId,
        next_retry_at: Timestamp,
    ) -> Result<Transition, StoreError>;

    /// `expected → dead`. `count_attempt` is true when the terminal
    /// failure was itself a delivery attempt not yet counted.
    async fn mark_dead(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        error: Option<&str>,
        count_attempt: bool,
    ) -> Result<Transition, StoreError>;

    /// Move a first-available record to its next preferred channel,
    /// keeping the lease; `note` is appended to the failure history.
    async fn advance_channel(
        &self,
        id: DbId,
        expected: DeliveryStatus,
        next_channel: &str,
        note: &str,
    ) -> Result<Transition, StoreError>;

    /// `retrying` records whose `next_retry_at` has elapsed and whose
    /// lease is free.
    async fn due_retries(&self, limit: i64) -> Result<Vec<DbId>, StoreError>;

    /// Unleased `pending` records older than `older_than` (orphans from a
    /// crashed submission).
    async fn stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<DbId>, StoreError>;

    /// `failed` records whose last attempt is older than `older_than`.
    ///
    /// `failed` is a decision point, not a resting state: the attempt
    /// that produced it normally resolves it to `retrying` or `dead`
    /// immediately. A record lingering in `failed` lost that resolution
    /// to a crash and must be re-resolved.
    async fn stale_failed(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<DbId>, StoreError>;

    /// Fetch a record by id.
    async fn find(&self, id: DbId) -> Result<Option<NotificationRecord>, StoreError>;

    /// Aggregate counts by category, channel, and status.
    async fn status_counts(&self) -> Result<Vec<StatusCount>, StoreError>;
}

// ---------------------------------------------------------------------------
// PreferenceStore
// ---------------------------------------------------------------------------

/// Read-only view of per-user notification settings.
///
/// The documented default policy for users without a stored row: every
/// category enabled, single default channel.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Every user with `category` enabled, with their preference-ordered
    /// channel list (default policy applied).
    async fn list_enabled_users(&self, category: &str) -> Result<Vec<TargetUser>, StoreError>;

    /// The channel list for one user and category. Empty means the user
    /// has opted out of the category.
    async fn channels_for_user(
        &self,
        user_id: DbId,
        category: &str,
    ) -> Result<Vec<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// SummaryStore
// ---------------------------------------------------------------------------

/// Write surface for the analytics aggregator's daily rollups.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Upsert the rollup buckets for a date. Idempotent per day.
    async fn upsert_rollup(
        &self,
        rollup_date: chrono::NaiveDate,
        counts: &[StatusCount],
    ) -> Result<(), StoreError>;
}
