//! Repository for the `notification_records` table.
//!
//! The delivery orchestrator exclusively owns record mutation, and every
//! mutation here is a single conditional `UPDATE`: the transition applies
//! only if the row is still in the expected status (compare-and-swap), or
//! only if the in-flight lease (`claimed_at`) is free. A statement that
//! affects zero rows means another attempt won the race; callers treat
//! that as a logged no-op, never as read-then-write.

use sqlx::PgPool;

use agrisetu_core::status::DeliveryStatus;
use agrisetu_core::types::DbId;

use crate::models::record::{NewNotificationRecord, NotificationRecord};
use crate::models::summary::StatusCount;

/// Column list for `notification_records` queries.
const COLUMNS: &str = "\
    id, campaign_id, user_id, category, channel, status, attempt_count, \
    payload, error_detail, last_attempt_at, next_retry_at, claimed_at, \
    created_at";

/// Provides conditional state-machine operations for notification records.
pub struct NotificationRecordRepo;

impl NotificationRecordRepo {
    /// Create a `pending` record unless a matching one already exists.
    ///
    /// When `dedupe_per_user` is `true` (first-available categories) any
    /// existing record for the same campaign and user blocks creation
    /// regardless of channel; when `false` (all-channels categories) only
    /// a record for the same channel blocks. This is the campaign-level
    /// idempotency guard: re-firing a campaign with the same period key
    /// creates nothing new.
    ///
    /// Returns the new record id, or `None` if a record already existed.
    pub async fn create_pending(
        pool: &PgPool,
        new: &NewNotificationRecord,
        dedupe_per_user: bool,
    ) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO notification_records \
                 (campaign_id, user_id, category, channel, status, payload) \
             SELECT $1, $2, $3, $4, $5, $6 \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM notification_records \
                 WHERE campaign_id = $1 AND user_id = $2 \
                   AND ($7 OR channel = $4) \
             ) \
             ON CONFLICT (campaign_id, user_id, channel) DO NOTHING \
             RETURNING id",
        )
        .bind(&new.campaign_id)
        .bind(new.user_id)
        .bind(&new.category)
        .bind(&new.channel)
        .bind(DeliveryStatus::Pending)
        .bind(&new.payload)
        .bind(dedupe_per_user)
        .fetch_optional(pool)
        .await
    }

    /// Acquire the in-flight attempt lease for a record.
    ///
    /// Succeeds only if the record is `pending` or `retrying`, its backoff
    /// window (if any) has elapsed, and no unexpired lease is held. A
    /// crashed attempt releases its lease implicitly after `lease_secs`.
    ///
    /// Returns the claimed row, or `None` if another attempt holds the
    /// record (the at-most-one-in-flight-attempt invariant).
    pub async fn claim(
        pool: &PgPool,
        id: DbId,
        lease_secs: i64,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE notification_records \
             SET claimed_at = NOW() \
             WHERE id = $1 \
               AND status IN ('pending', 'retrying') \
               AND (next_retry_at IS NULL OR next_retry_at <= NOW()) \
               AND (claimed_at IS NULL \
                    OR claimed_at < NOW() - ($2 * interval '1 second')) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(id)
            .bind(lease_secs)
            .fetch_optional(pool)
            .await
    }

    /// Transition a record to `sent` if it is still in `expected` status.
    ///
    /// Counts the attempt, stamps `last_attempt_at`, clears the lease and
    /// any scheduled retry. Returns `None` on a lost race.
    pub async fn mark_sent(
        pool: &PgPool,
        id: DbId,
        expected: DeliveryStatus,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE notification_records \
             SET status = $3, attempt_count = attempt_count + 1, \
                 last_attempt_at = NOW(), next_retry_at = NULL, \
                 claimed_at = NULL \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(id)
            .bind(expected)
            .bind(DeliveryStatus::Sent)
            .fetch_optional(pool)
            .await
    }

    /// Transition a record to `failed` if it is still in `expected` status.
    ///
    /// Counts the attempt and appends `error` to the failure history. The
    /// caller immediately resolves `failed` to either `retrying` (via
    /// [`schedule_retry`](Self::schedule_retry)) or `dead` (via
    /// [`mark_dead`](Self::mark_dead)).
    pub async fn mark_failed(
        pool: &PgPool,
        id: DbId,
        expected: DeliveryStatus,
        error: &str,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE notification_records \
             SET status = $3, attempt_count = attempt_count + 1, \
                 error_detail = CASE WHEN error_detail IS NULL THEN $4 \
                                     ELSE error_detail || '; ' || $4 END, \
                 last_attempt_at = NOW(), next_retry_at = NULL, \
                 claimed_at = NULL \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(id)
            .bind(expected)
            .bind(DeliveryStatus::Failed)
            .bind(error)
            .fetch_optional(pool)
            .await
    }

    /// Transition a `failed` record to `retrying` with its backoff deadline.
    ///
    /// `next_retry_at` is set here and nowhere else, preserving the
    /// invariant that it is non-null exactly while the record is retrying.
    pub async fn schedule_retry(
        pool: &PgPool,
        id: DbId,
        next_retry_at: agrisetu_core::types::Timestamp,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE notification_records \
             SET status = $3, next_retry_at = $2 \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(id)
            .bind(next_retry_at)
            .bind(DeliveryStatus::Retrying)
            .bind(DeliveryStatus::Failed)
            .fetch_optional(pool)
            .await
    }

    /// Dead-letter a record if it is still in `expected` status.
    ///
    /// `count_attempt` is `true` when the permanent failure itself was a
    /// delivery attempt (straight from `pending`/`retrying`) and `false`
    /// when the record arrives from `failed`, where the attempt has
    /// already been counted.
    pub async fn mark_dead(
        pool: &PgPool,
        id: DbId,
        expected: DeliveryStatus,
        error: Option<&str>,
        count_attempt: bool,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE notification_records \
             SET status = $3, \
                 attempt_count = attempt_count + CASE WHEN $5 THEN 1 ELSE 0 END, \
                 error_detail = CASE WHEN $4::text IS NULL THEN error_detail \
                                     WHEN error_detail IS NULL THEN $4 \
                                     ELSE error_detail || '; ' || $4 END, \
                 last_attempt_at = NOW(), next_retry_at = NULL, \
                 claimed_at = NULL \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(id)
            .bind(expected)
            .bind(DeliveryStatus::Dead)
            .bind(error)
            .bind(count_attempt)
            .fetch_optional(pool)
            .await
    }

    /// Advance a first-available record to its next preferred channel,
    /// recording why the current channel was abandoned.
    ///
    /// The lease is kept: the same attempt continues on the new channel.
    pub async fn advance_channel(
        pool: &PgPool,
        id: DbId,
        expected: DeliveryStatus,
        next_channel: &str,
        note: &str,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE notification_records \
             SET channel = $3, \
                 error_detail = CASE WHEN error_detail IS NULL THEN $4 \
                                     ELSE error_detail || '; ' || $4 END \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(id)
            .bind(expected)
            .bind(next_channel)
            .bind(note)
            .fetch_optional(pool)
            .await
    }

    /// Ids of `retrying` records whose backoff window has elapsed and whose
    /// lease is free, oldest deadline first.
    pub async fn due_retries(
        pool: &PgPool,
        lease_secs: i64,
        limit: i64,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM notification_records \
             WHERE status = 'retrying' \
               AND next_retry_at <= NOW() \
               AND (claimed_at IS NULL \
                    OR claimed_at < NOW() - ($1 * interval '1 second')) \
             ORDER BY next_retry_at ASC \
             LIMIT $2",
        )
        .bind(lease_secs)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Ids of `pending` records that were created more than
    /// `older_than_secs` ago and are not leased.
    ///
    /// These are orphans: their initial submission crashed before
    /// persisting any outcome. The retry sweep rescues them.
    pub async fn stale_pending(
        pool: &PgPool,
        older_than_secs: i64,
        lease_secs: i64,
        limit: i64,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM notification_records \
             WHERE status = 'pending' \
               AND created_at < NOW() - ($1 * interval '1 second') \
               AND (claimed_at IS NULL \
                    OR claimed_at < NOW() - ($2 * interval '1 second')) \
             ORDER BY created_at ASC \
             LIMIT $3",
        )
        .bind(older_than_secs)
        .bind(lease_secs)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Ids of `failed` records whose last attempt is older than
    /// `older_than_secs`.
    ///
    /// A `failed` row is normally resolved to `retrying` or `dead` by the
    /// same attempt that produced it; one still in `failed` after this
    /// long lost its resolution to a crash and needs to be re-resolved.
    pub async fn stale_failed(
        pool: &PgPool,
        older_than_secs: i64,
        limit: i64,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM notification_records \
             WHERE status = 'failed' \
               AND COALESCE(last_attempt_at, created_at) \
                   < NOW() - ($1 * interval '1 second') \
             ORDER BY COALESCE(last_attempt_at, created_at) ASC \
             LIMIT $2",
        )
        .bind(older_than_secs)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Find a record by its id.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notification_records WHERE id = $1");
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Aggregate record counts by category, channel, and status.
    ///
    /// Read-only; consumed by the analytics aggregator.
    pub async fn status_counts(pool: &PgPool) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as::<_, StatusCount>(
            "SELECT category, channel, status, COUNT(*) AS record_count \
             FROM notification_records \
             GROUP BY category, channel, status \
             ORDER BY category, channel, status",
        )
        .fetch_all(pool)
        .await
    }
}
