//! Repository for the `delivery_summaries` rollup table.

use sqlx::PgPool;

use crate::models::summary::StatusCount;

/// Provides write operations for delivery analytics rollups.
///
/// Write-only from the pipeline's side; reporting tooling reads the
/// table directly.
pub struct DeliverySummaryRepo;

impl DeliverySummaryRepo {
    /// Upsert one rollup bucket for the given date.
    ///
    /// Re-running a rollup for the same date overwrites the bucket, so
    /// the aggregator is idempotent per calendar day.
    pub async fn upsert(
        pool: &PgPool,
        rollup_date: chrono::NaiveDate,
        count: &StatusCount,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO delivery_summaries \
                 (rollup_date, category, channel, status, record_count) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (rollup_date, category, channel, status) DO UPDATE SET \
                record_count = EXCLUDED.record_count",
        )
        .bind(rollup_date)
        .bind(&count.category)
        .bind(&count.channel)
        .bind(count.status)
        .bind(count.record_count)
        .execute(pool)
        .await?;
        Ok(())
    }
}
