//! Daily delivery analytics rollup.
//!
//! Read-only with respect to notification records: the aggregator reads
//! grouped status counts, logs an overall delivery rate, and upserts the
//! per-(category, channel, status) buckets into `delivery_summaries`.
//! An aggregation failure never affects delivery.

use std::sync::Arc;

use chrono::NaiveDate;

use agrisetu_core::status::DeliveryStatus;
use agrisetu_db::models::summary::StatusCount;

use crate::store::{RecordStore, StoreError, SummaryStore};

/// What one rollup pass observed.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupReport {
    pub rollup_date: NaiveDate,
    pub buckets: usize,
    pub total_records: i64,
    /// `sent / (sent + dead)`, or `None` with no terminal records yet.
    pub delivery_rate: Option<f64>,
}

/// Computes and persists the daily delivery rollup.
pub struct AnalyticsAggregator {
    store: Arc<dyn RecordStore>,
    summaries: Arc<dyn SummaryStore>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn RecordStore>, summaries: Arc<dyn SummaryStore>) -> Self {
        Self { store, summaries }
    }

    /// Roll up current record counts under `rollup_date`.
    ///
    /// Re-running for the same date overwrites the day's buckets, so a
    /// retried tick is idempotent.
    pub async fn run_once(&self, rollup_date: NaiveDate) -> Result<RollupReport, StoreError> {
        let counts = self.store.status_counts().await?;
        let report = RollupReport {
            rollup_date,
            buckets: counts.len(),
            total_records: counts.iter().map(|c| c.record_count).sum(),
            delivery_rate: delivery_rate(&counts),
        };

        self.summaries.upsert_rollup(rollup_date, &counts).await?;

        match report.delivery_rate {
            Some(rate) => tracing::info!(
                rollup_date = %rollup_date,
                buckets = report.buckets,
                total_records = report.total_records,
                delivery_rate = format!("{:.1}%", rate * 100.0),
                "Delivery rollup written"
            ),
            None => tracing::info!(
                rollup_date = %rollup_date,
                buckets = report.buckets,
                total_records = report.total_records,
                "Delivery rollup written (no terminal records yet)"
            ),
        }
        Ok(report)
    }
}

/// Share of terminal records that were delivered.
fn delivery_rate(counts: &[StatusCount]) -> Option<f64> {
    let mut sent = 0i64;
    let mut dead = 0i64;
    for c in counts {
        match c.status {
            DeliveryStatus::Sent => sent += c.record_count,
            DeliveryStatus::Dead => dead += c.record_count,
            _ => {}
        }
    }
    let terminal = sent + dead;
    (terminal > 0).then(|| sent as f64 / terminal as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
