//! Periodic rescue of retryable and orphaned notification records.
//!
//! The sweep is the pipeline's crash-recovery path: it finds `retrying`
//! records whose backoff deadline has passed and `pending` records that
//! were created but never attempted (a submission crashed before its
//! attempt ran), and pushes each back through the orchestrator. The
//! orchestrator's claim lease keeps a sweep racing a live attempt safe.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::orchestrator::DeliveryOrchestrator;
use crate::store::{RecordStore, StoreError};

/// Default cap on records rescued per sweep pass.
pub const DEFAULT_SWEEP_BATCH: i64 = 100;

/// Default age after which an unleased `pending` record counts as
/// orphaned. Comfortably longer than any campaign run.
pub const DEFAULT_RESCUE_AGE: Duration = Duration::from_secs(15 * 60);

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub due_retries: usize,
    pub rescued_pending: usize,
    /// `failed` records whose retry-or-dead resolution was lost to a
    /// crash and re-applied by this pass.
    pub resolved_failed: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.due_retries + self.rescued_pending + self.resolved_failed
    }
}

/// Rescans the record store for work the happy path dropped.
pub struct RetrySweep {
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<DeliveryOrchestrator>,
    batch_limit: i64,
    rescue_age: Duration,
    concurrency: usize,
}

impl RetrySweep {
    pub fn new(store: Arc<dyn RecordStore>, orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            batch_limit: DEFAULT_SWEEP_BATCH,
            rescue_age: DEFAULT_RESCUE_AGE,
            concurrency: 8,
        }
    }

    pub fn with_batch_limit(mut self, limit: i64) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_rescue_age(mut self, age: Duration) -> Self {
        self.rescue_age = age;
        self
    }

    /// One sweep pass. Records still inside their backoff window are
    /// never selected; the store queries filter on `next_retry_at`.
    pub async fn run_once(&self) -> Result<SweepStats, StoreError> {
        let due = self.store.due_retries(self.batch_limit).await?;
        let stale = self
            .store
            .stale_pending(self.rescue_age, self.batch_limit)
            .await?;
        let stranded = self
            .store
            .stale_failed(self.rescue_age, self.batch_limit)
            .await?;

        let stats = SweepStats {
            due_retries: due.len(),
            rescued_pending: stale.len(),
            resolved_failed: stranded.len(),
        };
        if stats.total() == 0 {
            return Ok(stats);
        }
        tracing::info!(
            due_retries = stats.due_retries,
            rescued_pending = stats.rescued_pending,
            resolved_failed = stats.resolved_failed,
            "Retry sweep resubmitting records"
        );

        // Stranded failed records only need their retry-or-dead decision
        // re-applied; no delivery attempt is made for them here.
        for record_id in stranded {
            if let Err(e) = self.orchestrator.resolve_failed(record_id).await {
                tracing::error!(error = %e, record_id, "Failed-record resolution failed at the store layer");
            }
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        futures::stream::iter(due.into_iter().chain(stale))
            .for_each_concurrent(self.concurrency, |record_id| {
                let orchestrator = Arc::clone(&orchestrator);
                async move {
                    if let Err(e) = orchestrator.attempt(record_id).await {
                        tracing::error!(error = %e, record_id, "Sweep resubmission failed at the store layer");
                    }
                }
            })
            .await;

        Ok(stats)
    }
}
