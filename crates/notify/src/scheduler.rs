//! Periodic campaign triggers.
//!
//! The scheduler is a fixed set of independent interval loops, each
//! spawned as its own task and stopped via a shared [`CancellationToken`]:
//! daily MSP digest, sub-daily weather check, retry sweep, and the daily
//! analytics rollup. A failing tick logs and waits for the next tick;
//! no trigger ever blocks another.
//!
//! Cadences are deployment configuration, not contracts: shortened
//! intervals (e.g. for a staging environment) only change how often the
//! same period key is recomputed, and the campaign id dedupe keeps
//! refires within one period idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agrisetu_core::category::{CATEGORY_MSP_UPDATES, CATEGORY_WEATHER_ALERTS};

use crate::analytics::AnalyticsAggregator;
use crate::campaign::{Campaign, CampaignExecutor};
use crate::sweep::RetrySweep;

// ---------------------------------------------------------------------------
// ScheduleConfig
// ---------------------------------------------------------------------------

/// Trigger cadences. Defaults are the production cadences; the worker
/// overrides them from the environment.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub msp_digest_interval: Duration,
    pub weather_check_interval: Duration,
    /// Width of the weather period key window, in hours.
    pub weather_window_hours: u32,
    pub sweep_interval: Duration,
    pub rollup_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            msp_digest_interval: Duration::from_secs(24 * 3600),
            weather_check_interval: Duration::from_secs(6 * 3600),
            weather_window_hours: 6,
            sweep_interval: Duration::from_secs(60),
            rollup_interval: Duration::from_secs(24 * 3600),
        }
    }
}

// ---------------------------------------------------------------------------
// Period keys
// ---------------------------------------------------------------------------

/// Calendar-day period key, e.g. `2026-08-30`.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Day-plus-hour-window period key, e.g. `2026-08-30T12` for any time in
/// the 12:00-17:59 window at a 6-hour width.
pub fn hour_window_key(now: DateTime<Utc>, window_hours: u32) -> String {
    let window = window_hours.clamp(1, 24);
    let bucket = now.hour() - now.hour() % window;
    format!("{}T{:02}", now.format("%Y-%m-%d"), bucket)
}

// ---------------------------------------------------------------------------
// NotificationScheduler
// ---------------------------------------------------------------------------

/// Owns the periodic trigger loops.
pub struct NotificationScheduler {
    executor: Arc<CampaignExecutor>,
    sweep: Arc<RetrySweep>,
    analytics: Arc<AnalyticsAggregator>,
    config: ScheduleConfig,
}

impl NotificationScheduler {
    pub fn new(
        executor: Arc<CampaignExecutor>,
        sweep: Arc<RetrySweep>,
        analytics: Arc<AnalyticsAggregator>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            executor,
            sweep,
            analytics,
            config,
        }
    }

    /// Spawn every trigger loop. Each runs until `cancel` is triggered.
    pub fn spawn_all(self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let Self {
            executor,
            sweep,
            analytics,
            config,
        } = self;

        vec![
            tokio::spawn(run_msp_digest(
                Arc::clone(&executor),
                config.msp_digest_interval,
                cancel.clone(),
            )),
            tokio::spawn(run_weather_check(
                executor,
                config.weather_check_interval,
                config.weather_window_hours,
                cancel.clone(),
            )),
            tokio::spawn(run_retry_sweep(sweep, config.sweep_interval, cancel.clone())),
            tokio::spawn(run_analytics_rollup(
                analytics,
                config.rollup_interval,
                cancel.clone(),
            )),
        ]
    }
}

/// Daily MSP price digest trigger, period-keyed by calendar day.
async fn run_msp_digest(
    executor: Arc<CampaignExecutor>,
    period: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = period.as_secs(), "MSP digest trigger started");
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("MSP digest trigger stopping");
                break;
            }
            _ = interval.tick() => {
                let key = day_key(Utc::now());
                let campaign = Campaign::scheduled(
                    CATEGORY_MSP_UPDATES,
                    &key,
                    serde_json::json!({ "kind": "msp_daily_digest", "date": key }),
                );
                if let Err(e) = executor.run(&campaign).await {
                    tracing::error!(error = %e, campaign_id = %campaign.id, "MSP digest fire failed");
                }
            }
        }
    }
}

/// Sub-daily weather alert trigger, period-keyed by day + hour window.
async fn run_weather_check(
    executor: Arc<CampaignExecutor>,
    period: Duration,
    window_hours: u32,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = period.as_secs(),
        window_hours,
        "Weather check trigger started"
    );
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Weather check trigger stopping");
                break;
            }
            _ = interval.tick() => {
                let key = hour_window_key(Utc::now(), window_hours);
                let campaign = Campaign::scheduled(
                    CATEGORY_WEATHER_ALERTS,
                    &key,
                    serde_json::json!({ "kind": "weather_check", "window": key }),
                );
                if let Err(e) = executor.run(&campaign).await {
                    tracing::error!(error = %e, campaign_id = %campaign.id, "Weather check fire failed");
                }
            }
        }
    }
}

/// Retry sweep trigger.
async fn run_retry_sweep(sweep: Arc<RetrySweep>, period: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = period.as_secs(), "Retry sweep started");
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retry sweep stopping");
                break;
            }
            _ = interval.tick() => {
                match sweep.run_once().await {
                    Ok(stats) if stats.total() > 0 => {
                        tracing::debug!(
                            due_retries = stats.due_retries,
                            rescued_pending = stats.rescued_pending,
                            resolved_failed = stats.resolved_failed,
                            "Sweep pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Sweep pass failed"),
                }
            }
        }
    }
}

/// Daily analytics rollup trigger.
async fn run_analytics_rollup(
    analytics: Arc<AnalyticsAggregator>,
    period: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = period.as_secs(), "Analytics rollup started");
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Analytics rollup stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = analytics.run_once(Utc::now().date_naive()).await {
                    tracing::error!(error = %e, "Analytics rollup failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_key_is_calendar_date() {
        let t = Utc.with_ymd_and_hms(2026, 8, 30, 23, 59, 0).unwrap();
        assert_eq!(day_key(t), "2026-08-30");
    }

    #[test]
    fn hour_window_key_buckets_by_window() {
        let t = Utc.with_ymd_and_hms(2026, 8, 30, 13, 15, 0).unwrap();
        assert_eq!(hour_window_key(t, 6), "2026-08-30T12");
        assert_eq!(hour_window_key(t, 1), "2026-08-30T13");
        assert_eq!(hour_window_key(t, 24), "2026-08-30T00");
    }

    #[test]
    fn refires_within_one_window_share_a_key() {
        let a = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 1).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 8, 30, 17, 59, 59).unwrap();
        assert_eq!(hour_window_key(a, 6), hour_window_key(b, 6));
    }
}
