//! AgriSetu notification worker.
//!
//! Default mode runs the full pipeline: periodic campaign triggers,
//! retry sweep, and analytics rollup, until SIGINT/SIGTERM. Two one-shot
//! subcommands exist for operators:
//!
//! ```text
//! agrisetu-worker                  # run the pipeline
//! agrisetu-worker fire <category>  # fire one campaign for the current period
//! agrisetu-worker retry <id>       # force one delivery attempt for a record
//! ```
//!
//! Both subcommands go through the same idempotent paths as the
//! scheduler, so firing an already-delivered period or retrying a
//! terminal record is a safe no-op.

mod config;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agrisetu_core::category::{is_known_category, ALL_CATEGORIES, CATEGORY_WEATHER_ALERTS};
use agrisetu_notify::analytics::AnalyticsAggregator;
use agrisetu_notify::channels::{
    EmailAdapter, EmailConfig, PgRecipientDirectory, PushAdapter, PushGatewayConfig, SmsAdapter,
    SmsGatewayConfig,
};
use agrisetu_notify::orchestrator::DEFAULT_LEASE;
use agrisetu_notify::postgres::{PgPreferenceStore, PgRecordStore, PgSummaryStore};
use agrisetu_notify::scheduler::{day_key, hour_window_key};
use agrisetu_notify::{
    AdapterRegistry, Campaign, CampaignExecutor, DeliveryOrchestrator, NotificationScheduler,
    PausedChannels, RetrySweep,
};

use config::WorkerConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agrisetu_worker=debug,agrisetu_notify=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        sweep_interval_secs = config.sweep_interval_secs,
        max_retries = config.max_retries,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = Arc::new(
        agrisetu_db::create_pool(&config.database_url)
            .await
            .expect("Failed to connect to database"),
    );
    tracing::info!("Database connection pool created");

    agrisetu_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    agrisetu_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Stores ---
    let store = Arc::new(PgRecordStore::new(Arc::clone(&pool), DEFAULT_LEASE));
    let prefs = Arc::new(PgPreferenceStore::new(Arc::clone(&pool)));
    let summaries = Arc::new(PgSummaryStore::new(Arc::clone(&pool)));

    // --- Channel adapters (register only what is configured) ---
    let registry = build_registry(&pool);
    if registry.channels().is_empty() {
        tracing::warn!("No channel adapters configured; every attempt will be a transient failure");
    } else {
        tracing::info!(channels = ?registry.channels(), "Channel adapters registered");
    }

    // --- Pipeline ---
    let paused = Arc::new(PausedChannels::new(config.paused_channels.clone()));
    let orchestrator = Arc::new(DeliveryOrchestrator::new(
        store.clone() as _,
        prefs.clone() as _,
        registry,
        config.retry_policy(),
        Arc::clone(&paused),
    ));
    let executor = Arc::new(
        CampaignExecutor::new(store.clone() as _, prefs.clone() as _, orchestrator.clone())
            .with_concurrency(config.submit_concurrency),
    );
    let sweep = Arc::new(RetrySweep::new(store.clone() as _, orchestrator.clone()));
    let analytics = Arc::new(AnalyticsAggregator::new(
        store.clone() as _,
        summaries as _,
    ));

    // --- Mode ---
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] => run_pipeline(executor, sweep, analytics, &config).await,
        ["fire", category] => fire(&executor, category, config.weather_window_hours).await,
        ["retry", raw_id] => retry(&orchestrator, raw_id).await,
        _ => {
            eprintln!("usage: agrisetu-worker [fire <category> | retry <record-id>]");
            std::process::exit(2);
        }
    }
}

/// Run the pipeline until a termination signal arrives.
async fn run_pipeline(
    executor: Arc<CampaignExecutor>,
    sweep: Arc<RetrySweep>,
    analytics: Arc<AnalyticsAggregator>,
    config: &WorkerConfig,
) {
    let cancel = CancellationToken::new();
    let scheduler = NotificationScheduler::new(executor, sweep, analytics, config.schedule());
    let handles = scheduler.spawn_all(&cancel);
    tracing::info!(tasks = handles.len(), "Notification pipeline started");

    shutdown_signal().await;

    cancel.cancel();
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Graceful shutdown complete");
}

/// One-shot manual campaign fire for the current period.
///
/// The period key must match what the scheduler would compute right now,
/// so a manual fire of an already-delivered period deduplicates instead
/// of double-notifying.
async fn fire(executor: &CampaignExecutor, category: &str, weather_window_hours: u32) {
    if !is_known_category(category) {
        eprintln!("unknown category '{category}'; known: {}", ALL_CATEGORIES.join(", "));
        std::process::exit(2);
    }

    let now = Utc::now();
    let period_key = fire_period_key(category, now, weather_window_hours);
    let campaign = Campaign::scheduled(
        category,
        &period_key,
        serde_json::json!({ "kind": "manual_fire", "fired_at": now }),
    );

    match executor.run(&campaign).await {
        Ok(summary) => tracing::info!(
            campaign_id = %campaign.id,
            created = summary.targets_created,
            deduplicated = summary.already_existing,
            attempted = summary.attempted,
            "Manual fire finished"
        ),
        Err(e) => {
            tracing::error!(error = %e, campaign_id = %campaign.id, "Manual fire failed");
            std::process::exit(1);
        }
    }
}

/// One-shot manual delivery attempt for a record.
async fn retry(orchestrator: &DeliveryOrchestrator, raw_id: &str) {
    let record_id: i64 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            eprintln!("record id must be an integer, got '{raw_id}'");
            std::process::exit(2);
        }
    };

    match orchestrator.attempt(record_id).await {
        Ok(outcome) => tracing::info!(record_id, ?outcome, "Manual retry finished"),
        Err(e) => {
            tracing::error!(error = %e, record_id, "Manual retry failed");
            std::process::exit(1);
        }
    }
}

/// The period key the scheduler would use for `category` at `now`.
fn fire_period_key(category: &str, now: chrono::DateTime<Utc>, weather_window_hours: u32) -> String {
    if category == CATEGORY_WEATHER_ALERTS {
        hour_window_key(now, weather_window_hours)
    } else {
        day_key(now)
    }
}

/// Register an adapter for every channel whose provider is configured.
fn build_registry(pool: &Arc<agrisetu_db::DbPool>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();

    if let Some(sms) = SmsGatewayConfig::from_env() {
        registry.register(Arc::new(SmsAdapter::new(sms)));
    }
    if let Some(push) = PushGatewayConfig::from_env() {
        registry.register(Arc::new(PushAdapter::new(push)));
    }
    if let Some(email) = EmailConfig::from_env() {
        let directory = Arc::new(PgRecipientDirectory::new(Arc::clone(pool)));
        let adapter =
            EmailAdapter::new(email, directory).expect("Failed to build SMTP transport");
        registry.register(Arc::new(adapter));
    }

    registry
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the worker
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
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
    fn manual_fire_uses_the_configured_weather_window() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 15, 0, 0).unwrap();
        // The key must match the scheduler's for the same window width,
        // otherwise a manual fire creates a second campaign for the
        // same period.
        assert_eq!(
            fire_period_key(CATEGORY_WEATHER_ALERTS, now, 3),
            hour_window_key(now, 3)
        );
        assert_eq!(fire_period_key(CATEGORY_WEATHER_ALERTS, now, 3), "2026-08-30T15");
        assert_ne!(
            fire_period_key(CATEGORY_WEATHER_ALERTS, now, 3),
            hour_window_key(now, 6)
        );
    }

    #[test]
    fn daily_categories_ignore_the_weather_window() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 15, 0, 0).unwrap();
        assert_eq!(fire_period_key("msp_updates", now, 3), "2026-08-30");
        assert_eq!(fire_period_key("msp_updates", now, 6), "2026-08-30");
    }
}
