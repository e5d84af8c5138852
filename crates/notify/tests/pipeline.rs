//! End-to-end pipeline tests over the in-memory stores.
//!
//! These drive campaigns through the executor, orchestrator, sweep, and
//! aggregator with scripted adapters, asserting on the records the run
//! leaves behind.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use agrisetu_core::retry::RetryPolicy;
use agrisetu_core::status::DeliveryStatus;
use agrisetu_db::models::record::NewNotificationRecord;
use agrisetu_notify::analytics::AnalyticsAggregator;
use agrisetu_notify::memory::{MemoryPreferenceStore, MemoryRecordStore, MemorySummaryStore};
use agrisetu_notify::store::{DedupeScope, RecordStore};
use agrisetu_notify::{
    AdapterRegistry, AttemptOutcome, Campaign, CampaignExecutor, ChannelAdapter,
    DeliveryOrchestrator, OutboundMessage, PausedChannels, RetrySweep, SendOutcome, TargetRule,
};

// ---------------------------------------------------------------------------
// Scripted adapter
// ---------------------------------------------------------------------------

/// Plays back a fixed sequence of outcomes, then repeats the last one.
struct ScriptedAdapter {
    name: &'static str,
    script: Mutex<VecDeque<SendOutcome>>,
    fallback: SendOutcome,
}

impl ScriptedAdapter {
    fn new(name: &'static str, script: Vec<SendOutcome>, fallback: SendOutcome) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            fallback,
        })
    }

    fn always(name: &'static str, outcome: SendOutcome) -> Arc<Self> {
        Self::new(name, Vec::new(), outcome)
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    fn channel(&self) -> &str {
        self.name
    }

    async fn send(&self, _message: &OutboundMessage<'_>) -> SendOutcome {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

// ---------------------------------------------------------------------------
// Pipeline fixture
// ---------------------------------------------------------------------------

struct Pipeline {
    store: Arc<MemoryRecordStore>,
    prefs: Arc<MemoryPreferenceStore>,
    orchestrator: Arc<DeliveryOrchestrator>,
    executor: CampaignExecutor,
    sweep: RetrySweep,
    paused: Arc<PausedChannels>,
}

/// Assemble the full pipeline with zero backoff so retries are due
/// immediately (the backoff window itself is tested separately).
fn pipeline(policy: RetryPolicy, adapters: Vec<Arc<dyn ChannelAdapter>>) -> Pipeline {
    let store = Arc::new(MemoryRecordStore::new());
    let prefs = Arc::new(MemoryPreferenceStore::new());
    let paused = Arc::new(PausedChannels::default());

    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }

    let orchestrator = Arc::new(DeliveryOrchestrator::new(
        store.clone() as Arc<dyn RecordStore>,
        prefs.clone() as _,
        registry,
        policy,
        paused.clone(),
    ));
    let executor = CampaignExecutor::new(
        store.clone() as _,
        prefs.clone() as _,
        orchestrator.clone(),
    );
    let sweep = RetrySweep::new(store.clone() as _, orchestrator.clone())
        .with_rescue_age(Duration::ZERO);

    Pipeline {
        store,
        prefs,
        orchestrator,
        executor,
        sweep,
        paused,
    }
}

fn zero_backoff() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        backoff_floor_secs: 0,
        backoff_cap_secs: 0,
    }
}

fn weather_campaign() -> Campaign {
    Campaign::scheduled("weather_alerts", "2026-08-30T12", json!({ "kind": "weather_check" }))
}

// ---------------------------------------------------------------------------
// Idempotent expansion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refiring_a_period_creates_no_new_records() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    p.prefs.register_user(1);
    p.prefs.register_user(2);

    let campaign = weather_campaign();
    let first = p.executor.run(&campaign).await.unwrap();
    assert_eq!(first.targets_created, 2);
    assert_eq!(first.already_existing, 0);

    let second = p.executor.run(&campaign).await.unwrap();
    assert_eq!(second.targets_created, 0);
    assert_eq!(second.already_existing, 2);
    assert_eq!(second.attempted, 0);
    assert_eq!(p.store.all_records().len(), 2);
}

#[tokio::test]
async fn all_channels_category_gets_one_record_per_channel() {
    let p = pipeline(
        zero_backoff(),
        vec![
            ScriptedAdapter::always("push", SendOutcome::Delivered) as _,
            ScriptedAdapter::always("sms", SendOutcome::Delivered) as _,
        ],
    );
    p.prefs.set_preference(1, &["scheme_notifications"], &["push", "sms"]);

    let campaign =
        Campaign::scheduled("scheme_notifications", "2026-08-30", json!({ "scheme": "pmfby" }));
    let summary = p.executor.run(&campaign).await.unwrap();
    assert_eq!(summary.targets_created, 2);

    let records = p.store.all_records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == DeliveryStatus::Sent));
    let mut channels: Vec<_> = records.iter().map(|r| r.channel.clone()).collect();
    channels.sort();
    assert_eq!(channels, vec!["push", "sms"]);
}

#[tokio::test]
async fn user_with_empty_channel_list_is_skipped() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    p.prefs.set_preference(1, &["weather_alerts"], &[]);

    let summary = p.executor.run(&weather_campaign()).await.unwrap();
    assert_eq!(summary.targets_created, 0);
    assert!(p.store.all_records().is_empty());
}

#[tokio::test]
async fn user_without_preference_row_gets_default_channel() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    p.prefs.register_user(42);

    let campaign = Campaign::scheduled("msp_updates", "2026-08-30", json!({ "date": "2026-08-30" }));
    let summary = p.executor.run(&campaign).await.unwrap();
    assert_eq!(summary.targets_created, 1);

    let records = p.store.all_records();
    assert_eq!(records[0].channel, "sms");
    assert_eq!(records[0].status, DeliveryStatus::Sent);
    assert_eq!(records[0].attempt_count, 1);
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_transient_failures_then_success_ends_sent_with_three_attempts() {
    let adapter = ScriptedAdapter::new(
        "sms",
        vec![
            SendOutcome::TransientFailure("gateway returned HTTP 503".to_string()),
            SendOutcome::TransientFailure("gateway returned HTTP 503".to_string()),
        ],
        SendOutcome::Delivered,
    );
    let p = pipeline(zero_backoff(), vec![adapter as _]);
    p.prefs.register_user(1);

    p.executor.run(&weather_campaign()).await.unwrap();
    // Two sweep passes complete the two retries.
    p.sweep.run_once().await.unwrap();
    p.sweep.run_once().await.unwrap();

    let records = p.store.all_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeliveryStatus::Sent);
    assert_eq!(records[0].attempt_count, 3);
    assert!(records[0].next_retry_at.is_none());
}

#[tokio::test]
async fn exhausted_transient_failures_dead_letter_at_max_attempts() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always(
            "sms",
            SendOutcome::TransientFailure("connection reset".to_string()),
        ) as _],
    );
    p.prefs.register_user(1);

    p.executor.run(&weather_campaign()).await.unwrap();
    p.sweep.run_once().await.unwrap();
    p.sweep.run_once().await.unwrap();
    // Budget is spent; further sweeps must find nothing.
    let stats = p.sweep.run_once().await.unwrap();
    assert_eq!(stats.due_retries, 0);

    let records = p.store.all_records();
    assert_eq!(records[0].status, DeliveryStatus::Dead);
    assert_eq!(records[0].attempt_count, 3);
    assert!(records[0].next_retry_at.is_none());
    // Each failed attempt left its trace.
    let detail = records[0].error_detail.as_deref().unwrap();
    assert_eq!(detail.matches("connection reset").count(), 3);
}

#[tokio::test]
async fn sweep_never_resubmits_inside_the_backoff_window() {
    // Real one-hour floor: the retry is scheduled well into the future.
    let policy = RetryPolicy {
        max_retries: 3,
        backoff_floor_secs: 3_600,
        backoff_cap_secs: 3_600,
    };
    let p = pipeline(
        policy,
        vec![ScriptedAdapter::always(
            "sms",
            SendOutcome::TransientFailure("timeout".to_string()),
        ) as _],
    );
    p.prefs.register_user(1);

    p.executor.run(&weather_campaign()).await.unwrap();
    let record = &p.store.all_records()[0];
    assert_eq!(record.status, DeliveryStatus::Retrying);
    assert!(record.next_retry_at.unwrap() > Utc::now());

    let stats = p.sweep.run_once().await.unwrap();
    assert_eq!(stats.due_retries, 0);
    assert_eq!(p.store.all_records()[0].attempt_count, 1);
}

// ---------------------------------------------------------------------------
// Permanent failures and channel fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_available_falls_back_to_next_channel_in_one_attempt() {
    let p = pipeline(
        zero_backoff(),
        vec![
            ScriptedAdapter::always(
                "push",
                SendOutcome::PermanentFailure("no registered device".to_string()),
            ) as _,
            ScriptedAdapter::always("sms", SendOutcome::Delivered) as _,
        ],
    );
    p.prefs.set_preference(1, &["weather_alerts"], &["push", "sms"]);

    p.executor.run(&weather_campaign()).await.unwrap();

    let records = p.store.all_records();
    assert_eq!(records.len(), 1, "fallback must not create a second record");
    let record = &records[0];
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.channel, "sms");
    assert_eq!(record.attempt_count, 1);
    // The push failure stays in the history.
    assert!(record.error_detail.as_deref().unwrap().contains("push"));
    assert!(record
        .error_detail
        .as_deref()
        .unwrap()
        .contains("no registered device"));
}

#[tokio::test]
async fn permanent_failure_with_no_fallback_goes_straight_to_dead() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always(
            "sms",
            SendOutcome::PermanentFailure("invalid phone number".to_string()),
        ) as _],
    );
    p.prefs.register_user(1);

    p.executor.run(&weather_campaign()).await.unwrap();

    let records = p.store.all_records();
    assert_eq!(records[0].status, DeliveryStatus::Dead);
    // Permanent death regardless of remaining retry budget.
    assert_eq!(records[0].attempt_count, 1);
}

#[tokio::test]
async fn dead_records_are_never_attempted_again() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always(
            "sms",
            SendOutcome::PermanentFailure("invalid phone number".to_string()),
        ) as _],
    );
    p.prefs.register_user(1);

    p.executor.run(&weather_campaign()).await.unwrap();
    let id = p.store.all_records()[0].id;

    let outcome = p.orchestrator.attempt(id).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Skipped);
    assert_eq!(p.store.all_records()[0].status, DeliveryStatus::Dead);
    assert_eq!(p.store.all_records()[0].attempt_count, 1);
}

// ---------------------------------------------------------------------------
// Leases and pausing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn leased_record_is_skipped_by_a_concurrent_attempt() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    let new = NewNotificationRecord {
        campaign_id: "weather_alerts:2026-08-30T12".to_string(),
        user_id: 1,
        category: "weather_alerts".to_string(),
        channel: "sms".to_string(),
        payload: json!({}),
    };
    p.store.create_pending(&new, DedupeScope::PerUser).await.unwrap();
    let id = p.store.all_records()[0].id;

    // Simulate an in-flight attempt holding the lease.
    p.store.claim(id, Duration::from_secs(60)).await.unwrap().unwrap();

    let outcome = p.orchestrator.attempt(id).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Skipped);
    assert_eq!(p.store.all_records()[0].status, DeliveryStatus::Pending);
    assert_eq!(p.store.all_records()[0].attempt_count, 0);
}

#[tokio::test]
async fn paused_channel_defers_delivery_until_resumed() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    p.prefs.register_user(1);
    p.paused.pause("sms");

    p.executor.run(&weather_campaign()).await.unwrap();
    let records = p.store.all_records();
    assert_eq!(records[0].status, DeliveryStatus::Pending);
    assert_eq!(records[0].attempt_count, 0);

    // Resume; the sweep rescues the untouched pending record.
    p.paused.resume("sms");
    let stats = p.sweep.run_once().await.unwrap();
    assert_eq!(stats.rescued_pending, 1);
    assert_eq!(p.store.all_records()[0].status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn fallback_onto_a_paused_channel_is_deferred_not_sent() {
    let p = pipeline(
        zero_backoff(),
        vec![
            ScriptedAdapter::always(
                "push",
                SendOutcome::PermanentFailure("no registered device".to_string()),
            ) as _,
            ScriptedAdapter::always("sms", SendOutcome::Delivered) as _,
        ],
    );
    p.prefs.set_preference(1, &["weather_alerts"], &["push", "sms"]);
    p.paused.pause("sms");

    p.executor.run(&weather_campaign()).await.unwrap();

    // The record advanced to sms, but the paused channel was never
    // dispatched: no outcome transition, attempt still open.
    let records = p.store.all_records();
    let record = &records[0];
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.channel, "sms");
    assert_eq!(record.attempt_count, 0);
    assert!(record
        .error_detail
        .as_deref()
        .unwrap()
        .contains("no registered device"));
}

#[tokio::test]
async fn sweep_rescues_orphaned_pending_records() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    // A record created without any delivery attempt, as if the original
    // submission crashed after the insert.
    let new = NewNotificationRecord {
        campaign_id: "msp_updates:2026-08-29".to_string(),
        user_id: 5,
        category: "msp_updates".to_string(),
        channel: "sms".to_string(),
        payload: json!({ "date": "2026-08-29" }),
    };
    p.store.create_pending(&new, DedupeScope::PerUser).await.unwrap();

    let stats = p.sweep.run_once().await.unwrap();
    assert_eq!(stats.rescued_pending, 1);
    assert_eq!(p.store.all_records()[0].status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn sweep_resolves_a_record_stranded_in_failed() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    let new = NewNotificationRecord {
        campaign_id: "weather_alerts:2026-08-30T12".to_string(),
        user_id: 1,
        category: "weather_alerts".to_string(),
        channel: "sms".to_string(),
        payload: json!({}),
    };
    p.store.create_pending(&new, DedupeScope::PerUser).await.unwrap();
    let id = p.store.all_records()[0].id;

    // An attempt that died after writing the failure but before
    // scheduling the retry leaves the record stuck in `failed`.
    p.store.claim(id, Duration::from_secs(60)).await.unwrap().unwrap();
    p.store
        .mark_failed(id, DeliveryStatus::Pending, "gateway returned HTTP 503")
        .await
        .unwrap();
    assert_eq!(p.store.all_records()[0].status, DeliveryStatus::Failed);

    // The sweep re-applies the retry decision without a new attempt.
    let stats = p.sweep.run_once().await.unwrap();
    assert_eq!(stats.resolved_failed, 1);
    let record = &p.store.all_records()[0];
    assert_eq!(record.status, DeliveryStatus::Retrying);
    assert_eq!(record.attempt_count, 1);
    assert!(record.next_retry_at.is_some());

    // The next pass delivers it like any other due retry.
    let stats = p.sweep.run_once().await.unwrap();
    assert_eq!(stats.due_retries, 1);
    let record = &p.store.all_records()[0];
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempt_count, 2);
}

#[tokio::test]
async fn stranded_failed_record_without_budget_is_dead_lettered() {
    let policy = RetryPolicy {
        max_retries: 1,
        backoff_floor_secs: 0,
        backoff_cap_secs: 0,
    };
    let p = pipeline(
        policy,
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    let new = NewNotificationRecord {
        campaign_id: "msp_updates:2026-08-30".to_string(),
        user_id: 2,
        category: "msp_updates".to_string(),
        channel: "sms".to_string(),
        payload: json!({}),
    };
    p.store.create_pending(&new, DedupeScope::PerUser).await.unwrap();
    let id = p.store.all_records()[0].id;

    p.store.claim(id, Duration::from_secs(60)).await.unwrap().unwrap();
    p.store
        .mark_failed(id, DeliveryStatus::Pending, "connection reset")
        .await
        .unwrap();

    let stats = p.sweep.run_once().await.unwrap();
    assert_eq!(stats.resolved_failed, 1);

    // The failed attempt was already counted; resolution adds nothing.
    let record = &p.store.all_records()[0];
    assert_eq!(record.status, DeliveryStatus::Dead);
    assert_eq!(record.attempt_count, 1);
    assert!(record.next_retry_at.is_none());
}

// ---------------------------------------------------------------------------
// Ad-hoc campaigns and analytics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ad_hoc_campaign_targets_explicit_users_only() {
    let p = pipeline(
        zero_backoff(),
        vec![ScriptedAdapter::always("sms", SendOutcome::Delivered) as _],
    );
    p.prefs.register_user(1);
    p.prefs.register_user(2);
    p.prefs.register_user(3);

    let campaign = Campaign::ad_hoc(
        "market_alerts",
        json!({ "commodity": "soybean" }),
        TargetRule::Users(vec![1, 3]),
    );
    let summary = p.executor.run(&campaign).await.unwrap();
    assert_eq!(summary.targets_created, 2);

    let mut users: Vec<_> = p.store.all_records().iter().map(|r| r.user_id).collect();
    users.sort();
    assert_eq!(users, vec![1, 3]);
}

#[tokio::test]
async fn analytics_rollup_reflects_terminal_outcomes() {
    let p = pipeline(
        zero_backoff(),
        vec![
            ScriptedAdapter::always("sms", SendOutcome::Delivered) as _,
            ScriptedAdapter::always(
                "push",
                SendOutcome::PermanentFailure("no registered device".to_string()),
            ) as _,
        ],
    );
    p.prefs.set_preference(1, &["scheme_notifications"], &["push", "sms"]);
    p.prefs.set_preference(2, &["scheme_notifications"], &["sms"]);

    let campaign =
        Campaign::scheduled("scheme_notifications", "2026-08-30", json!({ "scheme": "pmfby" }));
    p.executor.run(&campaign).await.unwrap();

    let summaries = Arc::new(MemorySummaryStore::new());
    let aggregator = AnalyticsAggregator::new(p.store.clone() as _, summaries.clone() as _);
    let date = Utc::now().date_naive();
    let report = aggregator.run_once(date).await.unwrap();

    // user 1: push record dead (all-channels has no fallback), sms sent;
    // user 2: sms sent. Delivery rate 2/3.
    assert_eq!(report.total_records, 3);
    let rate = report.delivery_rate.unwrap();
    assert!((rate - 2.0 / 3.0).abs() < 1e-9);

    let stored = summaries.rollup_for(date).unwrap();
    assert_eq!(stored.iter().map(|c| c.record_count).sum::<i64>(), 3);
    assert!(stored
        .iter()
        .any(|c| c.channel == "push" && c.status == DeliveryStatus::Dead));
}
