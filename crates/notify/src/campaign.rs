//! Campaign expansion and bounded-concurrency submission.
//!
//! A [`Campaign`] is ephemeral: it exists only while the executor runs,
//! and its durable trace is the set of `pending` records it creates.
//! Firing the same campaign id twice is safe; the dedupe scope in
//! [`RecordStore::create_pending`] makes the second fire a no-op.

use std::sync::Arc;

use futures::StreamExt;
use uuid::Uuid;

use agrisetu_core::category::{fanout_policy, is_known_category, FanoutPolicy};
use agrisetu_core::types::DbId;
use agrisetu_db::models::preference::TargetUser;
use agrisetu_db::models::record::NewNotificationRecord;

use crate::orchestrator::DeliveryOrchestrator;
use crate::store::{CreateOutcome, DedupeScope, PreferenceStore, RecordStore, StoreError};

/// Default cap on concurrently in-flight delivery attempts per campaign.
pub const DEFAULT_SUBMIT_CONCURRENCY: usize = 16;

// ---------------------------------------------------------------------------
// Campaign
// ---------------------------------------------------------------------------

/// Who a campaign targets.
#[derive(Debug, Clone)]
pub enum TargetRule {
    /// Every user with the campaign's category enabled.
    AllSubscribed,
    /// An explicit user list; preference channel order still applies.
    Users(Vec<DbId>),
}

/// One fire of a notification category, expanded into per-user records.
#[derive(Debug, Clone)]
pub struct Campaign {
    /// Idempotency key. Scheduled fires use `category:period-key` so a
    /// double fire within the same period is deduplicated; ad-hoc fires
    /// get a fresh UUID.
    pub id: String,
    pub category: String,
    pub payload: serde_json::Value,
    pub targets: TargetRule,
}

impl Campaign {
    /// A scheduler-triggered campaign, keyed by its period.
    pub fn scheduled(category: &str, period_key: &str, payload: serde_json::Value) -> Self {
        Self {
            id: format!("{category}:{period_key}"),
            category: category.to_string(),
            payload,
            targets: TargetRule::AllSubscribed,
        }
    }

    /// An operator-triggered one-off campaign.
    pub fn ad_hoc(category: &str, payload: serde_json::Value, targets: TargetRule) -> Self {
        Self {
            id: format!("{category}:{}", Uuid::new_v4()),
            category: category.to_string(),
            payload,
            targets,
        }
    }
}

/// Counters returned by one executor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignSummary {
    /// New `pending` records created by this fire.
    pub targets_created: usize,
    /// Targets skipped because a matching record already existed.
    pub already_existing: usize,
    /// Delivery attempts submitted to the orchestrator.
    pub attempted: usize,
}

// ---------------------------------------------------------------------------
// CampaignExecutor
// ---------------------------------------------------------------------------

/// Expands campaigns into records and pushes them through the
/// orchestrator with bounded concurrency.
pub struct CampaignExecutor {
    store: Arc<dyn RecordStore>,
    prefs: Arc<dyn PreferenceStore>,
    orchestrator: Arc<DeliveryOrchestrator>,
    concurrency: usize,
}

impl CampaignExecutor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        prefs: Arc<dyn PreferenceStore>,
        orchestrator: Arc<DeliveryOrchestrator>,
    ) -> Self {
        Self {
            store,
            prefs,
            orchestrator,
            concurrency: DEFAULT_SUBMIT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run one campaign end to end: expand targets, create records,
    /// attempt delivery for every record created here.
    ///
    /// Partial delivery failure never surfaces as an error; per-record
    /// outcomes live in the record store. Only expansion/creation
    /// failures propagate.
    pub async fn run(&self, campaign: &Campaign) -> Result<CampaignSummary, StoreError> {
        if !is_known_category(&campaign.category) {
            tracing::warn!(
                campaign_id = %campaign.id,
                category = %campaign.category,
                "Firing campaign for unrecognised category"
            );
        }
        tracing::info!(
            campaign_id = %campaign.id,
            category = %campaign.category,
            "Executing notification campaign"
        );

        let users = self.resolve_targets(campaign).await?;
        let policy = fanout_policy(&campaign.category);

        let mut summary = CampaignSummary::default();
        let mut created_ids = Vec::new();

        for user in &users {
            if user.channels.is_empty() {
                tracing::debug!(
                    campaign_id = %campaign.id,
                    user_id = user.user_id,
                    "User has no enabled channels, skipping"
                );
                continue;
            }
            for (channel, dedupe) in fanout_targets(policy, &user.channels) {
                let new = NewNotificationRecord {
                    campaign_id: campaign.id.clone(),
                    user_id: user.user_id,
                    category: campaign.category.clone(),
                    channel: channel.to_string(),
                    payload: campaign.payload.clone(),
                };
                match self.store.create_pending(&new, dedupe).await? {
                    CreateOutcome::Created(id) => {
                        summary.targets_created += 1;
                        created_ids.push(id);
                    }
                    CreateOutcome::AlreadyExists => summary.already_existing += 1,
                }
            }
        }

        summary.attempted = created_ids.len();
        let orchestrator = Arc::clone(&self.orchestrator);
        futures::stream::iter(created_ids)
            .for_each_concurrent(self.concurrency, |record_id| {
                let orchestrator = Arc::clone(&orchestrator);
                async move {
                    if let Err(e) = orchestrator.attempt(record_id).await {
                        tracing::error!(error = %e, record_id, "Delivery attempt failed at the store layer");
                    }
                }
            })
            .await;

        tracing::info!(
            campaign_id = %campaign.id,
            created = summary.targets_created,
            deduplicated = summary.already_existing,
            attempted = summary.attempted,
            "Campaign execution finished"
        );
        Ok(summary)
    }

    async fn resolve_targets(&self, campaign: &Campaign) -> Result<Vec<TargetUser>, StoreError> {
        match &campaign.targets {
            TargetRule::AllSubscribed => self.prefs.list_enabled_users(&campaign.category).await,
            TargetRule::Users(ids) => {
                let mut targets = Vec::with_capacity(ids.len());
                for &user_id in ids {
                    let channels = self
                        .prefs
                        .channels_for_user(user_id, &campaign.category)
                        .await?;
                    targets.push(TargetUser { user_id, channels });
                }
                Ok(targets)
            }
        }
    }
}

/// The (channel, dedupe scope) pairs one user expands to.
///
/// First-available keeps a single record on the user's top preference
/// and dedupes per user, so a refire cannot resurrect a channel the
/// record already advanced past. All-channels creates one independent
/// record per channel, deduped per channel.
fn fanout_targets<'a>(
    policy: FanoutPolicy,
    channels: &'a [String],
) -> Vec<(&'a str, DedupeScope)> {
    match policy {
        FanoutPolicy::FirstAvailable => channels
            .first()
            .map(|c| vec![(c.as_str(), DedupeScope::PerUser)])
            .unwrap_or_default(),
        FanoutPolicy::AllChannels => channels
            .iter()
            .map(|c| (c.as_str(), DedupeScope::PerChannel))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_available_expands_to_top_preference_only() {
        let chans = channels(&["push", "sms", "email"]);
        let targets = fanout_targets(FanoutPolicy::FirstAvailable, &chans);
        assert_eq!(targets, vec![("push", DedupeScope::PerUser)]);
    }

    #[test]
    fn all_channels_expands_to_every_preference() {
        let chans = channels(&["push", "sms"]);
        let targets = fanout_targets(FanoutPolicy::AllChannels, &chans);
        assert_eq!(
            targets,
            vec![
                ("push", DedupeScope::PerChannel),
                ("sms", DedupeScope::PerChannel),
            ]
        );
    }

    #[test]
    fn empty_channel_list_expands_to_nothing() {
        assert!(fanout_targets(FanoutPolicy::FirstAvailable, &[]).is_empty());
        assert!(fanout_targets(FanoutPolicy::AllChannels, &[]).is_empty());
    }

    #[test]
    fn scheduled_campaign_id_is_period_keyed() {
        let c = Campaign::scheduled("msp_updates", "2026-08-30", serde_json::json!({}));
        assert_eq!(c.id, "msp_updates:2026-08-30");
    }

    #[test]
    fn ad_hoc_campaign_ids_are_unique() {
        let a = Campaign::ad_hoc("market_alerts", serde_json::json!({}), TargetRule::AllSubscribed);
        let b = Campaign::ad_hoc("market_alerts", serde_json::json!({}), TargetRule::AllSubscribed);
        assert_ne!(a.id, b.id);
    }
}
