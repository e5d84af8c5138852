//! AgriSetu notification scheduling and delivery pipeline.
//!
//! This crate provides the background machinery that turns periodic
//! campaign triggers into per-user deliveries with bounded retries:
//!
//! - [`adapter`] — the [`ChannelAdapter`](adapter::ChannelAdapter)
//!   capability trait and adapter registry.
//! - [`store`] — record/preference/summary store traits; the only
//!   mutation surface for delivery records.
//! - [`memory`] — in-memory store implementations for tests and
//!   single-node development.
//! - [`postgres`] — production store implementations over `agrisetu-db`.
//! - [`orchestrator`] — the send-with-retry state machine driver.
//! - [`campaign`] — campaign expansion and bounded-concurrency submission.
//! - [`sweep`] — periodic rescue of retryable and orphaned records.
//! - [`analytics`] — read-only delivery rollups.
//! - [`scheduler`] — the fixed set of independent periodic triggers.
//! - [`channels`] — concrete SMS/push/email adapters.

pub mod adapter;
pub mod analytics;
pub mod campaign;
pub mod channels;
pub mod memory;
pub mod orchestrator;
pub mod postgres;
pub mod scheduler;
pub mod store;
pub mod sweep;

pub use adapter::{AdapterRegistry, ChannelAdapter, OutboundMessage, SendOutcome};
pub use campaign::{Campaign, CampaignExecutor, CampaignSummary, TargetRule};
pub use orchestrator::{AttemptOutcome, DeliveryOrchestrator, PausedChannels};
pub use scheduler::{NotificationScheduler, ScheduleConfig};
pub use store::{PreferenceStore, RecordStore, StoreError, SummaryStore};
pub use sweep::RetrySweep;
