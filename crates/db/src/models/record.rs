//! Notification record entity model and DTOs.

use agrisetu_core::status::DeliveryStatus;
use agrisetu_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notification_records` table.
///
/// One row is one delivery attempt lineage for a (campaign, user, channel)
/// target. For first-available categories the `channel` column advances to
/// the next preferred channel on permanent per-channel failure, so the row
/// stays the single source of truth for the whole fallback sequence.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationRecord {
    pub id: DbId,
    /// Period-keyed campaign identity, e.g. `msp_updates:2026-08-30`.
    pub campaign_id: String,
    pub user_id: DbId,
    pub category: String,
    pub channel: String,
    pub status: DeliveryStatus,
    /// Number of completed delivery attempts (successful or not).
    pub attempt_count: i32,
    /// Message content reference; kept on the record so retries survive
    /// a process restart.
    pub payload: serde_json::Value,
    /// Appended history of failure reasons, oldest first.
    pub error_detail: Option<String>,
    pub last_attempt_at: Option<Timestamp>,
    /// Set if and only if `status` is `retrying`.
    pub next_retry_at: Option<Timestamp>,
    /// In-flight attempt lease; cleared by every attempt-outcome transition.
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// DTO for creating a pending record.
#[derive(Debug, Clone)]
pub struct NewNotificationRecord {
    pub campaign_id: String,
    pub user_id: DbId,
    pub category: String,
    pub channel: String,
    pub payload: serde_json::Value,
}
