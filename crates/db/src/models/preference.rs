//! Notification preference entity models.

use agrisetu_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notification_preferences` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationPreference {
    pub id: DbId,
    pub user_id: DbId,
    /// Enabled notification categories.
    pub categories: Vec<String>,
    /// Preferred delivery channels in priority order.
    pub channels: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A delivery target resolved from the preference store: a user together
/// with their preference-ordered channel list (default policy already
/// applied for users without a stored row).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TargetUser {
    pub user_id: DbId,
    pub channels: Vec<String>,
}
