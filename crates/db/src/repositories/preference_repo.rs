//! Repository for the `notification_preferences` table.

use sqlx::PgPool;

use agrisetu_core::channel::DEFAULT_CHANNEL;
use agrisetu_core::types::DbId;

use crate::models::preference::{NotificationPreference, TargetUser};

/// Column list for `notification_preferences` queries.
const COLUMNS: &str = "id, user_id, categories, channels, created_at, updated_at";

/// Provides read operations for notification preferences.
///
/// The pipeline only reads preferences; writes belong to the account/API
/// layer that owns user-facing settings.
pub struct PreferenceRepo;

impl PreferenceRepo {
    /// Get the stored preference row for a user, if any.
    pub async fn get_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<NotificationPreference>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notification_preferences WHERE user_id = $1");
        sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// List every user that should receive `category` notifications,
    /// together with their preference-ordered channel list.
    ///
    /// The default policy is applied in SQL: users without a preference
    /// row are included with every category enabled and the single
    /// default channel. The `users` table is owned by the account
    /// service and joined read-only.
    pub async fn list_enabled_users(
        pool: &PgPool,
        category: &str,
    ) -> Result<Vec<TargetUser>, sqlx::Error> {
        sqlx::query_as::<_, TargetUser>(
            "SELECT u.id AS user_id, \
                    COALESCE(p.channels, ARRAY[$2::text]) AS channels \
             FROM users u \
             LEFT JOIN notification_preferences p ON p.user_id = u.id \
             WHERE p.user_id IS NULL OR $1 = ANY(p.categories) \
             ORDER BY u.id",
        )
        .bind(category)
        .bind(DEFAULT_CHANNEL)
        .fetch_all(pool)
        .await
    }
}
