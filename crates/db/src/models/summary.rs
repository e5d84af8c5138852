//! Delivery analytics models.

use agrisetu_core::status::DeliveryStatus;
use serde::Serialize;
use sqlx::FromRow;

/// One aggregated bucket of notification records.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct StatusCount {
    pub category: String,
    pub channel: String,
    pub status: DeliveryStatus,
    pub record_count: i64,
}
