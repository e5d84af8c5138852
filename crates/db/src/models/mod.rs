//! Row models and DTOs for the notification pipeline tables.

pub mod preference;
pub mod record;
pub mod summary;

pub use preference::{NotificationPreference, TargetUser};
pub use record::{NewNotificationRecord, NotificationRecord};
pub use summary::StatusCount;
