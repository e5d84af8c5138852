//! Repository layer: one unit struct per table.

pub mod preference_repo;
pub mod record_repo;
pub mod summary_repo;

pub use preference_repo::PreferenceRepo;
pub use record_repo::NotificationRecordRepo;
pub use summary_repo::DeliverySummaryRepo;
