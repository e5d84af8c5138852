//! AgriSetu domain types shared across the notification pipeline.
//!
//! This crate has zero internal dependencies so it can be used by the
//! data-access layer, the notification services, and any future CLI
//! tooling alike. It holds:
//!
//! - [`types`] — database id and timestamp aliases.
//! - [`error`] — the shared [`CoreError`](error::CoreError) type.
//! - [`channel`] — well-known delivery channel name constants.
//! - [`category`] — notification categories and their fanout policies.
//! - [`status`] — the delivery record state machine.
//! - [`retry`] — retry bounds and backoff computation.

pub mod category;
pub mod channel;
pub mod error;
pub mod retry;
pub mod status;
pub mod types;

pub use error::CoreError;
pub use retry::RetryPolicy;
pub use status::DeliveryStatus;
