/// Domain-level error for the core types.
///
/// Store and transport failures have their own error types closer to
/// where they occur; this covers validation of domain values (status
/// strings, categories) shared across the crates.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}
