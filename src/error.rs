//! Error types for attention tracking

use thiserror::Error;

/// Errors surfaced to page controllers and tooling.
///
/// Delivery failures are not here; see [`crate::delivery::DeliveryError`].
#[derive(Debug, Error)]
pub enum AttentionError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid event on line {line}: {reason}")]
    InvalidEvent { line: usize, reason: String },

    /// `step` is the one-based position in the step list
    #[error("Step {step} at {at_ms} ms is earlier than {previous_ms} ms")]
    OutOfOrder {
        step: usize,
        at_ms: i64,
        previous_ms: i64,
    },

    #[error("Unknown page: {0}")]
    UnknownPage(String),

    #[error("No passage assigned at index {0}")]
    MissingPassage(usize),
}
