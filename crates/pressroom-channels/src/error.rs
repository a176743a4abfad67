use thiserror::Error;

/// Errors a transport can report for a single delivery attempt.
///
/// Every variant is non-fatal to the dispatch queue: the failure is recorded
/// against the recipient and delivery moves on.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The provider could not be reached (DNS, TLS, connection reset, …).
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The provider answered but refused the message.
    #[error("Rejected by provider (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// The provider throttled us (HTTP 429).
    #[error("Rate limited by provider, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The recipient address is unusable.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The transport configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}
