use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column (recipients) could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row violates the data model (bad timestamp, unknown status, …).
    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    /// No record with the given ID exists in the store.
    #[error("Record not found: {id}")]
    NotFound { id: String },

    /// The store connection mutex was poisoned by a panicking holder.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
