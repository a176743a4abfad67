use thiserror::Error;

#[derive(Debug, Error)]
pub enum PressroomError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PressroomError {
    /// Short machine-readable code, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            PressroomError::Config(_) => "CONFIG_ERROR",
            PressroomError::InvalidTimestamp { .. } => "INVALID_TIMESTAMP",
            PressroomError::Serialization(_) => "SERIALIZATION_ERROR",
            PressroomError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PressroomError>;
