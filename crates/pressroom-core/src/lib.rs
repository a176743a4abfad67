//! Shared building blocks for the Pressroom workspace: configuration loading,
//! the top-level error type, and value types passed between the scheduler and
//! the delivery transports.

pub mod config;
pub mod error;
pub mod types;

pub use config::PressroomConfig;
pub use error::{PressroomError, Result};
pub use types::{Payload, Recipient};
