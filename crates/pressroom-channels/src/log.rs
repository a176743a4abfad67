//! Dry-run transport: logs each delivery and reports success.

use async_trait::async_trait;
use pressroom_core::{Payload, Recipient};
use tracing::info;

use crate::{error::DeliveryError, transport::Transport};

pub struct LogTransport {
    sender: String,
}

impl LogTransport {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, recipient: &Recipient, payload: &Payload) -> Result<(), DeliveryError> {
        if recipient.address.trim().is_empty() {
            return Err(DeliveryError::InvalidRecipient("empty address".to_string()));
        }
        info!(
            from = %self.sender,
            to = %recipient,
            subject = %payload.subject,
            body_bytes = payload.body.len(),
            "dry-run delivery"
        );
        Ok(())
    }
}
