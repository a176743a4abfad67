use std::sync::Arc;

use async_trait::async_trait;
use pressroom_core::config::{TransportConfig, TransportKind};
use pressroom_core::{Payload, Recipient};
use tracing::info;

use crate::{error::DeliveryError, http::HttpTransport, log::LogTransport};

/// Delivers one notification payload to one recipient.
///
/// Implementations must be `Send + Sync` so a single instance can be shared
/// with the scheduler task. Rate limiting is not the transport's job: the
/// dispatch queue paces calls, a transport just makes one attempt per call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable lowercase identifier for this transport (e.g. `"http"`), used in logs.
    fn name(&self) -> &str;

    /// Attempt a single delivery. No retries happen inside this call.
    async fn deliver(&self, recipient: &Recipient, payload: &Payload) -> Result<(), DeliveryError>;
}

/// Build the transport selected by `[transport] kind`.
pub fn build_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>, DeliveryError> {
    let transport: Arc<dyn Transport> = match config.kind {
        TransportKind::Log => Arc::new(LogTransport::new(config.sender.clone())),
        TransportKind::Http => Arc::new(HttpTransport::from_config(config)?),
    };
    info!(transport = %transport.name(), "delivery transport ready");
    Ok(transport)
}
