//! HTTP transport for bulk-mail providers.
//!
//! One POST per recipient:
//!
//! ```json
//! {"from": "...", "to": "...", "to_name": null, "subject": "...", "html": "...", "metadata": null}
//! ```
//!
//! Auth is an optional bearer token; when a signing secret is configured the
//! raw body is signed with HMAC-SHA256 and sent as
//! `X-Pressroom-Signature: sha256=<hex>` so the relay can verify the sender.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use pressroom_core::config::TransportConfig;
use pressroom_core::{Payload, Recipient};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::{error::DeliveryError, transport::Transport};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-pressroom-signature";

/// Fallback when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_MS: u64 = 5_000;

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    signing_secret: Option<String>,
    sender: String,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    to_name: Option<&'a str>,
    subject: &'a str,
    html: &'a str,
    metadata: Option<&'a serde_json::Value>,
}

impl HttpTransport {
    pub fn from_config(config: &TransportConfig) -> Result<Self, DeliveryError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            DeliveryError::ConfigError("transport.endpoint is required for kind = \"http\"".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DeliveryError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            signing_secret: config.signing_secret.clone(),
            sender: config.sender.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn build_body(&self, recipient: &Recipient, payload: &Payload) -> Result<Vec<u8>, DeliveryError> {
        let req = SendRequest {
            from: &self.sender,
            to: &recipient.address,
            to_name: recipient.name.as_deref(),
            subject: &payload.subject,
            html: &payload.body,
            metadata: recipient.metadata.as_ref(),
        };
        serde_json::to_vec(&req).map_err(|e| DeliveryError::ConfigError(e.to_string()))
    }
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DeliveryError::ConfigError("invalid HMAC key length".to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, recipient: &Recipient, payload: &Payload) -> Result<(), DeliveryError> {
        if !recipient.address.contains('@') {
            return Err(DeliveryError::InvalidRecipient(recipient.address.clone()));
        }

        let body = self.build_body(recipient, payload)?;
        let mut req = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(ref secret) = self.signing_secret {
            req = req.header(SIGNATURE_HEADER, sign_body(secret, &body)?);
        }

        debug!(to = %recipient.address, "posting message to provider");

        let resp = req.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout {
                    ms: self.timeout_ms,
                }
            } else {
                DeliveryError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS);
            return Err(DeliveryError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, to = %recipient.address, "provider rejected message");
            return Err(DeliveryError::Rejected { status, body: text });
        }

        Ok(())
    }
}
