use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{PressroomError, Result};

/// Generate a new record identifier (UUIDv7, time-sortable, so keyset paging
/// over ids roughly follows creation order).
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// Render a timestamp in the canonical storage form.
///
/// Always UTC, millisecond precision, `Z` suffix, e.g.
/// `2024-01-01T00:00:00.000Z`. Every stored timestamp uses this exact shape so
/// that SQL string comparison (`scheduled_at <= ?`) is chronological.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse any RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PressroomError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// One addressee of a notification.
///
/// Stored embedded in the notification row as part of a JSON array, so the
/// field names here are also the on-disk format. `email` is accepted as an
/// alias of `address` for lists imported from the newsletter tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(alias = "email")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form per-recipient data forwarded to the transport untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            metadata: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(ref name) => write!(f, "{} <{}>", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Message content of a notification. Opaque to the scheduler; rendered
/// upstream by the authoring flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub subject: String,
    /// HTML body.
    pub body: String,
}

impl Payload {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}
