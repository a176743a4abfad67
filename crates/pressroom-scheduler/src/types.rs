use chrono::{DateTime, Utc};
use pressroom_core::{Payload, Recipient};
use serde::{Deserialize, Serialize};

/// A content item that is due for publication, as returned by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub scheduled_at: DateTime<Utc>,
}

/// A persisted content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledContent {
    /// UUIDv7 string; primary key.
    pub id: String,
    pub title: String,
    pub slug: String,
    /// When the scheduler should publish it; `None` for unscheduled drafts.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Flips false → true exactly once; never reset by the scheduler.
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a content item.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub title: String,
    pub slug: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a notification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Being authored; never picked up by the scheduler.
    Draft,
    /// Waiting for `scheduled_at`.
    Scheduled,
    /// Terminal: every recipient was attempted once.
    Sent,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationStatus::Draft => "draft",
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Sent => "sent",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(NotificationStatus::Draft),
            "scheduled" => Ok(NotificationStatus::Scheduled),
            "sent" => Ok(NotificationStatus::Sent),
            other => Err(format!("unknown notification status: {other}")),
        }
    }
}

/// One logical message addressed to many recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: String,
    /// Internal label, never sent.
    pub title: String,
    pub status: NotificationStatus,
    /// Required while `status` is `Scheduled`.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub payload: Payload,
    /// Delivery order is list order.
    pub recipients: Vec<Recipient>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Informational counts written with the terminal status.
    pub delivered_count: Option<u32>,
    pub failed_count: Option<u32>,
}

/// Input for creating a notification job.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub status: NotificationStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub payload: Payload,
    pub recipients: Vec<Recipient>,
}

/// Keyset paging position for the due queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Only rows with `id > after` are returned; `None` starts from the beginning.
    pub after: Option<String>,
    pub limit: usize,
}

impl PageCursor {
    pub fn first(limit: usize) -> Self {
        Self { after: None, limit }
    }
}

/// One page of a due query.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` once the result set is exhausted.
    ///
    /// Derived from the last *row* read, not the last decoded item, so rows
    /// that fail to decode never cut paging short.
    pub next: Option<String>,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

/// Per-recipient outcome. Transient: only the counts are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub address: String,
    pub status: DeliveryStatus,
    /// Transport error text when `status` is `Failed`.
    pub reason: Option<String>,
}

/// Counts attached to the terminal `Sent` write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub delivered: u32,
    pub failed: u32,
}

/// Everything that happened while delivering one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    pub job_id: String,
    pub attempted: u32,
    pub delivered: u32,
    pub failed: u32,
    pub batches: u32,
    pub inter_batch_pauses: u32,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn counts(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.delivered,
            failed: self.failed,
        }
    }

    pub(crate) fn record(&mut self, outcome: DeliveryOutcome) {
        self.attempted += 1;
        match outcome.status {
            DeliveryStatus::Delivered => self.delivered += 1,
            DeliveryStatus::Failed => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// How a job left the dispatch queue.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// All recipients attempted and the terminal write succeeded.
    Sent(DispatchReport),
    /// Nothing to deliver; left `Scheduled` without a terminal write.
    NoRecipients,
    /// All recipients attempted but the terminal write failed or hit no row.
    /// The job is still `Scheduled` and will be fully re-dispatched.
    Unsettled(DispatchReport),
}

/// Summary of one scheduler tick, logged as a single line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub content_due: u32,
    pub published: u32,
    pub already_published: u32,
    pub publish_failed: u32,
    pub notifications_due: u32,
    pub notifications_sent: u32,
    pub notifications_skipped: u32,
    pub notifications_unsettled: u32,
    pub recipients_delivered: u32,
    pub recipients_failed: u32,
    /// Due queries that failed (0, 1 or 2: one per item class).
    pub resolver_errors: u32,
    /// The tick stopped before the notification pass finished because of shutdown.
    pub interrupted: bool,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.content_due == 0 && self.notifications_due == 0 && self.resolver_errors == 0
    }
}
