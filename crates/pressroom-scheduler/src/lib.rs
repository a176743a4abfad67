//! `pressroom-scheduler`: publishes scheduled content and delivers scheduled
//! notifications from a single Tokio polling loop over SQLite.
//!
//! # Overview
//!
//! Each tick of the [`engine::Scheduler`] loop runs two passes:
//!
//! 1. **Content.** The [`resolver::DueItemResolver`] finds every unpublished
//!    post whose `scheduled_at` has arrived and the
//!    [`publish::PublicationTransitioner`] flips each one to published with a
//!    conditional update, so concurrent publishers never double-publish.
//! 2. **Notifications.** Every `scheduled` notification that is due goes
//!    through the [`dispatch::DispatchQueue`], which delivers to each
//!    recipient in batches and marks the job `sent`.
//!
//! # Pacing
//!
//! | Setting              | Default | Applies                                  |
//! |----------------------|---------|------------------------------------------|
//! | `batch_size`         | 10      | recipients per batch                     |
//! | `recipient_delay_ms` | 500     | between recipients inside one batch      |
//! | `batch_delay_ms`     | 2000    | between consecutive batches of one job   |
//!
//! A failure in one pass is logged and never stops the other pass or the loop.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod publish;
pub mod resolver;
pub mod store;
pub mod types;

pub use dispatch::DispatchQueue;
pub use engine::{Scheduler, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use publish::{PublicationTransitioner, PublishSummary};
pub use resolver::DueItemResolver;
pub use store::{RecordStore, SqliteStore};
pub use types::{
    ContentRef, DeliveryCounts, DeliveryOutcome, DeliveryStatus, DispatchReport, JobOutcome,
    NewContent, NewNotification, NotificationJob, NotificationStatus, Page, PageCursor,
    ScheduledContent, TickReport,
};
