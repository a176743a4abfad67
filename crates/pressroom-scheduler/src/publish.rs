use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::{store::RecordStore, types::ContentRef};

/// Tally of one content pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: u32,
    /// Conditional update matched no row: published elsewhere in the meantime.
    pub already_published: u32,
    /// Store errors; these items stay unpublished and come back next tick.
    pub failed: u32,
}

/// Flips due content to published, once.
pub struct PublicationTransitioner {
    store: Arc<dyn RecordStore>,
}

impl PublicationTransitioner {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Publish every item in `due`, independently and in the given order.
    ///
    /// A failure on one item is logged and counted; the rest still run.
    pub fn publish_all(&self, due: &[ContentRef], now: DateTime<Utc>) -> PublishSummary {
        let mut summary = PublishSummary::default();

        for item in due {
            match self.store.try_publish(&item.id, now) {
                Ok(true) => {
                    info!(
                        content_id = %item.id,
                        title = %item.title,
                        scheduled_at = %item.scheduled_at,
                        "scheduled content published"
                    );
                    summary.published += 1;
                }
                Ok(false) => {
                    debug!(content_id = %item.id, "content already published; skipping");
                    summary.already_published += 1;
                }
                Err(e) => {
                    error!(content_id = %item.id, error = %e, "failed to publish scheduled content");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
