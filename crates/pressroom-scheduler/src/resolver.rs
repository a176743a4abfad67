use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    error::Result,
    store::RecordStore,
    types::{ContentRef, NotificationJob, Page, PageCursor},
};

/// Translates "now" into the two due sets.
///
/// Queries are paged for resource control, but a call always drains every
/// page: nothing that is due at call time is left for a later tick.
pub struct DueItemResolver {
    store: Arc<dyn RecordStore>,
    page_size: usize,
}

impl DueItemResolver {
    pub fn new(store: Arc<dyn RecordStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Every unpublished content item with `scheduled_at <= now`.
    pub fn due_content(&self, now: DateTime<Utc>) -> Result<Vec<ContentRef>> {
        let items = drain_pages(self.page_size, |cursor| {
            self.store.query_due_content(now, cursor)
        })?;
        debug!(count = items.len(), "due content resolved");
        Ok(items)
    }

    /// Every `Scheduled` notification with `scheduled_at <= now`.
    pub fn due_notifications(&self, now: DateTime<Utc>) -> Result<Vec<NotificationJob>> {
        let items = drain_pages(self.page_size, |cursor| {
            self.store.query_due_notifications(now, cursor)
        })?;
        debug!(count = items.len(), "due notifications resolved");
        Ok(items)
    }
}

/// Follow `next` cursors until the store reports exhaustion.
///
/// Any page failure fails the whole call: a partial due set is never returned.
fn drain_pages<T>(
    page_size: usize,
    mut fetch: impl FnMut(&PageCursor) -> Result<Page<T>>,
) -> Result<Vec<T>> {
    let mut cursor = PageCursor::first(page_size);
    let mut out = Vec::new();

    loop {
        let page = fetch(&cursor)?;
        out.extend(page.items);
        match page.next {
            // A store that hands back the cursor it was given would loop forever.
            Some(next) if cursor.after.as_deref() == Some(next.as_str()) => {
                warn!(cursor = %next, "store returned a non-advancing cursor; stopping");
                break;
            }
            Some(next) => cursor.after = Some(next),
            None => break,
        }
    }

    Ok(out)
}
