use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use pressroom_core::types::{format_timestamp, new_record_id, parse_timestamp};
use pressroom_core::{Payload, Recipient};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{
        ContentRef, DeliveryCounts, NewContent, NewNotification, NotificationJob,
        NotificationStatus, Page, PageCursor, ScheduledContent,
    },
};

/// The record store as seen by the scheduler.
///
/// Four operations are all the core needs: two due queries (paged by a keyset
/// cursor) and two state transitions. Implementations must be safe to call
/// from the scheduler task; calls are short and synchronous.
pub trait RecordStore: Send + Sync {
    /// Unpublished content with `scheduled_at <= now`, ordered by id.
    fn query_due_content(&self, now: DateTime<Utc>, cursor: &PageCursor)
        -> Result<Page<ContentRef>>;

    /// Set `published = true, updated_at = now` only if still unpublished.
    ///
    /// Returns whether a row changed. `false` means someone else (a manual
    /// publish or an earlier tick) got there first.
    fn try_publish(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Notifications with `status = Scheduled AND scheduled_at <= now`, ordered by id.
    fn query_due_notifications(
        &self,
        now: DateTime<Utc>,
        cursor: &PageCursor,
    ) -> Result<Page<NotificationJob>>;

    /// Terminal write: `status = Sent, sent_at = now` plus informational
    /// counts. Unconditional on the current status. Returns whether the row
    /// still existed.
    fn mark_sent(&self, id: &str, now: DateTime<Utc>, counts: DeliveryCounts) -> Result<bool>;
}

/// SQLite-backed [`RecordStore`], plus the authoring helpers used by the CLI
/// and by tests.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

// Column lists shared by the queries below; keep in sync with the decoders.
const POST_COLUMNS: &str = "id, title, slug, scheduled_at, published, created_at, updated_at";
const NOTIFICATION_COLUMNS: &str = "id, title, status, scheduled_at, subject, body, recipients,
     sent_at, delivered_count, failed_count";

type NotificationRow = (
    String,         // id
    String,         // title
    String,         // status
    Option<String>, // scheduled_at
    String,         // subject
    String,         // body
    String,         // recipients JSON
    Option<String>, // sent_at
    Option<u32>,    // delivered_count
    Option<u32>,    // failed_count
);

type PostRow = (
    String,         // id
    String,         // title
    String,         // slug
    Option<String>, // scheduled_at
    bool,           // published
    String,         // created_at
    String,         // updated_at
);

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Create a content item, unpublished.
    pub fn insert_content(&self, new: &NewContent) -> Result<ScheduledContent> {
        let conn = self.lock()?;
        let now = Utc::now();
        let now_str = format_timestamp(now);
        let id = new_record_id();
        let scheduled = new.scheduled_at.map(format_timestamp);

        conn.execute(
            "INSERT INTO posts (id, title, slug, scheduled_at, published, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![id, new.title, new.slug, scheduled, now_str],
        )?;
        info!(content_id = %id, title = %new.title, scheduled_at = ?scheduled, "content created");

        Ok(ScheduledContent {
            id,
            title: new.title.clone(),
            slug: new.slug.clone(),
            scheduled_at: new.scheduled_at,
            published: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Create a notification job. A `Scheduled` job must carry `scheduled_at`.
    pub fn insert_notification(&self, new: &NewNotification) -> Result<NotificationJob> {
        let id = new_record_id();
        if new.status == NotificationStatus::Scheduled && new.scheduled_at.is_none() {
            return Err(SchedulerError::InvalidRecord {
                id,
                reason: "scheduled notification without scheduled_at".to_string(),
            });
        }
        if new.status == NotificationStatus::Sent {
            return Err(SchedulerError::InvalidRecord {
                id,
                reason: "notifications cannot be created in the sent state".to_string(),
            });
        }

        let conn = self.lock()?;
        let now_str = format_timestamp(Utc::now());
        let recipients_json = serde_json::to_string(&new.recipients)?;

        conn.execute(
            "INSERT INTO notifications
             (id, title, status, scheduled_at, subject, body, recipients,
              sent_at, delivered_count, failed_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, NULL, ?8, ?8)",
            params![
                id,
                new.title,
                new.status.to_string(),
                new.scheduled_at.map(format_timestamp),
                new.payload.subject,
                new.payload.body,
                recipients_json,
                now_str,
            ],
        )?;
        info!(
            job_id = %id,
            status = %new.status,
            recipients = new.recipients.len(),
            "notification created"
        );

        Ok(NotificationJob {
            id,
            title: new.title.clone(),
            status: new.status,
            scheduled_at: new.scheduled_at,
            payload: new.payload.clone(),
            recipients: new.recipients.clone(),
            sent_at: None,
            delivered_count: None,
            failed_count: None,
        })
    }

    pub fn get_content(&self, id: &str) -> Result<ScheduledContent> {
        let conn = self.lock()?;
        let row: Option<PostRow> = conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                [id],
                read_post_row,
            )
            .optional()?;
        match row {
            Some(row) => decode_post(row),
            None => Err(SchedulerError::NotFound { id: id.to_string() }),
        }
    }

    pub fn get_notification(&self, id: &str) -> Result<NotificationJob> {
        let conn = self.lock()?;
        let row: Option<NotificationRow> = conn
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                [id],
                read_notification_row,
            )
            .optional()?;
        match row {
            Some(row) => decode_notification(row),
            None => Err(SchedulerError::NotFound { id: id.to_string() }),
        }
    }

    /// Manual, user-initiated publish.
    ///
    /// Goes through the same conditional update as the scheduler, so the two
    /// can never both "win" for one item. Returns `Ok(false)` when the item
    /// was already published.
    pub fn publish_now(&self, id: &str) -> Result<bool> {
        if self.try_publish(id, Utc::now())? {
            info!(content_id = %id, "content published manually");
            return Ok(true);
        }
        // Distinguish "already published" from "no such item".
        self.get_content(id).map(|_| false)
    }

    /// Unpublished content scheduled strictly after `now`, soonest first.
    pub fn upcoming_content(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ContentRef>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, title, slug, scheduled_at FROM posts
             WHERE published = 0 AND scheduled_at IS NOT NULL AND scheduled_at > ?1
             ORDER BY scheduled_at ASC
             LIMIT ?2",
        )?;
        let rows: Vec<(String, String, String, String)> = stmt
            .query_map(params![format_timestamp(now), limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        rows.into_iter().map(decode_content_ref).collect()
    }
}

impl RecordStore for SqliteStore {
    fn query_due_content(
        &self,
        now: DateTime<Utc>,
        cursor: &PageCursor,
    ) -> Result<Page<ContentRef>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, title, slug, scheduled_at FROM posts
             WHERE published = 0
               AND scheduled_at IS NOT NULL
               AND scheduled_at <= ?1
               AND id > ?2
             ORDER BY id
             LIMIT ?3",
        )?;
        let rows: Vec<(String, String, String, String)> = stmt
            .query_map(
                params![
                    format_timestamp(now),
                    cursor.after.as_deref().unwrap_or(""),
                    cursor.limit as i64
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?
            .collect::<rusqlite::Result<_>>()?;

        let next = next_cursor(rows.len(), cursor.limit, rows.last().map(|r| r.0.clone()));
        let items = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.0.clone();
                decode_content_ref(row)
                    .map_err(|e| error!(content_id = %id, "skipping undecodable post: {e}"))
                    .ok()
            })
            .collect();
        Ok(Page { items, next })
    }

    fn try_publish(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE posts SET published = 1, updated_at = ?1
             WHERE id = ?2 AND published = 0",
            params![format_timestamp(now), id],
        )?;
        Ok(n == 1)
    }

    fn query_due_notifications(
        &self,
        now: DateTime<Utc>,
        cursor: &PageCursor,
    ) -> Result<Page<NotificationJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE status = 'scheduled'
               AND scheduled_at IS NOT NULL
               AND scheduled_at <= ?1
               AND id > ?2
             ORDER BY id
             LIMIT ?3"
        ))?;
        let rows: Vec<NotificationRow> = stmt
            .query_map(
                params![
                    format_timestamp(now),
                    cursor.after.as_deref().unwrap_or(""),
                    cursor.limit as i64
                ],
                read_notification_row,
            )?
            .collect::<rusqlite::Result<_>>()?;

        let next = next_cursor(rows.len(), cursor.limit, rows.last().map(|r| r.0.clone()));
        let items = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.0.clone();
                decode_notification(row)
                    .map_err(|e| error!(job_id = %id, "skipping undecodable notification: {e}"))
                    .ok()
            })
            .collect();
        Ok(Page { items, next })
    }

    fn mark_sent(&self, id: &str, now: DateTime<Utc>, counts: DeliveryCounts) -> Result<bool> {
        let conn = self.lock()?;
        let now_str = format_timestamp(now);
        let n = conn.execute(
            "UPDATE notifications
             SET status = 'sent', sent_at = ?1, delivered_count = ?2,
                 failed_count = ?3, updated_at = ?1
             WHERE id = ?4",
            params![now_str, counts.delivered, counts.failed, id],
        )?;
        Ok(n == 1)
    }
}

// --- row decoding ----------------------------------------------------------

fn next_cursor(rows_read: usize, limit: usize, last_id: Option<String>) -> Option<String> {
    if rows_read < limit {
        None
    } else {
        last_id
    }
}

fn timestamp(id: &str, value: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value).map_err(|e| SchedulerError::InvalidRecord {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn optional_timestamp(id: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| timestamp(id, &v)).transpose()
}

fn decode_content_ref(row: (String, String, String, String)) -> Result<ContentRef> {
    let (id, title, slug, scheduled_at) = row;
    let scheduled_at = timestamp(&id, &scheduled_at)?;
    Ok(ContentRef {
        id,
        title,
        slug,
        scheduled_at,
    })
}

fn read_post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_post(row: PostRow) -> Result<ScheduledContent> {
    let (id, title, slug, scheduled_at, published, created_at, updated_at) = row;
    Ok(ScheduledContent {
        scheduled_at: optional_timestamp(&id, scheduled_at)?,
        created_at: timestamp(&id, &created_at)?,
        updated_at: timestamp(&id, &updated_at)?,
        id,
        title,
        slug,
        published,
    })
}

fn read_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn decode_notification(row: NotificationRow) -> Result<NotificationJob> {
    let (
        id,
        title,
        status,
        scheduled_at,
        subject,
        body,
        recipients_json,
        sent_at,
        delivered_count,
        failed_count,
    ) = row;

    let status: NotificationStatus = status
        .parse()
        .map_err(|reason| SchedulerError::InvalidRecord {
            id: id.clone(),
            reason,
        })?;
    let recipients: Vec<Recipient> =
        serde_json::from_str(&recipients_json).map_err(|e| SchedulerError::InvalidRecord {
            id: id.clone(),
            reason: format!("bad recipients JSON: {e}"),
        })?;

    Ok(NotificationJob {
        scheduled_at: optional_timestamp(&id, scheduled_at)?,
        sent_at: optional_timestamp(&id, sent_at)?,
        id,
        title,
        status,
        payload: Payload { subject, body },
        recipients,
        delivered_count,
        failed_count,
    })
}
