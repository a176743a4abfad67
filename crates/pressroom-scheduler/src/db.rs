use rusqlite::Connection;

use crate::error::Result;

/// GLOB for `YYYY-MM-DDTHH:MM:SS.mmmZ`. A NULL `scheduled_at` means not scheduled.
const CANONICAL: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9]Z";

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `posts` and `notifications` tables (idempotent) with indexes
/// covering the two due queries, so each tick stays an index range scan even
/// with a large back catalogue.
///
/// All timestamps are RFC 3339 UTC text in the fixed form produced by
/// `pressroom_core::types::format_timestamp`; the due queries compare them as
/// strings. `CHECK` constraints refuse any other shape for the compared
/// columns, since e.g. `+02:00` offsets would sort wrongly.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS posts (
            id            TEXT    NOT NULL PRIMARY KEY,
            title         TEXT    NOT NULL,
            slug          TEXT    NOT NULL,
            scheduled_at  TEXT CHECK (scheduled_at IS NULL OR scheduled_at GLOB '{CANONICAL}'),
            published     INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        -- Due content: WHERE published = 0 AND scheduled_at <= ?
        CREATE INDEX IF NOT EXISTS idx_posts_due ON posts (published, scheduled_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id               TEXT    NOT NULL PRIMARY KEY,
            title            TEXT    NOT NULL,
            status           TEXT    NOT NULL DEFAULT 'draft',
            scheduled_at     TEXT CHECK (scheduled_at IS NULL OR scheduled_at GLOB '{CANONICAL}'),
            subject          TEXT    NOT NULL,
            body             TEXT    NOT NULL,
            recipients       TEXT    NOT NULL DEFAULT '[]',  -- JSON array of Recipient
            sent_at          TEXT CHECK (sent_at IS NULL OR sent_at GLOB '{CANONICAL}'),
            delivered_count  INTEGER,
            failed_count     INTEGER,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        -- Due notifications: WHERE status = 'scheduled' AND scheduled_at <= ?
        CREATE INDEX IF NOT EXISTS idx_notifications_due
            ON notifications (status, scheduled_at);
        "
    ))?;
    Ok(())
}
