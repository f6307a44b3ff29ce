//! SQLite-backed [`MessageStore`] implementation.
//!
//! Schema is created on open; no separate migration step. Timestamps are
//! stored as fixed-width RFC 3339 text so `scheduled_time <= ?` works as a
//! plain text comparison.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use super::{decode_ts, encode_ts, MessageStatus, MessageStore, NewMessage, ScheduledMessage, StoreError};

/// Scheduled message schema plus the due-selection index.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scheduled_messages (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    body           TEXT NOT NULL,
    channel        TEXT NOT NULL,
    scheduled_time TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_due
    ON scheduled_messages (status, scheduled_time);
";

/// Raw row shape as read from SQLite.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    body: String,
    channel: String,
    scheduled_time: String,
    status: String,
    created_at: String,
    updated_at: String,
}

fn message_from_row(row: MessageRow) -> Result<ScheduledMessage, StoreError> {
    Ok(ScheduledMessage {
        id: row.id,
        body: row.body,
        channel: row.channel,
        scheduled_time: decode_ts("scheduled_time", &row.scheduled_time)?,
        status: MessageStatus::parse(&row.status)?,
        created_at: decode_ts("created_at", &row.created_at)?,
        updated_at: decode_ts("updated_at", &row.updated_at)?,
    })
}

/// Message store backed by a shared [`SqlitePool`].
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    db: SqlitePool,
}

impl SqliteMessageStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns a database error if the file cannot be opened or the schema
    /// cannot be created.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let db = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(db).await
    }

    /// Wrap an existing pool (shared with the OAuth stores) and ensure the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns a database error if the schema cannot be created.
    pub async fn with_pool(db: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&db).await?;
        }
        debug!("scheduled message schema ensured");
        Ok(Self { db })
    }

    /// The underlying pool, for collaborators sharing the same database file.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, msg: NewMessage) -> Result<ScheduledMessage, StoreError> {
        if msg.body.trim().is_empty() {
            return Err(StoreError::InvalidMessage("body must be non-empty"));
        }
        if msg.channel.trim().is_empty() {
            return Err(StoreError::InvalidMessage("channel must be non-empty"));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO scheduled_messages (body, channel, scheduled_time, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&msg.body)
        .bind(&msg.channel)
        .bind(encode_ts(msg.scheduled_time))
        .bind(MessageStatus::Pending.as_str())
        .bind(encode_ts(now))
        .bind(encode_ts(now))
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, channel = %msg.channel, "scheduled message inserted");
        self.get(id).await
    }

    async fn get(&self, id: i64) -> Result<ScheduledMessage, StoreError> {
        let row: MessageRow = sqlx::query_as(
            "SELECT id, body, channel, scheduled_time, status, created_at, updated_at \
             FROM scheduled_messages WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        message_from_row(row)
    }

    async fn list(&self) -> Result<Vec<ScheduledMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, body, channel, scheduled_time, status, created_at, updated_at \
             FROM scheduled_messages ORDER BY scheduled_time DESC",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, body, channel, scheduled_time, status, created_at, updated_at \
             FROM scheduled_messages \
             WHERE status = 'pending' AND scheduled_time <= ?1 \
             ORDER BY scheduled_time ASC",
        )
        .bind(encode_ts(now))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn transition(&self, id: i64, to: MessageStatus) -> Result<bool, StoreError> {
        if !to.is_terminal() {
            return Err(StoreError::InvalidTransition(to));
        }

        // Compare-and-swap: only a still-pending row transitions, so an
        // overlapping run cannot claim a message twice.
        let result = sqlx::query(
            "UPDATE scheduled_messages SET status = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'pending'",
        )
        .bind(to.as_str())
        .bind(encode_ts(Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
