//! Scheduled message persistence.
//!
//! Defines the [`ScheduledMessage`] entity, its [`MessageStatus`] lifecycle,
//! and the [`MessageStore`] trait the dispatch engine depends on. The only
//! production implementation is [`sqlite::SqliteMessageStore`]; tests
//! substitute in-memory fakes at the trait boundary.
//!
//! Status lifecycle: `pending → sent` or `pending → failed`, both terminal.
//! No automatic retry — a `failed` message stays failed until explicitly
//! rescheduled by the CRUD layer.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub mod sqlite;

pub use sqlite::SqliteMessageStore;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Delivery status of a scheduled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting for its scheduled time; the sole non-terminal state.
    Pending,
    /// Delivered to the platform. Terminal.
    Sent,
    /// Delivery attempted and failed. Terminal.
    Failed,
}

impl MessageStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidEnum {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }

    /// Whether this status ends the message lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A message queued for future delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    /// Database row id, assigned at creation, immutable.
    pub id: i64,
    /// Text content to deliver. Never empty.
    pub body: String,
    /// Destination channel: a bare name, `#name`, `@user`, or a platform id.
    pub channel: String,
    /// Earliest instant at which delivery is permitted.
    pub scheduled_time: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: MessageStatus,
    /// Creation timestamp (bookkeeping only).
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp (bookkeeping only).
    pub updated_at: DateTime<Utc>,
}

impl ScheduledMessage {
    /// Whether this message is due for delivery at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Pending && self.scheduled_time <= now
    }
}

/// Fields for creating a new scheduled message (`status` starts `pending`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Text content. Must be non-empty.
    pub body: String,
    /// Destination channel.
    pub channel: String,
    /// Earliest delivery instant.
    pub scheduled_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from message store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No message with the requested id exists.
    #[error("message {0} not found")]
    NotFound(i64),

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// A timestamp column held text that is not RFC 3339.
    #[error("invalid {field} timestamp: {value:?}")]
    InvalidTimestamp {
        /// Which column contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// The message fails validation (e.g. empty body).
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// A transition targeted a non-terminal status.
    #[error("cannot transition a message back to {0:?}")]
    InvalidTransition(MessageStatus),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Persistence contract for scheduled messages.
///
/// The dispatch engine only needs [`find_due`](MessageStore::find_due) and
/// [`transition`](MessageStore::transition); the remaining operations back
/// the CRUD-lite CLI and the manual send path.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new message with `status = pending`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidMessage`] when the body is empty, or a
    /// database error.
    async fn insert(&self, msg: NewMessage) -> Result<ScheduledMessage, StoreError>;

    /// Fetch a single message by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no row matches.
    async fn get(&self, id: i64) -> Result<ScheduledMessage, StoreError>;

    /// List all messages, newest scheduled first (observability only).
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    async fn list(&self) -> Result<Vec<ScheduledMessage>, StoreError>;

    /// Select all due messages: `status = pending` and `scheduled_time <= now`,
    /// ordered by ascending `scheduled_time`.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, StoreError>;

    /// Conditionally transition a message out of `pending`.
    ///
    /// The update only applies while the row is still `pending` (compare-and-
    /// swap on `status`), so two overlapping dispatch runs cannot both claim
    /// the same message. Returns `true` when the row was updated, `false` when
    /// it had already left `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if `to` is `Pending`, or a
    /// database error.
    async fn transition(&self, id: i64, to: MessageStatus) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Timestamp encoding
// ---------------------------------------------------------------------------

/// Encode a timestamp for SQLite storage.
///
/// Fixed-width RFC 3339 with microsecond precision and a `Z` suffix, so text
/// comparison in SQL matches chronological order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a timestamp from SQLite text.
pub(crate) fn decode_ts(field: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp {
            field,
            value: value.to_owned(),
        })
}
