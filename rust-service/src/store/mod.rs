//! Message store abstractions and SQLite backend.
//!
//! The store owns the persisted representation of every delivered message.
//! Inserts are idempotent on `message_id`: duplicate detection is delegated
//! to the storage engine's primary-key constraint, never to an
//! application-level existence check.

use serde::Serialize;
use thiserror::Error;

mod sqlite;

pub use sqlite::SqliteMessageStore;

/// Result type for message store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new record was persisted.
    Created,
    /// A record with the same `message_id` already exists; nothing changed.
    Duplicate,
}

impl InsertOutcome {
    /// Label attached to observability events for this outcome.
    pub fn as_label(&self) -> &'static str {
        match self {
            InsertOutcome::Created => "created",
            InsertOutcome::Duplicate => "duplicate",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, InsertOutcome::Duplicate)
    }
}

/// A message as presented by a webhook delivery, before persistence.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Provider-assigned globally unique identifier (the idempotency key)
    pub message_id: String,
    /// Sender MSISDN
    pub from_msisdn: String,
    /// Recipient MSISDN
    pub to_msisdn: String,
    /// Provider-supplied ISO-8601 timestamp
    pub ts: String,
    /// Optional message body
    pub text: Option<String>,
}

/// A stored message as returned by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub message_id: String,
    #[serde(rename = "from")]
    pub from_msisdn: String,
    #[serde(rename = "to")]
    pub to_msisdn: String,
    pub ts: String,
    pub text: Option<String>,
}

/// Conjunctive filter and page window for `list`.
///
/// `limit`/`offset` are applied as given; range validation is the caller's
/// responsibility.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Sender equals this MSISDN
    pub from_msisdn: Option<String>,
    /// Timestamp is greater than or equal to this value
    pub since: Option<String>,
    /// Body contains this substring, case-insensitive
    pub q: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// One page of filtered messages.
///
/// `total` counts every row matching the filter, ignoring pagination.
#[derive(Debug, Serialize)]
pub struct ListPage {
    pub data: Vec<Message>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Per-sender message count for the stats report.
#[derive(Debug, Clone, Serialize)]
pub struct SenderCount {
    #[serde(rename = "from")]
    pub from_msisdn: String,
    pub count: i64,
}

/// Aggregate statistics over all stored messages.
#[derive(Debug, Serialize)]
pub struct MessageStats {
    pub total_messages: i64,
    pub senders_count: i64,
    /// Top senders by message count, at most 10, ties broken by sender
    pub messages_per_sender: Vec<SenderCount>,
    pub first_message_ts: Option<String>,
    pub last_message_ts: Option<String>,
}
