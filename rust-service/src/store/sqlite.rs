//! SQLite-backed message store with durable, idempotent persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, ToSql};

use crate::store::{
    InsertOutcome, ListFilter, ListPage, Message, MessageStats, NewMessage, SenderCount,
    StoreResult,
};

/// Persistent SQLite store holding one row per delivered message.
///
/// A connection is opened per operation and dropped on every exit path, so
/// no handle outlives the call that acquired it.
#[derive(Debug)]
pub struct SqliteMessageStore {
    db_path: PathBuf,
}

impl SqliteMessageStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id  TEXT PRIMARY KEY,
                from_msisdn TEXT NOT NULL,
                to_msisdn   TEXT NOT NULL,
                ts          TEXT NOT NULL,
                text        TEXT,
                received_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Checks that the store is reachable. Used by the readiness probe.
    pub fn ping(&self) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Inserts a message unless one with the same `message_id` exists.
    ///
    /// Atomicity rests on the primary-key constraint: of N concurrent
    /// deliveries with one id, exactly one insert succeeds and the rest
    /// surface as constraint violations, reported here as `Duplicate`.
    /// `received_at` is assigned at the moment of insert.
    pub fn insert(&self, message: &NewMessage) -> StoreResult<InsertOutcome> {
        let connection = self.open_connection()?;
        let received_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let result = connection.execute(
            r#"
            INSERT INTO messages (message_id, from_msisdn, to_msisdn, ts, text, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                message.message_id,
                message.from_msisdn,
                message.to_msisdn,
                message.ts,
                message.text,
                received_at,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            // PRIMARY KEY violation on message_id
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns one page of messages matching `filter`, ordered ascending by
    /// `(ts, message_id)`.
    ///
    /// `total` counts every matching row with the same predicates, ignoring
    /// the page window. It is a separate query from the page read, so the two
    /// may skew under concurrent writes.
    pub fn list(&self, filter: &ListFilter) -> StoreResult<ListPage> {
        let connection = self.open_connection()?;

        let mut clauses: Vec<&'static str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(from_msisdn) = &filter.from_msisdn {
            clauses.push("from_msisdn = ?");
            values.push(Box::new(from_msisdn.clone()));
        }

        if let Some(since) = &filter.since {
            clauses.push("ts >= ?");
            values.push(Box::new(since.clone()));
        }

        if let Some(q) = &filter.q {
            clauses.push("LOWER(text) LIKE ?");
            values.push(Box::new(format!("%{}%", q.to_lowercase())));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let filter_params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let total: i64 = connection.query_row(
            &format!("SELECT COUNT(*) FROM messages{where_sql}"),
            filter_params.as_slice(),
            |row| row.get(0),
        )?;

        values.push(Box::new(filter.limit));
        values.push(Box::new(filter.offset));
        let page_params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let mut statement = connection.prepare(&format!(
            r#"
            SELECT message_id, from_msisdn, to_msisdn, ts, text
            FROM messages{where_sql}
            ORDER BY ts ASC, message_id ASC
            LIMIT ? OFFSET ?
            "#
        ))?;
        let rows = statement.query_map(page_params.as_slice(), |row| {
            Ok(Message {
                message_id: row.get(0)?,
                from_msisdn: row.get(1)?,
                to_msisdn: row.get(2)?,
                ts: row.get(3)?,
                text: row.get(4)?,
            })
        })?;

        let mut data = Vec::new();
        for row in rows {
            data.push(row?);
        }

        Ok(ListPage {
            data,
            total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    /// Aggregate statistics over all stored messages.
    pub fn stats(&self) -> StoreResult<MessageStats> {
        let connection = self.open_connection()?;

        let total_messages: i64 =
            connection.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;

        let senders_count: i64 = connection.query_row(
            "SELECT COUNT(DISTINCT from_msisdn) FROM messages",
            [],
            |row| row.get(0),
        )?;

        let mut statement = connection.prepare(
            r#"
            SELECT from_msisdn, COUNT(*) AS cnt
            FROM messages
            GROUP BY from_msisdn
            ORDER BY cnt DESC, from_msisdn ASC
            LIMIT 10
            "#,
        )?;
        let rows = statement.query_map([], |row| {
            Ok(SenderCount {
                from_msisdn: row.get(0)?,
                count: row.get(1)?,
            })
        })?;

        let mut messages_per_sender = Vec::new();
        for row in rows {
            messages_per_sender.push(row?);
        }

        let (first_message_ts, last_message_ts) = connection.query_row(
            "SELECT MIN(ts), MAX(ts) FROM messages",
            [],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
        )?;

        Ok(MessageStats {
            total_messages,
            senders_count,
            messages_per_sender,
            first_message_ts,
            last_message_ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteMessageStore;
    use crate::store::{InsertOutcome, ListFilter, NewMessage};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn message(id: &str, from: &str, ts: &str, text: Option<&str>) -> NewMessage {
        NewMessage {
            message_id: id.to_string(),
            from_msisdn: from.to_string(),
            to_msisdn: "+2000".to_string(),
            ts: ts.to_string(),
            text: text.map(|t| t.to_string()),
        }
    }

    fn page(limit: i64, offset: i64) -> ListFilter {
        ListFilter {
            limit,
            offset,
            ..Default::default()
        }
    }

    #[test]
    fn insert_is_idempotent_on_message_id() {
        let temp = tempdir().expect("create tempdir");
        let store =
            SqliteMessageStore::new(temp.path().join("messages.db")).expect("create store");

        let msg = message("m-1", "+1000", "2024-01-01T00:00:00Z", Some("hi"));
        assert_eq!(store.insert(&msg).expect("first insert"), InsertOutcome::Created);

        // A second delivery never creates a second record or mutates the first
        let replay = message("m-1", "+9999", "2025-01-01T00:00:00Z", Some("changed"));
        assert_eq!(
            store.insert(&replay).expect("second insert"),
            InsertOutcome::Duplicate
        );

        let listed = store.list(&page(10, 0)).expect("list");
        assert_eq!(listed.total, 1);
        assert_eq!(listed.data[0].from_msisdn, "+1000");
        assert_eq!(listed.data[0].text.as_deref(), Some("hi"));
    }

    #[test]
    fn concurrent_inserts_yield_exactly_one_created() {
        let temp = tempdir().expect("create tempdir");
        let store = Arc::new(
            SqliteMessageStore::new(temp.path().join("messages.db")).expect("create store"),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .insert(&message("m-race", "+1000", "2024-01-01T00:00:00Z", None))
                        .expect("insert")
                })
            })
            .collect();

        let outcomes: Vec<InsertOutcome> =
            handles.into_iter().map(|h| h.join().expect("join")).collect();

        let created = outcomes
            .iter()
            .filter(|o| **o == InsertOutcome::Created)
            .count();
        let duplicates = outcomes.iter().filter(|o| o.is_duplicate()).count();
        assert_eq!(created, 1);
        assert_eq!(duplicates, 7);

        let listed = store.list(&page(10, 0)).expect("list");
        assert_eq!(listed.total, 1);
        assert_eq!(listed.data[0].message_id, "m-race");
    }

    #[test]
    fn listing_orders_by_timestamp_then_message_id() {
        let temp = tempdir().expect("create tempdir");
        let store =
            SqliteMessageStore::new(temp.path().join("messages.db")).expect("create store");

        store
            .insert(&message("m-b", "+1000", "2024-01-02T00:00:00Z", None))
            .expect("insert");
        store
            .insert(&message("m-c", "+1000", "2024-01-01T00:00:00Z", None))
            .expect("insert");
        store
            .insert(&message("m-a", "+1000", "2024-01-03T00:00:00Z", None))
            .expect("insert");
        // Shares a timestamp with m-b; id breaks the tie
        store
            .insert(&message("m-a2", "+1000", "2024-01-02T00:00:00Z", None))
            .expect("insert");

        let listed = store.list(&page(10, 0)).expect("list");
        let ids: Vec<&str> = listed.data.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m-c", "m-a2", "m-b", "m-a"]);
    }

    #[test]
    fn total_is_independent_of_page_window() {
        let temp = tempdir().expect("create tempdir");
        let store =
            SqliteMessageStore::new(temp.path().join("messages.db")).expect("create store");

        for i in 0..5 {
            store
                .insert(&message(
                    &format!("m-{i}"),
                    "+1000",
                    &format!("2024-01-0{}T00:00:00Z", i + 1),
                    None,
                ))
                .expect("insert");
        }

        let first_page = store.list(&page(2, 0)).expect("list");
        assert_eq!(first_page.data.len(), 2);
        assert_eq!(first_page.total, 5);

        let beyond = store.list(&page(2, 10)).expect("list");
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.total, 5);
    }

    #[test]
    fn filters_combine_conjunctively() {
        let temp = tempdir().expect("create tempdir");
        let store =
            SqliteMessageStore::new(temp.path().join("messages.db")).expect("create store");

        // Satisfies all three predicates
        store
            .insert(&message("m-all", "+1000", "2024-06-01T00:00:00Z", Some("Hello world")))
            .expect("insert");
        // Wrong sender
        store
            .insert(&message("m-sender", "+2000", "2024-06-01T00:00:00Z", Some("hello")))
            .expect("insert");
        // Too old
        store
            .insert(&message("m-old", "+1000", "2023-01-01T00:00:00Z", Some("hello")))
            .expect("insert");
        // Body does not match
        store
            .insert(&message("m-text", "+1000", "2024-06-01T00:00:01Z", Some("goodbye")))
            .expect("insert");

        let filter = ListFilter {
            from_msisdn: Some("+1000".to_string()),
            since: Some("2024-01-01T00:00:00Z".to_string()),
            q: Some("HELLO".to_string()),
            limit: 10,
            offset: 0,
        };
        let listed = store.list(&filter).expect("list");
        assert_eq!(listed.total, 1);
        assert_eq!(listed.data[0].message_id, "m-all");
    }

    #[test]
    fn stats_on_empty_store() {
        let temp = tempdir().expect("create tempdir");
        let store =
            SqliteMessageStore::new(temp.path().join("messages.db")).expect("create store");

        let stats = store.stats().expect("stats");
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.senders_count, 0);
        assert!(stats.messages_per_sender.is_empty());
        assert!(stats.first_message_ts.is_none());
        assert!(stats.last_message_ts.is_none());
    }

    #[test]
    fn stats_rank_top_senders_with_deterministic_ties() {
        let temp = tempdir().expect("create tempdir");
        let store =
            SqliteMessageStore::new(temp.path().join("messages.db")).expect("create store");

        let deliveries = [
            ("m-1", "+2000", "2024-01-01T00:00:00Z"),
            ("m-2", "+2000", "2024-01-02T00:00:00Z"),
            ("m-3", "+1000", "2024-01-03T00:00:00Z"),
            ("m-4", "+1000", "2024-01-04T00:00:00Z"),
            ("m-5", "+3000", "2024-01-05T00:00:00Z"),
        ];
        for (id, from, ts) in deliveries {
            store.insert(&message(id, from, ts, None)).expect("insert");
        }

        let stats = store.stats().expect("stats");
        assert_eq!(stats.total_messages, 5);
        assert_eq!(stats.senders_count, 3);
        let ranked: Vec<(&str, i64)> = stats
            .messages_per_sender
            .iter()
            .map(|s| (s.from_msisdn.as_str(), s.count))
            .collect();
        // +1000 and +2000 tie on count; sender ascending breaks the tie
        assert_eq!(ranked, vec![("+1000", 2), ("+2000", 2), ("+3000", 1)]);
        assert_eq!(stats.first_message_ts.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(stats.last_message_ts.as_deref(), Some("2024-01-05T00:00:00Z"));
    }

    #[test]
    fn persists_messages_across_reopen() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("messages.db");

        {
            let store = SqliteMessageStore::new(&db_path).expect("create store");
            store
                .insert(&message("m-1", "+1000", "2024-01-01T00:00:00Z", Some("hi")))
                .expect("insert");
        }

        let reopened = SqliteMessageStore::new(&db_path).expect("reopen store");
        let listed = reopened.list(&page(10, 0)).expect("list");
        assert_eq!(listed.total, 1);
        assert_eq!(listed.data[0].message_id, "m-1");

        let received_at: String = reopened
            .open_connection()
            .expect("open connection")
            .query_row(
                "SELECT received_at FROM messages WHERE message_id = ?1",
                ["m-1"],
                |row| row.get(0),
            )
            .expect("received_at");
        assert!(received_at.ends_with('Z'));
    }
}
