// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite queue backend
//!
//! One row per buffered message, ordered by an autoincrement id.

use crate::record::{Message, StoredRecord};
use crate::store::{QueueStore, StoreError, StoreResult};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite offline queue
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE offline_messages (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     payload TEXT NOT NULL
/// );
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) a file-based queue database
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if path.as_os_str().is_empty() {
            return Err(StoreError::Location("empty database path".to_string()));
        }
        if path.is_dir() {
            return Err(StoreError::Location(format!(
                "{} is a directory",
                path.display()
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
                tracing::debug!(dir = %parent.display(), "Created directory for queue database");
            }
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn, path.to_path_buf())
    }

    /// Create an in-memory queue (for testing)
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, path: PathBuf) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS offline_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        tracing::debug!(path = %path.display(), "Ensured table 'offline_messages' exists");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Fetch rows with `id > after`, oldest first. `limit < 0` means no limit.
    fn fetch_after(
        conn: &Connection,
        after: i64,
        limit: i64,
    ) -> rusqlite::Result<Vec<(i64, Option<String>)>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, payload FROM offline_messages
             WHERE id > ?1
             ORDER BY id ASC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![after, limit], |row| {
                let id: i64 = row.get(0)?;
                let payload = match row.get_ref(1)? {
                    ValueRef::Text(text) => std::str::from_utf8(text).ok().map(str::to_owned),
                    _ => None,
                };
                Ok((id, payload))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Delete rows that can never be sent. Caller holds the lock.
    fn invalidate(conn: &Connection, ids: &[i64]) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached("DELETE FROM offline_messages WHERE id = ?1")?;
        let mut removed = 0;
        for id in ids {
            removed += stmt.execute([id])?;
        }
        Ok(removed)
    }
}

impl QueueStore for SqliteStore {
    fn enqueue(&self, messages: &[Message]) -> StoreResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("INSERT INTO offline_messages (payload) VALUES (?1)")?;
            for message in messages {
                let payload = serde_json::to_string(message)?;
                stmt.execute([payload])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            path = %self.path.display(),
            added = messages.len(),
            "Inserted messages into queue database"
        );
        Ok(())
    }

    fn drain(&self, limit: usize) -> StoreResult<Vec<StoredRecord>> {
        let conn = self.conn.lock();

        let mut records = Vec::new();
        let mut invalid = Vec::new();
        let mut after = 0i64;

        // Corrupt rows are skipped, so keep reading until the batch is full or
        // the table is exhausted.
        loop {
            let want = if limit == 0 {
                -1
            } else {
                i64::try_from(limit - records.len()).unwrap_or(i64::MAX)
            };

            let rows = Self::fetch_after(&conn, after, want)?;
            let fetched = rows.len();

            for (id, payload) in rows {
                after = id;
                let decoded = payload
                    .as_deref()
                    .map(serde_json::from_str::<Message>)
                    .transpose();

                match decoded {
                    Ok(Some(message)) => records.push(StoredRecord::new(id as u64, message)),
                    Ok(None) => {
                        tracing::warn!(id, "Dropping offline row with non-text payload");
                        invalid.push(id);
                    }
                    Err(e) => {
                        tracing::warn!(id, error = %e, "Dropping undecodable offline row");
                        invalid.push(id);
                    }
                }
            }

            let exhausted = want < 0 || (fetched as i64) < want;
            if exhausted || records.len() >= limit {
                break;
            }
        }

        if !invalid.is_empty() {
            Self::invalidate(&conn, &invalid)?;
        }

        tracing::debug!(
            path = %self.path.display(),
            loaded = records.len(),
            limit,
            "Loaded offline messages"
        );
        Ok(records)
    }

    fn acknowledge(&self, ids: &[u64]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let row_ids: Vec<i64> = ids.iter().filter_map(|&id| i64::try_from(id).ok()).collect();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = Self::invalidate(&tx, &row_ids)?;
        tx.commit()?;

        tracing::debug!(
            path = %self.path.display(),
            removed,
            requested = ids.len(),
            "Removed acknowledged messages"
        );
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM offline_messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM offline_messages", [])?;
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(value: serde_json::Value) -> Message {
        value.as_object().cloned().unwrap()
    }

    fn insert_raw(store: &SqliteStore, payload: &str) {
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO offline_messages (payload) VALUES (?1)",
                [payload],
            )
            .unwrap();
    }

    #[test]
    fn test_sqlite_store_enqueue_and_drain() {
        let store = SqliteStore::new_in_memory().unwrap();

        let messages: Vec<Message> = (0..5)
            .map(|i| msg(json!({"seq": i, "value": i as f64 * 0.5})))
            .collect();
        store.enqueue(&messages).unwrap();

        let drained = store.drain(0).unwrap();
        assert_eq!(drained.len(), 5);
        for (record, original) in drained.iter().zip(&messages) {
            assert_eq!(&record.message, original);
        }
        assert!(drained.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_sqlite_store_drain_limit() {
        let store = SqliteStore::new_in_memory().unwrap();

        let messages: Vec<Message> = (0..12).map(|i| msg(json!({"seq": i}))).collect();
        store.enqueue(&messages).unwrap();

        let batch = store.drain(10).unwrap();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[9].message, messages[9]);
        assert_eq!(store.len().unwrap(), 12);
    }

    #[test]
    fn test_sqlite_store_acknowledge() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .enqueue(&[msg(json!({"a": 1})), msg(json!({"b": 2})), msg(json!({"c": 3}))])
            .unwrap();

        let batch = store.drain(2).unwrap();
        let ids: Vec<u64> = batch.iter().map(|r| r.id).collect();

        assert_eq!(store.acknowledge(&ids).unwrap(), 2);
        assert_eq!(store.acknowledge(&ids).unwrap(), 0);
        assert_eq!(store.acknowledge(&[]).unwrap(), 0);

        let rest = store.drain(0).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].message, msg(json!({"c": 3})));
    }

    #[test]
    fn test_sqlite_store_table_survives_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("offline.sqlite");

        let store = SqliteStore::new(&path).unwrap();
        store.enqueue(&[msg(json!({"a": 1}))]).unwrap();
        let ids: Vec<u64> = store.drain(0).unwrap().iter().map(|r| r.id).collect();
        store.acknowledge(&ids).unwrap();

        assert!(path.exists());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.sqlite");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.enqueue(&[msg(json!({"kept": true}))]).unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        let drained = reopened.drain(0).unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message, msg(json!({"kept": true})));
    }

    #[test]
    fn test_sqlite_store_skips_and_drops_corrupt_rows() {
        let store = SqliteStore::new_in_memory().unwrap();

        store.enqueue(&[msg(json!({"seq": 1}))]).unwrap();
        insert_raw(&store, "{broken");
        insert_raw(&store, "[1, 2, 3]");
        store
            .enqueue(&[msg(json!({"seq": 2})), msg(json!({"seq": 3}))])
            .unwrap();

        // Two corrupt rows inside the first window must not shorten the batch.
        let batch = store.drain(3).unwrap();
        let seqs: Vec<i64> = batch
            .iter()
            .map(|r| r.message["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_sqlite_store_clear() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.enqueue(&[msg(json!({"a": 1}))]).unwrap();

        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
