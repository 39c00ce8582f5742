// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue store abstraction
//!
//! Defines the trait implemented by the offline queue backends and the
//! factory that picks one from configuration.

use crate::file::FileStore;
use crate::record::{Message, StoredRecord};
use crate::sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unusable storage location: {0}")]
    Location(String),

    #[error("Unknown offline storage kind '{0}' (expected 'file' or 'sqlite')")]
    UnknownKind(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable FIFO queue of undelivered messages
///
/// Every method is safe to call concurrently on a shared instance; each
/// implementation serializes its own read-modify-write sequences.
///
/// # Implementations
///
/// - `FileStore` -- single JSON file, whole-file replace
/// - `SqliteStore` -- SQLite table with autoincrement ids
pub trait QueueStore: Send + Sync {
    /// Append messages at the tail, in order
    ///
    /// An empty slice is a no-op and must not create any on-disk state.
    fn enqueue(&self, messages: &[Message]) -> StoreResult<()>;

    /// Return up to `limit` oldest records without removing them
    ///
    /// `limit == 0` returns every record. Missing or empty storage yields an
    /// empty vector.
    fn drain(&self, limit: usize) -> StoreResult<Vec<StoredRecord>>;

    /// Remove records by id, returning how many were actually removed
    ///
    /// Ids that are no longer present are ignored.
    fn acknowledge(&self, ids: &[u64]) -> StoreResult<usize>;

    /// Number of stored records
    fn len(&self) -> StoreResult<usize>;

    /// True when nothing is buffered
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every record
    fn clear(&self) -> StoreResult<()>;

    /// Where the queue lives (for diagnostics)
    fn location(&self) -> &Path;
}

impl<T: QueueStore + ?Sized> QueueStore for Arc<T> {
    fn enqueue(&self, messages: &[Message]) -> StoreResult<()> {
        (**self).enqueue(messages)
    }

    fn drain(&self, limit: usize) -> StoreResult<Vec<StoredRecord>> {
        (**self).drain(limit)
    }

    fn acknowledge(&self, ids: &[u64]) -> StoreResult<usize> {
        (**self).acknowledge(ids)
    }

    fn len(&self) -> StoreResult<usize> {
        (**self).len()
    }

    fn clear(&self) -> StoreResult<()> {
        (**self).clear()
    }

    fn location(&self) -> &Path {
        (**self).location()
    }
}

/// Offline storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// JSON file, rewritten on every change
    #[serde(alias = "json")]
    File,
    /// Embedded SQLite database
    #[default]
    #[serde(alias = "embedded-sql")]
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(StoreKind::File),
            "sqlite" | "embedded-sql" => Ok(StoreKind::Sqlite),
            other => Err(StoreError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::File => write!(f, "file"),
            StoreKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Open the backend selected by `kind` at `path`.
///
/// Fails when the storage location cannot be acquired; a queue that cannot
/// persist anything is a configuration error, not something to retry.
pub fn open_store(kind: StoreKind, path: impl AsRef<Path>) -> StoreResult<Box<dyn QueueStore>> {
    let path = path.as_ref();
    let store: Box<dyn QueueStore> = match kind {
        StoreKind::File => Box::new(FileStore::new(path)?),
        StoreKind::Sqlite => Box::new(SqliteStore::new(path)?),
    };

    tracing::debug!(kind = %kind, path = %path.display(), "Opened offline queue");
    Ok(store)
}
