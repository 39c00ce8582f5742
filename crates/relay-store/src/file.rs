// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON file queue backend
//!
//! The whole queue is one JSON array of `{"id", "message"}` records. Every
//! mutation reads the array, edits it in memory and replaces the file
//! (`<path>.tmp` + fsync + rename), so a crash leaves either the old or the
//! new queue on disk, never a torn one.
//!
//! The file only exists while it holds at least one record.

use crate::record::{Message, StoredRecord};
use crate::store::{QueueStore, StoreError, StoreResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// File-backed offline queue
pub struct FileStore {
    path: PathBuf,
    tmp_path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Create a store writing to `path`
    ///
    /// The parent directory is created if needed; the file itself is only
    /// created by the first non-empty `enqueue`.
    pub fn new(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        if path.as_os_str().is_empty() {
            return Err(StoreError::Location("empty queue file path".to_string()));
        }
        if path.is_dir() {
            return Err(StoreError::Location(format!(
                "{} is a directory",
                path.display()
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp_path = sibling(&path, ".tmp");
        Ok(Self {
            path,
            tmp_path,
            lock: Mutex::new(()),
        })
    }

    /// Queue file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every decodable record. Caller holds the lock.
    fn load_all(&self) -> StoreResult<Vec<StoredRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let entries = match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                self.quarantine("top-level value is not an array")?;
                return Ok(Vec::new());
            }
            Err(e) => {
                self.quarantine(&e.to_string())?;
                return Ok(Vec::new());
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<StoredRecord>(entry) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    index,
                    error = %e,
                    "Skipping undecodable offline record"
                ),
            }
        }

        Ok(records)
    }

    /// Replace the queue file with `records`, or delete it when empty.
    fn save_all(&self, records: &[StoredRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => {
                    tracing::debug!(path = %self.path.display(), "Removed empty queue file");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::io(&self.path, e)),
            };
        }

        let encoded = serde_json::to_vec(records)?;
        let mut file = File::create(&self.tmp_path).map_err(|e| StoreError::io(&self.tmp_path, e))?;
        file.write_all(&encoded)
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&self.tmp_path, e))?;
        fs::rename(&self.tmp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        Ok(())
    }

    /// Move an unreadable queue file aside so new telemetry can still be stored.
    fn quarantine(&self, reason: &str) -> StoreResult<()> {
        let target = sibling(&self.path, ".corrupt");
        fs::rename(&self.path, &target).map_err(|e| StoreError::io(&self.path, e))?;

        tracing::error!(
            path = %self.path.display(),
            moved_to = %target.display(),
            reason,
            "Offline queue file is unreadable; moved aside and starting empty"
        );
        Ok(())
    }
}

/// `queue.json` + `.tmp` -> `queue.json.tmp`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl QueueStore for FileStore {
    fn enqueue(&self, messages: &[Message]) -> StoreResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock();
        let mut records = self.load_all()?;
        let mut next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;

        records.reserve(messages.len());
        for message in messages {
            records.push(StoredRecord::new(next_id, message.clone()));
            next_id += 1;
        }

        self.save_all(&records)?;
        tracing::debug!(
            path = %self.path.display(),
            added = messages.len(),
            total = records.len(),
            "Appended messages to queue file"
        );
        Ok(())
    }

    fn drain(&self, limit: usize) -> StoreResult<Vec<StoredRecord>> {
        let _guard = self.lock.lock();
        let mut records = self.load_all()?;
        if limit > 0 {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn acknowledge(&self, ids: &[u64]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.lock();
        let mut records = self.load_all()?;
        let targets: HashSet<u64> = ids.iter().copied().collect();

        let before = records.len();
        records.retain(|r| !targets.contains(&r.id));
        let removed = before - records.len();

        if removed > 0 {
            self.save_all(&records)?;
        }
        tracing::debug!(
            path = %self.path.display(),
            removed,
            remaining = records.len(),
            "Acknowledged queue records"
        );
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        let _guard = self.lock.lock();
        Ok(self.load_all()?.len())
    }

    fn clear(&self) -> StoreResult<()> {
        let _guard = self.lock.lock();
        self.save_all(&[])
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
