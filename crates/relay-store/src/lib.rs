// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay offline queue storage
//!
//! Durable FIFO backends for telemetry that could not be delivered while the
//! cloud link was down.
//!
//! # Backends
//!
//! - **FileStore** -- whole queue as one JSON array, rewritten atomically on
//!   every mutation. Suited to short outages with a shallow backlog.
//! - **SqliteStore** -- one row per message, batched inserts and ordered
//!   `LIMIT` reads. Suited to long outages.
//!
//! Both assign a monotonically increasing id to each message; `drain` hands
//! records out oldest first and `acknowledge` removes them by id.
//!
//! # Example
//!
//! ```ignore
//! use relay_store::{open_store, Message, StoreKind};
//!
//! let store = open_store(StoreKind::Sqlite, "data/offline.sqlite")?;
//! store.enqueue(&[message])?;
//!
//! let batch = store.drain(10)?;
//! let ids: Vec<u64> = batch.iter().map(|r| r.id).collect();
//! store.acknowledge(&ids)?;
//! ```

pub mod file;
pub mod record;
pub mod sqlite;
pub mod store;

pub use file::FileStore;
pub use record::{Message, StoredRecord};
pub use sqlite::SqliteStore;
pub use store::{open_store, QueueStore, StoreError, StoreKind, StoreResult};
