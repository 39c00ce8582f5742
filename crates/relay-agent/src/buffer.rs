// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Offline buffer - stores undelivered messages and replays them in order.
//!
//! # Flush
//!
//! 1. Nothing happens without a backend, an attached endpoint, or a live link.
//! 2. Drain the `batch_size` oldest records.
//! 3. Send them in order, stopping at the first failure.
//! 4. Acknowledge exactly the records that were sent.
//! 5. Repeat until the queue is empty or a send fails.
//!
//! `add` and `flush` are mutually exclusive, so a message added while a
//! flush runs waits for the next one.

use crate::endpoint::TelemetryEndpoint;
use parking_lot::{Mutex, RwLock};
use relay_store::{Message, QueueStore};
use std::sync::Arc;

/// Default number of records sent per flush batch.
pub const BATCH_SIZE: usize = 10;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records accepted by the endpoint
    pub sent: usize,
    /// Records removed from the backend
    pub acknowledged: usize,
    /// True when the flush stopped on a send or storage failure
    pub halted: bool,
}

/// Store-and-forward buffer over an optional [`QueueStore`].
pub struct OfflineBuffer {
    store: Option<Arc<dyn QueueStore>>,
    endpoint: RwLock<Option<Arc<dyn TelemetryEndpoint>>>,
    batch_size: usize,
    lock: Mutex<()>,
}

impl OfflineBuffer {
    /// Create a buffer; `None` disables buffering (messages are dropped)
    pub fn new(store: Option<Arc<dyn QueueStore>>) -> Self {
        if store.is_none() {
            tracing::warn!("Offline storage disabled, undelivered messages will be dropped");
        }
        Self {
            store,
            endpoint: RwLock::new(None),
            batch_size: BATCH_SIZE,
            lock: Mutex::new(()),
        }
    }

    /// Set the flush batch size (at least 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Endpoint used by [`flush`](Self::flush)
    pub fn attach_endpoint(&self, endpoint: Arc<dyn TelemetryEndpoint>) {
        *self.endpoint.write() = Some(endpoint);
    }

    /// Backing store, if buffering is enabled
    pub fn store(&self) -> Option<&Arc<dyn QueueStore>> {
        self.store.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Store one message; returns whether it was persisted.
    pub fn add(&self, message: Message) -> bool {
        let Some(store) = &self.store else {
            tracing::warn!("No offline storage configured, dropping message");
            return false;
        };

        let _guard = self.lock.lock();
        match store.enqueue(std::slice::from_ref(&message)) {
            Ok(()) => {
                tracing::debug!(location = %store.location().display(), "Message buffered");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to buffer message, dropping it");
                false
            }
        }
    }

    /// Replay buffered messages through the attached endpoint.
    pub fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();

        let Some(store) = &self.store else {
            return report;
        };
        let Some(endpoint) = self.endpoint.read().clone() else {
            tracing::debug!("Flush skipped, no endpoint attached");
            return report;
        };

        let _guard = self.lock.lock();
        if !endpoint.is_connected() {
            tracing::debug!("Flush skipped, endpoint not connected");
            return report;
        }

        loop {
            let batch = match store.drain(self.batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read offline queue");
                    report.halted = true;
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let mut delivered = Vec::with_capacity(batch.len());
            let mut send_failed = false;
            for record in &batch {
                match endpoint.send(&record.message) {
                    Ok(()) => delivered.push(record.id),
                    Err(e) => {
                        tracing::warn!(
                            id = record.id,
                            error = %e,
                            "Send failed during flush, keeping remaining messages"
                        );
                        send_failed = true;
                        break;
                    }
                }
            }
            report.sent += delivered.len();

            if !delivered.is_empty() {
                match store.acknowledge(&delivered) {
                    Ok(removed) => report.acknowledged += removed,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to acknowledge sent messages");
                        report.halted = true;
                        break;
                    }
                }
            }

            if send_failed {
                report.halted = true;
                break;
            }
        }

        if report.sent > 0 || report.halted {
            tracing::info!(
                sent = report.sent,
                acknowledged = report.acknowledged,
                halted = report.halted,
                "Offline flush finished"
            );
        }
        report
    }

    /// Number of buffered messages (0 without a backend or on read errors)
    pub fn pending(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        store.len().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to count buffered messages");
            0
        })
    }
}
