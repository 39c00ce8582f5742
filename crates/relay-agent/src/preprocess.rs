// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry preprocessing applied to each reading before it is sent.

use parking_lot::Mutex;
use relay_store::Message;
use serde_json::Value;

/// Key ignored when comparing consecutive readings.
const TIMESTAMP_KEY: &str = "timestamp";

/// Filters and reshapes readings.
///
/// - [`should_send`](Self::should_send) optionally drops a reading whose
///   values equal the previous one (disabled by default)
/// - [`preprocess`](Self::preprocess) flattens nested objects into
///   `parent_child` keys, replacing `.` in keys with `_`
#[derive(Default)]
pub struct Preprocessor {
    suppress_unchanged: bool,
    last: Mutex<Option<Message>>,
}

impl Preprocessor {
    pub fn new(suppress_unchanged: bool) -> Self {
        Self {
            suppress_unchanged,
            last: Mutex::new(None),
        }
    }

    /// Decide whether a reading is worth sending.
    pub fn should_send(&self, reading: &Message) -> bool {
        if !self.suppress_unchanged {
            return true;
        }

        let mut values = reading.clone();
        values.remove(TIMESTAMP_KEY);

        let mut last = self.last.lock();
        if last.as_ref() == Some(&values) {
            return false;
        }
        *last = Some(values);
        true
    }

    /// Flatten a reading into a single-level message.
    pub fn preprocess(&self, reading: Message) -> Message {
        let mut flat = Message::new();
        flatten_into(&mut flat, "", reading);
        tracing::trace!(keys = flat.len(), "Flattened reading");
        flat
    }
}

fn flatten_into(out: &mut Message, parent: &str, object: Message) {
    for (key, value) in object {
        let key = key.replace('.', "_");
        let key = if parent.is_empty() {
            key
        } else {
            format!("{parent}_{key}")
        };

        match value {
            Value::Object(nested) => flatten_into(out, &key, nested),
            other => {
                out.insert(key, other);
            }
        }
    }
}
