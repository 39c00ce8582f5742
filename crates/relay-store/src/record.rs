// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue record types

use serde::{Deserialize, Serialize};

/// One telemetry payload: an arbitrary JSON object.
pub type Message = serde_json::Map<String, serde_json::Value>;

/// A buffered message together with its backend-assigned sequence id.
///
/// The id only orders and addresses records inside a backend; it is never
/// part of what gets transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Sequence id (strictly increasing within a live queue)
    pub id: u64,

    /// Original message, unchanged
    pub message: Message,
}

impl StoredRecord {
    /// Create a record
    pub fn new(id: u64, message: Message) -> Self {
        Self { id, message }
    }

    /// Drop the id and return the message
    pub fn into_message(self) -> Message {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serialization_keeps_message_intact() {
        let message = json!({"temperature": 21.5, "labels": {"room": "lab"}, "ok": true})
            .as_object()
            .cloned()
            .unwrap();
        let record = StoredRecord::new(7, message.clone());

        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: StoredRecord = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.into_message(), message);
    }
}
