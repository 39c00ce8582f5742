// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cloud-to-device command dispatch.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// User callback for incoming commands: `(name, payload) -> response`.
pub type CommandHandler = Arc<dyn Fn(&str, &Value) -> Result<Value, String> + Send + Sync>;

/// Response returned to the cloud for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command: String,
    pub response: Value,
    pub timestamp: String,
}

/// Incoming command envelope, as produced by the text transports.
#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    command: String,
    #[serde(default)]
    payload: Value,
}

/// Single handler slot.
///
/// The handler is cloned out of the lock before it runs, so a slow handler
/// never blocks a concurrent `register`.
#[derive(Default)]
pub struct CommandDispatcher {
    handler: Mutex<Option<CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing the previous one
    pub fn register(&self, handler: CommandHandler) {
        let replaced = self.handler.lock().replace(handler).is_some();
        tracing::debug!(replaced, "Command handler registered");
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Run the handler for one command.
    ///
    /// Returns `None` when the command is ignored (empty name or no handler).
    /// Handler errors and panics become `{"error": "..."}` responses.
    pub fn dispatch(&self, command: &str, payload: &Value) -> Option<CommandResponse> {
        if command.is_empty() {
            tracing::warn!("Ignoring command with empty name");
            return None;
        }

        let Some(handler) = self.handler.lock().clone() else {
            tracing::debug!(command, "No command handler registered, ignoring");
            return None;
        };

        tracing::info!(command, "Dispatching command");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(command, payload)));

        let response = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(message)) => {
                tracing::error!(command, error = %message, "Command handler failed");
                json!({ "error": message })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(command, error = %message, "Command handler panicked");
                json!({ "error": message })
            }
        };

        Some(CommandResponse {
            command: command.to_string(),
            response,
            timestamp: crate::utc_timestamp(),
        })
    }

    /// Parse a `{"command": ..., "payload": ...}` envelope and dispatch it.
    pub fn dispatch_raw(&self, raw: &[u8]) -> Option<CommandResponse> {
        match serde_json::from_slice::<CommandEnvelope>(raw) {
            Ok(envelope) => self.dispatch(&envelope.command, &envelope.payload),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed command envelope");
                None
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "command handler panicked".to_string()
    }
}
