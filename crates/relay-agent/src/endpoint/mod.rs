// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry endpoint abstraction
//!
//! The agent talks to the cloud only through [`TelemetryEndpoint`]. Concrete
//! transports keep their connection state in a [`link::Link`], which enforces
//! the `Disconnected -> Connecting -> Connected` lifecycle, and keep their
//! command handler in a [`command::CommandDispatcher`].
//!
//! # Integration
//!
//! To plug in a vendor SDK, implement the trait:
//!
//! ```ignore
//! impl TelemetryEndpoint for VendorClient {
//!     fn connect(&self) -> Result<bool, EndpointError> {
//!         self.link.establish(|| self.open_session())
//!     }
//!     // ...
//! }
//! ```

pub mod backoff;
pub mod command;
pub mod console;
pub mod link;
pub mod mock;
pub mod simulated;

use crate::config::{EndpointConfig, ProviderKind};
use backoff::BackoffPolicy;
use command::CommandHandler;
use relay_store::Message;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("gave up after {attempts} reconnect attempt(s)")]
    Exhausted { attempts: u32 },

    #[error("reconnect cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl EndpointError {
    /// True when the error means the session is gone, not just this message.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            EndpointError::NotConnected
                | EndpointError::ConnectionLost(_)
                | EndpointError::Timeout(_)
                | EndpointError::Io(_)
        )
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Snapshot describing an endpoint, for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointInfo {
    /// Provider name ("console", "simulated", ...)
    pub provider: String,
    /// Connection state at the time of the call
    pub status: ConnectionState,
    /// Provider specific details
    #[serde(flatten)]
    pub details: BTreeMap<String, String>,
}

impl EndpointInfo {
    /// Create an info snapshot without details
    pub fn new(provider: impl Into<String>, status: ConnectionState) -> Self {
        Self {
            provider: provider.into(),
            status,
            details: BTreeMap::new(),
        }
    }

    /// Add a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// Cloud transport capability consumed by the agent
///
/// Implementations must be safe to share between the acquisition thread and
/// the caller's thread. Connection state is guarded by one lock per endpoint
/// and the command handler by another, so registering a handler never waits
/// on an in-flight send.
pub trait TelemetryEndpoint: Send + Sync {
    /// Single connection attempt
    ///
    /// Returns `Ok(true)` when this call moved the endpoint to `Connected` and
    /// `Ok(false)` when it was already connected. On failure the endpoint is
    /// left `Disconnected`.
    fn connect(&self) -> Result<bool, EndpointError>;

    /// Close the session (no-op when not connected)
    fn disconnect(&self) -> Result<(), EndpointError>;

    /// Current lifecycle state
    fn state(&self) -> ConnectionState;

    /// Quick connectivity query
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Publish one message and wait for the transport's acknowledgement
    fn send(&self, message: &Message) -> Result<(), EndpointError>;

    /// Install the handler for cloud-to-device commands (replaces any previous one)
    fn register_command_handler(&self, handler: CommandHandler);

    /// Provider, status and provider specific details
    fn describe(&self) -> EndpointInfo;

    /// Bounded reconnect with the default backoff policy
    ///
    /// Returns the attempt number that succeeded (0 if already connected).
    fn reconnect(&self, max_retries: u32) -> Result<u32, EndpointError> {
        self.reconnect_with(max_retries, &BackoffPolicy::default())
    }

    /// Bounded reconnect with an explicit backoff policy
    fn reconnect_with(&self, max_retries: u32, policy: &BackoffPolicy) -> Result<u32, EndpointError> {
        backoff::retry_connect(self, max_retries, policy, &mut std::thread::sleep)
    }
}

/// Build the endpoint selected by configuration.
pub fn build_endpoint(config: &EndpointConfig) -> Arc<dyn TelemetryEndpoint> {
    match config.provider {
        ProviderKind::Console => Arc::new(console::ConsoleEndpoint::new(
            &config.device_id,
            config.console.clone(),
        )),
        ProviderKind::Simulated => Arc::new(simulated::SimulatedEndpoint::new(
            &config.device_id,
            config.simulated.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_failure_classification() {
        assert!(EndpointError::NotConnected.is_link_failure());
        assert!(EndpointError::ConnectionLost("reset".into()).is_link_failure());
        assert!(EndpointError::Timeout(Duration::from_secs(5)).is_link_failure());
        assert!(!EndpointError::Rejected("too large".into()).is_link_failure());
        assert!(!EndpointError::Exhausted { attempts: 3 }.is_link_failure());
    }

    #[test]
    fn test_endpoint_info_serializes_flat() {
        let info = EndpointInfo::new("console", ConnectionState::Connected)
            .with_detail("device_id", "dev-1");

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["provider"], "console");
        assert_eq!(value["status"], "connected");
        assert_eq!(value["device_id"], "dev-1");
    }
}
