// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay telemetry agent
//!
//! Device-side store-and-forward pipeline: sensor readings are pushed to a
//! cloud endpoint while the link is up and buffered on disk while it is down.
//! Every (re)connection drains the buffer in order.
//!
//! # Architecture
//!
//! ```text
//! TelemetryManager
//! +-- AcquisitionLoop     (background thread polling a ReadingSource)
//! +-- Preprocessor        (flattening, optional duplicate suppression)
//! +-- TelemetryEndpoint   (connect / reconnect with backoff / send / commands)
//! +-- OfflineBuffer       (add + ordered batched flush over a QueueStore)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relay_agent::{AgentConfig, TelemetryManager};
//!
//! let config = AgentConfig::from_file("relay.toml")?;
//! let manager = TelemetryManager::from_config(&config)?;
//!
//! manager.start()?;
//! // ... until shutdown is requested
//! manager.shutdown();
//! ```

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod manager;
pub mod preprocess;
pub mod source;

pub use acquisition::{AcquisitionLoop, StopHandle};
pub use buffer::{FlushReport, OfflineBuffer, BATCH_SIZE};
pub use config::{AgentConfig, ConfigError};
pub use endpoint::backoff::BackoffPolicy;
pub use endpoint::command::{CommandDispatcher, CommandHandler, CommandResponse};
pub use endpoint::mock::MockEndpoint;
pub use endpoint::{ConnectionState, EndpointError, EndpointInfo, TelemetryEndpoint};
pub use error::AgentError;
pub use manager::TelemetryManager;
pub use preprocess::Preprocessor;
pub use source::{FnSource, ReadingSource, SourceError};

pub use relay_store::{Message, QueueStore, StoreKind};

/// Current UTC time as RFC 3339 with millisecond precision and a `Z` suffix.
pub(crate) fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
