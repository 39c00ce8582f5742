// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent-level errors
//!
//! Only construction and startup surface errors to the caller; runtime
//! transport and storage failures are handled where they occur.

use crate::config::ConfigError;
use relay_store::StoreError;
use thiserror::Error;

/// Errors that stop the agent from being built or started.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("offline storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
