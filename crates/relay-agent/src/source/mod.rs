// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reading sources
//!
//! A source produces one mapping of sensor name to value per acquisition
//! cycle. Values may be nested objects; the preprocessor flattens them.

mod simulated;
mod system;

pub use simulated::SimulatedSource;
pub use system::SystemSource;

use crate::config::AcquisitionConfig;
use relay_store::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while reading sensors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed sensor data: {0}")]
    Parse(String),

    #[error("No sensor data available: {0}")]
    Unavailable(String),
}

/// Reading source selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Random-walk environmental sensors
    #[default]
    Simulated,
    /// Host metrics from `/sys` and `/proc`
    System,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Simulated => write!(f, "simulated"),
            SourceKind::System => write!(f, "system"),
        }
    }
}

/// Something that can be polled for sensor values.
pub trait ReadingSource: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Read every sensor once
    fn read_all(&mut self) -> Result<Message, SourceError>;
}

impl<T: ReadingSource + ?Sized> ReadingSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_all(&mut self) -> Result<Message, SourceError> {
        (**self).read_all()
    }
}

/// Closure adapter.
pub struct FnSource<F> {
    name: String,
    read: F,
}

impl<F> FnSource<F>
where
    F: FnMut() -> Result<Message, SourceError> + Send,
{
    pub fn new(name: impl Into<String>, read: F) -> Self {
        Self {
            name: name.into(),
            read,
        }
    }
}

impl<F> ReadingSource for FnSource<F>
where
    F: FnMut() -> Result<Message, SourceError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn read_all(&mut self) -> Result<Message, SourceError> {
        (self.read)()
    }
}

/// Build the source selected by configuration.
pub fn build_source(config: &AcquisitionConfig) -> Box<dyn ReadingSource> {
    match config.source {
        SourceKind::Simulated => Box::new(SimulatedSource::new(None)),
        SourceKind::System => Box::new(SystemSource::new(&config.system_root)),
    }
}
