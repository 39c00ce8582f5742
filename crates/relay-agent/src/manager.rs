// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry manager - owns the endpoint, the offline buffer and the
//! acquisition loop, and decides for every message whether it is sent now or
//! buffered for later.
//!
//! Every transition into `Connected` made through the manager flushes the
//! offline buffer exactly once. Buffering never triggers a flush.
//!
//! A reconnect started from the acquisition thread checks the shutdown flag
//! between attempts and while backing off, so `shutdown` never leaves a
//! detached reconnect behind that brings the link back up.

use crate::acquisition::{AcquisitionLoop, SLEEP_STEP};
use crate::buffer::{FlushReport, OfflineBuffer};
use crate::config::AgentConfig;
use crate::endpoint::backoff::{self, BackoffPolicy};
use crate::endpoint::{build_endpoint, EndpointError, EndpointInfo, TelemetryEndpoint};
use crate::error::AgentError;
use crate::preprocess::Preprocessor;
use crate::source::{build_source, ReadingSource};
use parking_lot::Mutex;
use relay_store::{open_store, Message, QueueStore};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// State shared with the acquisition thread.
struct Pipeline {
    endpoint: Arc<dyn TelemetryEndpoint>,
    buffer: OfflineBuffer,
    preprocessor: Preprocessor,
    max_retries: u32,
    backoff: BackoffPolicy,
    auto_reconnect: bool,
    shutting_down: AtomicBool,
}

impl Pipeline {
    fn provider(&self) -> String {
        self.endpoint.describe().provider
    }

    fn connect(&self) -> bool {
        match self.endpoint.connect() {
            Ok(fresh) => {
                if fresh {
                    tracing::info!(provider = %self.provider(), "Connected");
                    self.buffer.flush();
                }
                true
            }
            Err(e) => {
                tracing::error!(provider = %self.provider(), error = %e, "Connection failed");
                false
            }
        }
    }

    fn reconnect(&self) -> bool {
        match self.endpoint.reconnect_with(self.max_retries, &self.backoff) {
            Ok(0) => true,
            Ok(attempt) => {
                tracing::info!(provider = %self.provider(), attempt, "Reconnected");
                self.buffer.flush();
                true
            }
            Err(e) => {
                tracing::error!(provider = %self.provider(), error = %e, "Reconnection failed");
                false
            }
        }
    }

    fn send_telemetry(&self, message: Message) -> bool {
        if !self.endpoint.is_connected() {
            tracing::warn!("Not connected, storing offline");
            self.buffer.add(message);
            return false;
        }

        match self.endpoint.send(&message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Send failed, storing offline");
                self.buffer.add(message);
                false
            }
        }
    }

    fn handle_reading(&self, reading: Message) {
        if !self.preprocessor.should_send(&reading) {
            tracing::debug!("Reading unchanged, skipping");
            return;
        }

        let message = self.preprocessor.preprocess(reading);
        let sent = self.send_telemetry(message);

        if !sent && self.auto_reconnect && !self.endpoint.is_connected() {
            self.reconnect_unless_stopping();
        }
    }

    fn is_stopping(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Bounded reconnect that yields to a concurrent shutdown.
    fn reconnect_unless_stopping(&self) {
        if self.is_stopping() {
            return;
        }

        let outcome = backoff::retry_connect_until(
            self.endpoint.as_ref(),
            self.max_retries,
            &self.backoff,
            &mut |delay| self.sleep_unless_stopping(delay),
            &|| self.is_stopping(),
        );

        match outcome {
            Ok(attempt) if self.is_stopping() => {
                // Shutdown raced the last attempt; undo it instead of flushing
                if attempt > 0 {
                    tracing::info!("Shutdown requested during reconnect, disconnecting");
                    if let Err(e) = self.endpoint.disconnect() {
                        tracing::error!(error = %e, "Error during disconnect");
                    }
                }
            }
            Ok(0) => {}
            Ok(attempt) => {
                tracing::info!(provider = %self.provider(), attempt, "Reconnected");
                self.buffer.flush();
            }
            Err(EndpointError::Cancelled) => {
                tracing::debug!("Reconnect abandoned for shutdown");
            }
            Err(e) => {
                tracing::error!(provider = %self.provider(), error = %e, "Reconnection failed");
            }
        }
    }

    fn sleep_unless_stopping(&self, delay: Duration) {
        let mut remaining = delay;
        while !remaining.is_zero() && !self.is_stopping() {
            let step = remaining.min(SLEEP_STEP);
            thread::sleep(step);
            remaining -= step;
        }
    }
}

/// Store-and-forward telemetry orchestrator.
pub struct TelemetryManager {
    pipeline: Arc<Pipeline>,
    acquisition: Mutex<AcquisitionLoop>,
}

impl TelemetryManager {
    /// Assemble a manager from explicit collaborators.
    ///
    /// `store` is `None` when offline buffering is disabled.
    pub fn new(
        config: &AgentConfig,
        endpoint: Arc<dyn TelemetryEndpoint>,
        store: Option<Arc<dyn QueueStore>>,
        source: Box<dyn ReadingSource>,
    ) -> Self {
        let buffer =
            OfflineBuffer::new(store).with_batch_size(config.offline_storage.batch_size);
        buffer.attach_endpoint(Arc::clone(&endpoint));

        let pipeline = Arc::new(Pipeline {
            endpoint,
            buffer,
            preprocessor: Preprocessor::new(config.acquisition.suppress_unchanged),
            max_retries: config.acquisition.max_retries,
            backoff: config.backoff(),
            auto_reconnect: config.acquisition.auto_reconnect,
            shutting_down: AtomicBool::new(false),
        });

        let sink = Arc::clone(&pipeline);
        let acquisition = AcquisitionLoop::new(source, config.read_interval(), move |reading| {
            sink.handle_reading(reading)
        });

        tracing::info!(
            provider = %pipeline.provider(),
            buffering = pipeline.buffer.store().is_some(),
            "Telemetry manager initialized"
        );

        Self {
            pipeline,
            acquisition: Mutex::new(acquisition),
        }
    }

    /// Build endpoint, offline store and reading source from configuration.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;

        let store = open_configured_store(config)?;
        let endpoint = build_endpoint(&config.endpoint);
        let source = build_source(&config.acquisition);

        Ok(Self::new(config, endpoint, store, source))
    }

    /// One connection attempt; flushes the buffer on a fresh connection.
    pub fn connect(&self) -> bool {
        self.pipeline.connect()
    }

    /// Bounded reconnect with backoff; flushes the buffer on success.
    pub fn reconnect(&self) -> bool {
        self.pipeline.reconnect()
    }

    pub fn disconnect(&self) {
        match self.pipeline.endpoint.disconnect() {
            Ok(()) => tracing::info!(provider = %self.pipeline.provider(), "Disconnected"),
            Err(e) => tracing::error!(error = %e, "Error during disconnect"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pipeline.endpoint.is_connected()
    }

    /// Send now, or buffer when disconnected or the send fails.
    ///
    /// Returns `true` only when the endpoint accepted the message.
    pub fn send_telemetry(&self, message: Message) -> bool {
        self.pipeline.send_telemetry(message)
    }

    /// Process a sensor reading the way the acquisition loop does.
    pub fn ingest(&self, reading: Message) {
        self.pipeline.handle_reading(reading)
    }

    /// Flush the offline buffer now.
    pub fn flush(&self) -> FlushReport {
        self.pipeline.buffer.flush()
    }

    /// Messages waiting in the offline buffer.
    pub fn pending_messages(&self) -> usize {
        self.pipeline.buffer.pending()
    }

    /// Offline buffer, for inspection tools.
    pub fn buffer(&self) -> &OfflineBuffer {
        &self.pipeline.buffer
    }

    /// Connect (falling back to a bounded reconnect), then start acquisition.
    ///
    /// Acquisition starts whether or not the connection succeeded; readings
    /// are buffered until the link comes up.
    pub fn start(&self) -> Result<(), AgentError> {
        self.pipeline.shutting_down.store(false, Ordering::SeqCst);
        if !self.connect() {
            tracing::warn!("Initial connection failed, trying reconnect");
            self.reconnect();
        }

        self.acquisition.lock().start()?;
        Ok(())
    }

    /// Stop acquisition, then disconnect.
    ///
    /// A reconnect running on the acquisition thread is abandoned.
    pub fn shutdown(&self) {
        self.pipeline.shutting_down.store(true, Ordering::SeqCst);
        if !self.acquisition.lock().stop() {
            tracing::error!("Acquisition loop did not stop cleanly");
        }
        self.disconnect();
        tracing::info!(pending = self.pending_messages(), "Telemetry manager shut down");
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquisition.lock().is_running()
    }

    /// Register the handler for cloud-to-device commands.
    pub fn on_command<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.pipeline
            .endpoint
            .register_command_handler(Arc::new(handler));
    }

    /// Endpoint description plus the offline backlog size.
    pub fn client_info(&self) -> EndpointInfo {
        self.pipeline
            .endpoint
            .describe()
            .with_detail("pending_messages", self.pending_messages())
    }
}

/// Open the configured offline store, or `None` when buffering is disabled.
pub fn open_configured_store(
    config: &AgentConfig,
) -> Result<Option<Arc<dyn QueueStore>>, AgentError> {
    let storage = &config.offline_storage;
    if !storage.enabled {
        return Ok(None);
    }

    let store = open_store(storage.kind, storage.resolved_path())?;
    Ok(Some(Arc::from(store)))
}
