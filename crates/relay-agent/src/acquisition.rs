// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acquisition loop - polls a reading source on a background thread.
//!
//! Each cycle reads every sensor, stamps the reading with a UTC timestamp and
//! hands it to the callback. A failed read still yields a reading (empty
//! apart from the timestamp). The loop sleeps in short steps so a stop
//! request is honored within [`SLEEP_STEP`].

use crate::source::ReadingSource;
use relay_store::Message;
use serde_json::Value;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Granularity of the stop check while sleeping between readings.
pub const SLEEP_STEP: Duration = Duration::from_millis(250);

/// How long [`AcquisitionLoop::stop`] waits for the thread to exit.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

type Callback = Arc<dyn Fn(Message) + Send + Sync>;

struct Worker {
    handle: JoinHandle<Box<dyn ReadingSource>>,
    // Disconnects when the thread exits; lets `stop` wait with a timeout.
    done: mpsc::Receiver<()>,
}

/// Background polling of one [`ReadingSource`].
pub struct AcquisitionLoop {
    interval: Duration,
    on_reading: Callback,
    source: Option<Box<dyn ReadingSource>>,
    running: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl AcquisitionLoop {
    /// Create a stopped loop.
    pub fn new<F>(source: Box<dyn ReadingSource>, interval: Duration, on_reading: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        Self {
            interval,
            on_reading: Arc::new(on_reading),
            source: Some(source),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Check if the loop thread is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Get a handle to stop the loop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    /// Spawn the loop thread (no-op when already running).
    ///
    /// Fails when the source is still held by a previous thread that did not
    /// exit within the join timeout, or when the thread cannot be spawned.
    pub fn start(&mut self) -> io::Result<()> {
        if self.worker.is_some() {
            if self.running.load(Ordering::SeqCst) {
                tracing::warn!("Acquisition loop already running");
                return Ok(());
            }
            // Stopped through a StopHandle; reclaim the source first.
            self.stop();
        }

        let Some(mut source) = self.source.take() else {
            return Err(io::Error::other(
                "reading source is still held by a previous acquisition thread",
            ));
        };

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let running = Arc::clone(&self.running);
        let on_reading = Arc::clone(&self.on_reading);
        let interval = self.interval;
        let name = source.name().to_string();

        running.store(true, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("relay-acquisition".into())
            .spawn(move || {
                let _done = done_tx;
                run(&mut *source, &running, interval, on_reading.as_ref());
                source
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
                tracing::info!(
                    source = %name,
                    interval_secs = interval.as_secs_f64(),
                    "Acquisition loop started"
                );
                Ok(())
            }
            Err(e) => {
                // The closure (and the source with it) is gone with the failed spawn.
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Signal the thread and wait up to [`JOIN_TIMEOUT`] for it.
    ///
    /// Returns `true` when the thread exited in time (or was not running).
    /// After a timeout the thread is detached and treated as stopped.
    pub fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::SeqCst);

        let Some(worker) = self.worker.take() else {
            return true;
        };

        match worker.done.recv_timeout(JOIN_TIMEOUT) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_secs = JOIN_TIMEOUT.as_secs(),
                    "Acquisition thread did not stop in time, detaching"
                );
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match worker.handle.join() {
                Ok(source) => {
                    self.source = Some(source);
                    tracing::info!("Acquisition loop stopped");
                    true
                }
                Err(_) => {
                    tracing::error!("Acquisition thread panicked");
                    true
                }
            },
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

fn run(
    source: &mut dyn ReadingSource,
    running: &AtomicBool,
    interval: Duration,
    on_reading: &(dyn Fn(Message) + Send + Sync),
) {
    while running.load(Ordering::SeqCst) {
        let mut reading = match source.read_all() {
            Ok(reading) => reading,
            Err(e) => {
                tracing::error!(source = source.name(), error = %e, "Error reading sensor data");
                Message::new()
            }
        };
        reading.insert(
            "timestamp".to_string(),
            Value::String(crate::utc_timestamp()),
        );

        if panic::catch_unwind(AssertUnwindSafe(|| on_reading(reading))).is_err() {
            tracing::error!("Reading callback panicked");
        }

        sleep_while_running(running, interval);
    }
}

fn sleep_while_running(running: &AtomicBool, interval: Duration) {
    let mut remaining = interval;
    while !remaining.is_zero() && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLEEP_STEP);
        thread::sleep(step);
        remaining -= step;
    }
}

/// Handle to stop a running acquisition loop.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Stop the loop (it exits after the current step).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
