// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flaky in-process endpoint.
//!
//! Connects and sends fail with configured probabilities so store-and-forward
//! can be observed without a real uplink. A failed send drops the link.
//!
//! The simulated cloud also talks back: after an accepted message it sends a
//! `ping` command with probability `command_rate`, answered by the registered
//! command handler. The response is only logged.

use super::command::{CommandDispatcher, CommandHandler};
use super::link::Link;
use super::{ConnectionState, EndpointError, EndpointInfo, TelemetryEndpoint};
use parking_lot::Mutex;
use relay_store::Message;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Simulated endpoint settings (`[endpoint.simulated]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Probability in `[0, 1]` that a connect attempt fails
    pub connect_failure_rate: f64,

    /// Probability in `[0, 1]` that a send fails and drops the link
    pub send_failure_rate: f64,

    /// Artificial latency per connect and send
    pub latency_ms: u64,

    /// Probability in `[0, 1]` that an accepted message is followed by a
    /// `ping` command from the simulated cloud
    pub command_rate: f64,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            connect_failure_rate: 0.2,
            send_failure_rate: 0.05,
            latency_ms: 0,
            command_rate: 0.0,
            seed: None,
        }
    }
}

/// Session handle; counts messages delivered on this session.
struct Session {
    id: u64,
    delivered: u64,
}

pub struct SimulatedEndpoint {
    device_id: String,
    config: SimulatedConfig,
    link: Link<Session>,
    commands: CommandDispatcher,
    rng: Mutex<fastrand::Rng>,
    sessions: AtomicU64,
    delivered: AtomicU64,
}

impl SimulatedEndpoint {
    pub fn new(device_id: &str, config: SimulatedConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };

        Self {
            device_id: device_id.to_string(),
            config,
            link: Link::new(),
            commands: CommandDispatcher::new(),
            rng: Mutex::new(rng),
            sessions: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Total messages accepted across sessions
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.rng.lock().f64() < rate
    }

    /// Deliver a `ping` from the simulated cloud to the command handler.
    fn cloud_ping(&self, session: u64, delivered: u64) {
        let payload = json!({ "session": session, "delivered": delivered });
        if let Some(reply) = self.commands.dispatch("ping", &payload) {
            tracing::info!(
                device_id = %self.device_id,
                command = %reply.command,
                response = %reply.response,
                "Simulated cloud received command response"
            );
        }
    }

    fn latency(&self) {
        if self.config.latency_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.latency_ms));
        }
    }
}

impl TelemetryEndpoint for SimulatedEndpoint {
    fn connect(&self) -> Result<bool, EndpointError> {
        let fresh = self.link.establish(|| {
            self.latency();
            if self.roll(self.config.connect_failure_rate) {
                return Err(EndpointError::Connect("simulated broker unreachable".into()));
            }
            Ok(Session {
                id: self.sessions.fetch_add(1, Ordering::Relaxed) + 1,
                delivered: 0,
            })
        })?;

        if fresh {
            tracing::info!(device_id = %self.device_id, "Simulated endpoint connected");
        }
        Ok(fresh)
    }

    fn disconnect(&self) -> Result<(), EndpointError> {
        self.link.teardown(|session| {
            tracing::debug!(
                session = session.id,
                delivered = session.delivered,
                "Simulated session closed"
            );
            Ok(())
        })
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn send(&self, message: &Message) -> Result<(), EndpointError> {
        let size = serde_json::to_vec(message)?.len();

        let session_id = self.link.with_session(|session| {
            self.latency();
            if self.roll(self.config.send_failure_rate) {
                return Err(EndpointError::ConnectionLost(format!(
                    "simulated drop on session {}",
                    session.id
                )));
            }
            session.delivered += 1;
            tracing::trace!(session = session.id, bytes = size, "Simulated publish");
            Ok(session.id)
        })?;

        let delivered = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        if self.roll(self.config.command_rate) {
            self.cloud_ping(session_id, delivered);
        }
        Ok(())
    }

    fn register_command_handler(&self, handler: CommandHandler) {
        self.commands.register(handler);
    }

    fn describe(&self) -> EndpointInfo {
        EndpointInfo::new("simulated", self.state())
            .with_detail("device_id", &self.device_id)
            .with_detail("delivered", self.delivered())
            .with_detail("sessions", self.sessions.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;

    fn reliable() -> SimulatedConfig {
        SimulatedConfig {
            connect_failure_rate: 0.0,
            send_failure_rate: 0.0,
            latency_ms: 0,
            command_rate: 0.0,
            seed: Some(1),
        }
    }

    fn msg() -> Message {
        json!({ "temperature": 21.5 }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_reliable_link_delivers() {
        let endpoint = SimulatedEndpoint::new("sim-1", reliable());
        endpoint.connect().unwrap();

        for _ in 0..10 {
            endpoint.send(&msg()).unwrap();
        }
        assert_eq!(endpoint.delivered(), 10);
        assert_eq!(endpoint.describe().details["sessions"], "1");
    }

    #[test]
    fn test_always_failing_connect() {
        let endpoint = SimulatedEndpoint::new(
            "sim-2",
            SimulatedConfig {
                connect_failure_rate: 1.0,
                ..reliable()
            },
        );

        assert!(matches!(endpoint.connect(), Err(EndpointError::Connect(_))));
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_failed_send_drops_link() {
        let endpoint = SimulatedEndpoint::new(
            "sim-3",
            SimulatedConfig {
                send_failure_rate: 1.0,
                ..reliable()
            },
        );
        endpoint.connect().unwrap();

        let err = endpoint.send(&msg()).unwrap_err();
        assert!(err.is_link_failure());
        assert!(!endpoint.is_connected());
        assert_eq!(endpoint.delivered(), 0);
    }

    #[test]
    fn test_simulated_cloud_sends_commands() {
        let endpoint = SimulatedEndpoint::new(
            "sim-4",
            SimulatedConfig {
                command_rate: 1.0,
                ..reliable()
            },
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        endpoint.register_command_handler(Arc::new(move |name: &str, payload: &Value| {
            sink.lock().push((name.to_string(), payload.clone()));
            Ok(json!({ "pong": true }))
        }));
        endpoint.connect().unwrap();

        endpoint.send(&msg()).unwrap();
        endpoint.send(&msg()).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "ping");
        assert_eq!(seen[1].1["delivered"], 2);
    }

    #[test]
    fn test_no_commands_by_default() {
        let endpoint = SimulatedEndpoint::new("sim-5", reliable());
        endpoint.register_command_handler(Arc::new(|_: &str, _: &Value| {
            panic!("handler must not run")
        }));
        endpoint.connect().unwrap();

        endpoint.send(&msg()).unwrap();
        assert_eq!(endpoint.delivered(), 1);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let config = SimulatedConfig {
            connect_failure_rate: 0.5,
            send_failure_rate: 0.0,
            latency_ms: 0,
            command_rate: 0.0,
            seed: Some(42),
        };

        let outcomes = |endpoint: &SimulatedEndpoint| -> Vec<bool> {
            (0..20)
                .map(|_| {
                    let ok = endpoint.connect().is_ok();
                    let _ = endpoint.disconnect();
                    ok
                })
                .collect()
        };

        let a = SimulatedEndpoint::new("a", config.clone());
        let b = SimulatedEndpoint::new("b", config);
        assert_eq!(outcomes(&a), outcomes(&b));
    }
}
