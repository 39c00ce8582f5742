// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scripted endpoint for tests.
//!
//! Connect and send outcomes are taken from queues; once a queue is empty the
//! default outcome applies. Every call is recorded so tests can assert on
//! attempt counts, timing and the exact messages delivered.

use super::command::{CommandDispatcher, CommandHandler, CommandResponse};
use super::link::Link;
use super::{ConnectionState, EndpointError, EndpointInfo, TelemetryEndpoint};
use parking_lot::Mutex;
use relay_store::Message;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Default)]
struct Script {
    connects: VecDeque<bool>,
    sends: VecDeque<bool>,
    connect_ok: bool,
    send_ok: bool,
}

#[derive(Default)]
struct Record {
    connect_times: Vec<Instant>,
    send_attempts: usize,
    disconnects: usize,
    sent: Vec<Message>,
}

/// Mock endpoint for testing.
pub struct MockEndpoint {
    link: Link<()>,
    commands: CommandDispatcher,
    script: Mutex<Script>,
    record: Mutex<Record>,
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEndpoint {
    /// Endpoint whose connects and sends succeed unless scripted otherwise
    pub fn new() -> Self {
        Self {
            link: Link::new(),
            commands: CommandDispatcher::new(),
            script: Mutex::new(Script {
                connect_ok: true,
                send_ok: true,
                ..Default::default()
            }),
            record: Mutex::new(Record::default()),
        }
    }

    /// Endpoint whose connects always fail
    pub fn unreachable() -> Self {
        let endpoint = Self::new();
        endpoint.script.lock().connect_ok = false;
        endpoint
    }

    /// Queue connect outcomes (`true` = success)
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.script.lock().connects.extend(outcomes);
    }

    /// Queue send outcomes (`true` = success)
    pub fn script_sends(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.script.lock().sends.extend(outcomes);
    }

    /// Outcome for connects once the script is exhausted
    pub fn set_connect_ok(&self, ok: bool) {
        self.script.lock().connect_ok = ok;
    }

    /// Outcome for sends once the script is exhausted
    pub fn set_send_ok(&self, ok: bool) {
        self.script.lock().send_ok = ok;
    }

    /// Simulate the transport dropping the session
    pub fn force_disconnect(&self) {
        let _ = self.link.teardown(|_| Ok(()));
    }

    /// Deliver a command as if it came from the cloud
    pub fn inject_command(&self, command: &str, payload: &Value) -> Option<CommandResponse> {
        self.commands.dispatch(command, payload)
    }

    pub fn connect_attempts(&self) -> usize {
        self.record.lock().connect_times.len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.record.lock().connect_times.clone()
    }

    /// Number of `send` calls, successful or not
    pub fn send_attempts(&self) -> usize {
        self.record.lock().send_attempts
    }

    pub fn disconnect_calls(&self) -> usize {
        self.record.lock().disconnects
    }

    /// Messages accepted, in delivery order
    pub fn sent(&self) -> Vec<Message> {
        self.record.lock().sent.clone()
    }
}

impl TelemetryEndpoint for MockEndpoint {
    fn connect(&self) -> Result<bool, EndpointError> {
        self.link.establish(|| {
            self.record.lock().connect_times.push(Instant::now());
            let mut script = self.script.lock();
            let ok = script.connects.pop_front().unwrap_or(script.connect_ok);
            if ok {
                Ok(())
            } else {
                Err(EndpointError::Connect("scripted connect failure".into()))
            }
        })
    }

    fn disconnect(&self) -> Result<(), EndpointError> {
        self.record.lock().disconnects += 1;
        self.link.teardown(|_| Ok(()))
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn send(&self, message: &Message) -> Result<(), EndpointError> {
        self.record.lock().send_attempts += 1;

        self.link.with_session(|_| {
            let mut script = self.script.lock();
            let ok = script.sends.pop_front().unwrap_or(script.send_ok);
            drop(script);

            if ok {
                self.record.lock().sent.push(message.clone());
                Ok(())
            } else {
                Err(EndpointError::Rejected("scripted send failure".into()))
            }
        })
    }

    fn register_command_handler(&self, handler: CommandHandler) {
        self.commands.register(handler);
    }

    fn describe(&self) -> EndpointInfo {
        EndpointInfo::new("mock", self.state())
            .with_detail("sent", self.record.lock().sent.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(n: u64) -> Message {
        json!({ "n": n }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_send_requires_connection() {
        let endpoint = MockEndpoint::new();

        assert!(matches!(
            endpoint.send(&msg(1)),
            Err(EndpointError::NotConnected)
        ));
        assert_eq!(endpoint.send_attempts(), 1);
        assert!(endpoint.sent().is_empty());
    }

    #[test]
    fn test_scripted_outcomes() {
        let endpoint = MockEndpoint::new();
        endpoint.script_connects([false]);
        endpoint.script_sends([true, false]);

        assert!(endpoint.connect().is_err());
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
        endpoint.connect().unwrap();

        endpoint.send(&msg(1)).unwrap();
        assert!(endpoint.send(&msg(2)).is_err());
        endpoint.send(&msg(3)).unwrap();

        assert_eq!(endpoint.sent(), vec![msg(1), msg(3)]);
        assert_eq!(endpoint.send_attempts(), 3);
        assert_eq!(endpoint.connect_attempts(), 2);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let endpoint = MockEndpoint::new();
        assert!(endpoint.connect().unwrap());
        assert!(!endpoint.connect().unwrap());
        assert_eq!(endpoint.connect_attempts(), 1);
    }

    #[test]
    fn test_force_disconnect() {
        let endpoint = MockEndpoint::new();
        endpoint.connect().unwrap();
        endpoint.force_disconnect();

        assert!(!endpoint.is_connected());
        assert_eq!(endpoint.disconnect_calls(), 0);
    }

    #[test]
    fn test_describe() {
        let endpoint = MockEndpoint::new();
        let info = endpoint.describe();
        assert_eq!(info.provider, "mock");
        assert_eq!(info.status, ConnectionState::Disconnected);
        assert_eq!(info.details["sent"], "0");
    }
}
