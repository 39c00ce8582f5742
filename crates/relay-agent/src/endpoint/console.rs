// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Console endpoint - publishes each message as one JSON line.
//!
//! Output goes to stdout (`"-"`) or is appended to a file. When enabled,
//! commands are read from stdin as `{"command": ..., "payload": ...}` lines
//! and their responses are written to the same output.

use super::command::{CommandDispatcher, CommandHandler};
use super::link::Link;
use super::{ConnectionState, EndpointError, EndpointInfo, TelemetryEndpoint};
use relay_store::Message;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Output = Box<dyn Write + Send>;

/// Console endpoint settings (`[endpoint.console]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Output path (use `-` for stdout)
    #[serde(default = "default_output")]
    pub output: String,

    /// Read commands from stdin
    #[serde(default)]
    pub commands_from_stdin: bool,
}

fn default_output() -> String {
    "-".to_string()
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            commands_from_stdin: false,
        }
    }
}

/// Endpoint writing JSON lines to stdout or a file.
pub struct ConsoleEndpoint {
    device_id: String,
    config: ConsoleConfig,
    link: Arc<Link<Output>>,
    commands: Arc<CommandDispatcher>,
    delivered: AtomicU64,
    reader_started: AtomicBool,
}

impl ConsoleEndpoint {
    pub fn new(device_id: &str, config: ConsoleConfig) -> Self {
        Self {
            device_id: device_id.to_string(),
            config,
            link: Arc::new(Link::new()),
            commands: Arc::new(CommandDispatcher::new()),
            delivered: AtomicU64::new(0),
            reader_started: AtomicBool::new(false),
        }
    }

    /// Number of messages written so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn open_output(&self) -> Result<Output, EndpointError> {
        if self.config.output == "-" {
            return Ok(Box::new(io::stdout()));
        }

        let path = Path::new(&self.config.output);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    }

    fn spawn_command_reader(&self) {
        if self.reader_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let link = Arc::clone(&self.link);
        let commands = Arc::clone(&self.commands);
        let spawned = std::thread::Builder::new()
            .name("relay-console-commands".into())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => answer_command(&link, &commands, &line),
                        Err(e) => {
                            tracing::warn!(error = %e, "Command input closed");
                            break;
                        }
                    }
                }
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to start command reader");
            self.reader_started.store(false, Ordering::SeqCst);
        }
    }
}

/// Dispatch one command line and write the response to the output.
fn answer_command(link: &Link<Output>, commands: &CommandDispatcher, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let Some(response) = commands.dispatch_raw(line.as_bytes()) else {
        return;
    };

    let written = link.with_session(|out| {
        let body = serde_json::to_string(&json!({ "command_response": response }))?;
        writeln!(out, "{body}")?;
        out.flush()?;
        Ok(())
    });
    if let Err(e) = written {
        tracing::warn!(error = %e, "Failed to write command response");
    }
}

impl TelemetryEndpoint for ConsoleEndpoint {
    fn connect(&self) -> Result<bool, EndpointError> {
        let fresh = self.link.establish(|| self.open_output())?;
        if fresh {
            tracing::info!(output = %self.config.output, "Console endpoint connected");
            if self.config.commands_from_stdin {
                self.spawn_command_reader();
            }
        }
        Ok(fresh)
    }

    fn disconnect(&self) -> Result<(), EndpointError> {
        self.link.teardown(|mut out| {
            out.flush()?;
            Ok(())
        })
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn send(&self, message: &Message) -> Result<(), EndpointError> {
        let body = serde_json::to_string(&json!({
            "device_id": self.device_id,
            "telemetry": message,
        }))?;

        self.link.with_session(|out| {
            writeln!(out, "{body}")?;
            out.flush()?;
            Ok(())
        })?;

        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn register_command_handler(&self, handler: CommandHandler) {
        self.commands.register(handler);
    }

    fn describe(&self) -> EndpointInfo {
        EndpointInfo::new("console", self.state())
            .with_detail("device_id", &self.device_id)
            .with_detail("output", &self.config.output)
            .with_detail("delivered", self.delivered())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn file_endpoint(dir: &tempfile::TempDir) -> (ConsoleEndpoint, std::path::PathBuf) {
        let path = dir.path().join("out").join("telemetry.jsonl");
        let config = ConsoleConfig {
            output: path.to_string_lossy().into_owned(),
            commands_from_stdin: false,
        };
        (ConsoleEndpoint::new("dev-7", config), path)
    }

    fn lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_writes_one_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, path) = file_endpoint(&dir);

        endpoint.connect().unwrap();
        for n in 0..3 {
            let message = json!({ "seq": n }).as_object().cloned().unwrap();
            endpoint.send(&message).unwrap();
        }
        endpoint.disconnect().unwrap();

        let written = lines(&path);
        assert_eq!(written.len(), 3);
        assert_eq!(written[0]["device_id"], "dev-7");
        assert_eq!(written[2]["telemetry"]["seq"], 2);
        assert_eq!(endpoint.delivered(), 3);
    }

    #[test]
    fn test_send_while_disconnected_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, path) = file_endpoint(&dir);

        let message = json!({ "seq": 0 }).as_object().cloned().unwrap();
        assert!(matches!(
            endpoint.send(&message),
            Err(EndpointError::NotConnected)
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_output_is_appended_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, path) = file_endpoint(&dir);
        let message = json!({ "v": 1 }).as_object().cloned().unwrap();

        endpoint.connect().unwrap();
        endpoint.send(&message).unwrap();
        endpoint.disconnect().unwrap();
        endpoint.connect().unwrap();
        endpoint.send(&message).unwrap();

        assert_eq!(lines(&path).len(), 2);
    }

    #[test]
    fn test_unopenable_output_leaves_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConsoleConfig {
            output: dir.path().to_string_lossy().into_owned(),
            commands_from_stdin: false,
        };
        let endpoint = ConsoleEndpoint::new("dev", config);

        assert!(endpoint.connect().is_err());
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_command_response_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, path) = file_endpoint(&dir);
        endpoint.register_command_handler(Arc::new(|name, _| Ok(json!({ "ack": name }))));
        endpoint.connect().unwrap();

        answer_command(
            &endpoint.link,
            &endpoint.commands,
            r#"{"command": "blink", "payload": {}}"#,
        );
        answer_command(&endpoint.link, &endpoint.commands, "   ");

        let written = lines(&path);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["command_response"]["command"], "blink");
        assert_eq!(written[0]["command_response"]["response"]["ack"], "blink");
    }

    #[test]
    fn test_describe() {
        let endpoint = ConsoleEndpoint::new("dev-1", ConsoleConfig::default());
        let info = endpoint.describe();

        assert_eq!(info.provider, "console");
        assert_eq!(info.details["output"], "-");
        assert_eq!(info.details["device_id"], "dev-1");
    }
}
