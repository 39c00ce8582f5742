// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent configuration.
//!
//! Loaded from TOML, built programmatically with [`AgentConfig::builder`], or
//! both (the CLI loads a file and applies its flags on top). Every field has
//! a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [endpoint]
//! provider = "simulated"
//! device_id = "greenhouse-04"
//!
//! [endpoint.simulated]
//! connect_failure_rate = 0.3
//!
//! [acquisition]
//! source = "system"
//! read_interval_secs = 60
//! max_retries = 5
//!
//! [offline_storage]
//! type = "sqlite"
//! path = "/var/lib/relay/offline_messages.sqlite"
//!
//! [logging]
//! level = "debug"
//! ```

use crate::endpoint::backoff::{BackoffPolicy, DEFAULT_BASE_DELAY};
use crate::endpoint::console::ConsoleConfig;
use crate::endpoint::simulated::SimulatedConfig;
use crate::source::SourceKind;
use relay_store::StoreKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Shortest allowed acquisition interval.
pub const MIN_READ_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Cloud transport selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// JSON lines on stdout or a file
    #[default]
    Console,
    /// In-process link with configurable failure rates
    Simulated,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(ProviderKind::Console),
            "simulated" => Ok(ProviderKind::Simulated),
            other => Err(ConfigError::Invalid(format!(
                "unknown provider '{other}' (expected 'console' or 'simulated')"
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Console => write!(f, "console"),
            ProviderKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// `[endpoint]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Identifier stamped on published telemetry
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default)]
    pub console: ConsoleConfig,

    #[serde(default)]
    pub simulated: SimulatedConfig,
}

fn default_device_id() -> String {
    "relay-device".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            device_id: default_device_id(),
            console: ConsoleConfig::default(),
            simulated: SimulatedConfig::default(),
        }
    }
}

/// `[acquisition]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Where readings come from
    #[serde(default)]
    pub source: SourceKind,

    /// Seconds between readings (clamped to at least 5)
    #[serde(default = "default_read_interval")]
    pub read_interval_secs: u64,

    /// Connect attempts per reconnect
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base delay in seconds
    #[serde(default = "default_base_delay")]
    pub reconnect_base_delay_secs: f64,

    /// Try a bounded reconnect whenever a reading had to be buffered
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Skip readings identical to the previous one
    #[serde(default)]
    pub suppress_unchanged: bool,

    /// Filesystem root for the system source (`/sys`, `/proc` live below it)
    #[serde(default = "default_system_root")]
    pub system_root: PathBuf,
}

fn default_read_interval() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    DEFAULT_BASE_DELAY.as_secs_f64()
}

fn default_true() -> bool {
    true
}

fn default_system_root() -> PathBuf {
    PathBuf::from("/")
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            read_interval_secs: default_read_interval(),
            max_retries: default_max_retries(),
            reconnect_base_delay_secs: default_base_delay(),
            auto_reconnect: true,
            suppress_unchanged: false,
            system_root: default_system_root(),
        }
    }
}

/// `[offline_storage]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Buffer undelivered messages at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, rename = "type", alias = "kind")]
    pub kind: StoreKind,

    /// Queue location; defaults to `data/offline_messages.<ext>` for the kind
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Records sent per flush batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    crate::buffer::BATCH_SIZE
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: StoreKind::default(),
            path: None,
            batch_size: default_batch_size(),
        }
    }
}

impl StorageConfig {
    /// Effective queue location
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => match self.kind {
                StoreKind::File => PathBuf::from("data/offline_messages.json"),
                StoreKind::Sqlite => PathBuf::from("data/offline_messages.sqlite"),
            },
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `relay_agent=debug,relay_store=info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub offline_storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint.device_id is empty".into()));
        }

        let delay = self.acquisition.reconnect_base_delay_secs;
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "acquisition.reconnect_base_delay_secs must be a non-negative number, got {delay}"
            )));
        }

        let sim = &self.endpoint.simulated;
        for (name, rate) in [
            ("connect_failure_rate", sim.connect_failure_rate),
            ("send_failure_rate", sim.send_failure_rate),
            ("command_rate", sim.command_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "endpoint.simulated.{name} must be within [0, 1], got {rate}"
                )));
            }
        }

        if self.endpoint.console.output.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint.console.output is empty".into()));
        }

        let storage = &self.offline_storage;
        if let Some(path) = &storage.path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("offline_storage.path is empty".into()));
            }
        }
        if storage.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "offline_storage.batch_size must be at least 1".into(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level is empty".into()));
        }

        Ok(())
    }

    /// Acquisition interval with the 5 second floor applied
    pub fn read_interval(&self) -> Duration {
        Duration::from_secs(self.acquisition.read_interval_secs).max(MIN_READ_INTERVAL)
    }

    /// Reconnect backoff policy
    pub fn backoff(&self) -> BackoffPolicy {
        let base = Duration::try_from_secs_f64(self.acquisition.reconnect_base_delay_secs)
            .unwrap_or(DEFAULT_BASE_DELAY);
        BackoffPolicy::with_base_delay(base)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    provider: Option<ProviderKind>,
    device_id: Option<String>,
    console_output: Option<String>,
    simulated: Option<SimulatedConfig>,
    source: Option<SourceKind>,
    read_interval_secs: Option<u64>,
    max_retries: Option<u32>,
    reconnect_base_delay_secs: Option<f64>,
    auto_reconnect: Option<bool>,
    suppress_unchanged: Option<bool>,
    storage_enabled: Option<bool>,
    storage_kind: Option<StoreKind>,
    storage_path: Option<PathBuf>,
    batch_size: Option<usize>,
    log_level: Option<String>,
}

impl ConfigBuilder {
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Console output path (`-` for stdout)
    pub fn console_output(mut self, output: impl Into<String>) -> Self {
        self.console_output = Some(output.into());
        self
    }

    pub fn simulated(mut self, simulated: SimulatedConfig) -> Self {
        self.simulated = Some(simulated);
        self
    }

    pub fn source(mut self, source: SourceKind) -> Self {
        self.source = Some(source);
        self
    }

    /// Seconds between readings
    pub fn read_interval_secs(mut self, secs: u64) -> Self {
        self.read_interval_secs = Some(secs);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Backoff base delay in seconds
    pub fn reconnect_base_delay_secs(mut self, secs: f64) -> Self {
        self.reconnect_base_delay_secs = Some(secs);
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }

    pub fn suppress_unchanged(mut self, enabled: bool) -> Self {
        self.suppress_unchanged = Some(enabled);
        self
    }

    /// Enable or disable offline buffering
    pub fn storage_enabled(mut self, enabled: bool) -> Self {
        self.storage_enabled = Some(enabled);
        self
    }

    pub fn storage_kind(mut self, kind: StoreKind) -> Self {
        self.storage_kind = Some(kind);
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> AgentConfig {
        let mut config = AgentConfig::default();

        if let Some(provider) = self.provider {
            config.endpoint.provider = provider;
        }
        if let Some(id) = self.device_id {
            config.endpoint.device_id = id;
        }
        if let Some(output) = self.console_output {
            config.endpoint.console.output = output;
        }
        if let Some(simulated) = self.simulated {
            config.endpoint.simulated = simulated;
        }

        let acquisition = &mut config.acquisition;
        acquisition.source = self.source.unwrap_or(acquisition.source);
        acquisition.read_interval_secs = self
            .read_interval_secs
            .unwrap_or(acquisition.read_interval_secs);
        acquisition.max_retries = self.max_retries.unwrap_or(acquisition.max_retries);
        acquisition.reconnect_base_delay_secs = self
            .reconnect_base_delay_secs
            .unwrap_or(acquisition.reconnect_base_delay_secs);
        acquisition.auto_reconnect = self.auto_reconnect.unwrap_or(acquisition.auto_reconnect);
        acquisition.suppress_unchanged = self
            .suppress_unchanged
            .unwrap_or(acquisition.suppress_unchanged);

        let storage = &mut config.offline_storage;
        storage.enabled = self.storage_enabled.unwrap_or(storage.enabled);
        storage.kind = self.storage_kind.unwrap_or(storage.kind);
        if self.storage_path.is_some() {
            storage.path = self.storage_path;
        }
        storage.batch_size = self.batch_size.unwrap_or(storage.batch_size);

        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AgentConfig::from_toml_str("").unwrap();

        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.endpoint.provider, ProviderKind::Console);
        assert_eq!(config.acquisition.read_interval_secs, 300);
        assert_eq!(config.acquisition.max_retries, 3);
        assert!(config.acquisition.auto_reconnect);
        assert!(config.offline_storage.enabled);
        assert_eq!(config.offline_storage.kind, StoreKind::Sqlite);
        assert_eq!(config.offline_storage.batch_size, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_file() {
        let toml = r#"
            [endpoint]
            provider = "simulated"
            device_id = "greenhouse-04"

            [endpoint.simulated]
            connect_failure_rate = 0.5
            seed = 9

            [acquisition]
            source = "system"
            read_interval_secs = 60
            max_retries = 5
            reconnect_base_delay_secs = 0.5
            auto_reconnect = false

            [offline_storage]
            type = "json"
            path = "/tmp/relay/queue.json"
            batch_size = 25

            [logging]
            level = "relay_agent=debug"
            file = "/tmp/relay/agent.log"
        "#;

        let config = AgentConfig::from_toml_str(toml).unwrap();

        assert_eq!(config.endpoint.provider, ProviderKind::Simulated);
        assert_eq!(config.endpoint.device_id, "greenhouse-04");
        assert_eq!(config.endpoint.simulated.connect_failure_rate, 0.5);
        // Unset fields keep the section defaults
        assert_eq!(config.endpoint.simulated.send_failure_rate, 0.05);
        assert_eq!(config.endpoint.simulated.seed, Some(9));
        assert_eq!(config.acquisition.source, SourceKind::System);
        assert_eq!(config.acquisition.max_retries, 5);
        assert!(!config.acquisition.auto_reconnect);
        assert_eq!(config.offline_storage.kind, StoreKind::File);
        assert_eq!(
            config.offline_storage.resolved_path(),
            PathBuf::from("/tmp/relay/queue.json")
        );
        assert_eq!(config.offline_storage.batch_size, 25);
        assert_eq!(
            config.logging.file,
            Some(PathBuf::from("/tmp/relay/agent.log"))
        );
        assert_eq!(config.backoff().base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_read_interval_floor() {
        let config = AgentConfig::builder().read_interval_secs(1).build();
        assert_eq!(config.read_interval(), Duration::from_secs(5));

        let config = AgentConfig::builder().read_interval_secs(30).build();
        assert_eq!(config.read_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_path_follows_kind() {
        let file = AgentConfig::builder().storage_kind(StoreKind::File).build();
        assert_eq!(
            file.offline_storage.resolved_path(),
            PathBuf::from("data/offline_messages.json")
        );

        let sqlite = AgentConfig::default();
        assert_eq!(
            sqlite.offline_storage.resolved_path(),
            PathBuf::from("data/offline_messages.sqlite")
        );
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "[offline_storage]\nbatch_size = 0",
            "[offline_storage]\npath = \"\"",
            "[endpoint]\ndevice_id = \"  \"",
            "[endpoint.simulated]\nsend_failure_rate = 1.5",
            "[endpoint.simulated]\ncommand_rate = -0.1",
            "[acquisition]\nreconnect_base_delay_secs = -1.0",
            "[logging]\nlevel = \"\"",
        ];

        for case in cases {
            let err = AgentConfig::from_toml_str(case).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "case {case:?}");
        }
    }

    #[test]
    fn test_unknown_values_are_parse_errors() {
        let err = AgentConfig::from_toml_str("[endpoint]\nprovider = \"carrier-pigeon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));

        let err = AgentConfig::from_toml_str("[offline_storage]\ntype = \"redis\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!(
            "Simulated".parse::<ProviderKind>().unwrap(),
            ProviderKind::Simulated
        );
        assert!("aws".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = AgentConfig::builder()
            .provider(ProviderKind::Simulated)
            .device_id("bench-1")
            .max_retries(0)
            .storage_kind(StoreKind::File)
            .storage_path("/tmp/q.json")
            .batch_size(3)
            .log_level("debug")
            .build();

        assert_eq!(config.endpoint.provider, ProviderKind::Simulated);
        assert_eq!(config.endpoint.device_id, "bench-1");
        assert_eq!(config.acquisition.max_retries, 0);
        assert_eq!(config.offline_storage.kind, StoreKind::File);
        assert_eq!(config.offline_storage.batch_size, 3);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_falls_back_on_bad_delay() {
        let config = AgentConfig::builder()
            .reconnect_base_delay_secs(f64::NAN)
            .build();
        assert_eq!(config.backoff().base_delay, DEFAULT_BASE_DELAY);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[acquisition]\nmax_retries = 7\n").unwrap();

        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.acquisition.max_retries, 7);

        assert!(matches!(
            AgentConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
