// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host metrics as sensor values (Linux).
//!
//! Reads thermal zones from `sys/class/thermal`, plus `proc/loadavg`,
//! `proc/uptime` and `proc/meminfo`, all relative to a configurable root so
//! tests can point it at a fake tree. Missing files are skipped; the read
//! fails only when nothing at all could be collected.

use super::{ReadingSource, SourceError};
use relay_store::Message;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub struct SystemSource {
    root: PathBuf,
}

impl SystemSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn thermal(&self) -> Result<Option<Value>, SourceError> {
        let dir = self.root.join("sys/class/thermal");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut zones: Vec<(String, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with("thermal_zone")
                    .then(|| (name, entry.path()))
            })
            .collect();
        zones.sort();

        let mut readings = Map::new();
        for (zone, path) in zones {
            let Ok(raw) = fs::read_to_string(path.join("temp")) else {
                tracing::debug!(zone = %zone, "Thermal zone has no readable temperature");
                continue;
            };
            let Ok(millis) = raw.trim().parse::<i64>() else {
                tracing::warn!(zone = %zone, raw = %raw.trim(), "Unparseable thermal reading");
                continue;
            };

            let label = fs::read_to_string(path.join("type"))
                .map(|t| t.trim().to_string())
                .ok()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| zone.clone());
            readings.insert(label, json!(millis as f64 / 1000.0));
        }

        Ok((!readings.is_empty()).then_some(Value::Object(readings)))
    }

    fn load(&self) -> Result<Option<Value>, SourceError> {
        let Some(raw) = read_optional(&self.root.join("proc/loadavg"))? else {
            return Ok(None);
        };

        let fields: Vec<f64> = raw
            .split_whitespace()
            .take(3)
            .map(|f| f.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| SourceError::Parse(format!("loadavg: {e}")))?;
        if fields.len() != 3 {
            return Err(SourceError::Parse(format!("loadavg: '{}'", raw.trim())));
        }

        Ok(Some(json!({
            "1m": fields[0],
            "5m": fields[1],
            "15m": fields[2],
        })))
    }

    fn uptime(&self) -> Result<Option<Value>, SourceError> {
        let Some(raw) = read_optional(&self.root.join("proc/uptime"))? else {
            return Ok(None);
        };

        let secs = raw
            .split_whitespace()
            .next()
            .and_then(|f| f.parse::<f64>().ok())
            .ok_or_else(|| SourceError::Parse(format!("uptime: '{}'", raw.trim())))?;
        Ok(Some(json!(secs)))
    }

    fn memory(&self) -> Result<Option<Value>, SourceError> {
        let Some(raw) = read_optional(&self.root.join("proc/meminfo"))? else {
            return Ok(None);
        };

        let mut memory = Map::new();
        for line in raw.lines() {
            let mut parts = line.split_whitespace();
            let key = match parts.next() {
                Some("MemTotal:") => "total_kb",
                Some("MemAvailable:") => "available_kb",
                _ => continue,
            };
            if let Some(kb) = parts.next().and_then(|v| v.parse::<u64>().ok()) {
                memory.insert(key.to_string(), json!(kb));
            }
        }

        Ok((!memory.is_empty()).then_some(Value::Object(memory)))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, SourceError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl ReadingSource for SystemSource {
    fn name(&self) -> &str {
        "system"
    }

    fn read_all(&mut self) -> Result<Message, SourceError> {
        let mut reading = Message::new();

        let sections = [
            ("thermal", self.thermal()),
            ("load", self.load()),
            ("uptime_secs", self.uptime()),
            ("memory", self.memory()),
        ];
        for (key, section) in sections {
            match section {
                Ok(Some(value)) => {
                    reading.insert(key.to_string(), value);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(section = key, error = %e, "Skipping sensor group"),
            }
        }

        if reading.is_empty() {
            return Err(SourceError::Unavailable(format!(
                "no readable metrics under {}",
                self.root.display()
            )));
        }
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fake_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "sys/class/thermal/thermal_zone0/temp", "45250\n");
        write(root, "sys/class/thermal/thermal_zone0/type", "cpu-thermal\n");
        write(root, "sys/class/thermal/thermal_zone1/temp", "38000\n");
        write(root, "sys/class/thermal/cooling_device0/type", "fan\n");
        write(root, "proc/loadavg", "0.52 0.58 0.61 1/467 12345\n");
        write(root, "proc/uptime", "12345.67 54321.00\n");
        write(
            root,
            "proc/meminfo",
            "MemTotal:        8041996 kB\nMemFree:  1000 kB\nMemAvailable:    5120044 kB\n",
        );
        dir
    }

    #[test]
    fn test_reads_fake_tree() {
        let dir = fake_root();
        let mut source = SystemSource::new(dir.path());

        let reading = source.read_all().unwrap();

        assert_eq!(reading["thermal"]["cpu-thermal"], json!(45.25));
        assert_eq!(reading["thermal"]["thermal_zone1"], json!(38.0));
        assert_eq!(reading["thermal"].as_object().unwrap().len(), 2);
        assert_eq!(reading["load"]["5m"], json!(0.58));
        assert_eq!(reading["uptime_secs"], json!(12345.67));
        assert_eq!(reading["memory"]["total_kb"], json!(8041996));
        assert_eq!(reading["memory"]["available_kb"], json!(5120044));
    }

    #[test]
    fn test_partial_tree() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "proc/uptime", "10.00 20.00\n");
        write(dir.path(), "proc/loadavg", "garbage\n");

        let reading = SystemSource::new(dir.path()).read_all().unwrap();

        assert_eq!(reading.len(), 1);
        assert_eq!(reading["uptime_secs"], json!(10.0));
    }

    #[test]
    fn test_empty_tree_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemSource::new(dir.path()).read_all().unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
