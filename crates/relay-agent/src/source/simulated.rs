// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Random-walk environmental sensors.
//!
//! Mimics a board with an SHTC3 (temperature, humidity), an STC31-C (CO2) and
//! an SPS30 (particulate matter). Each read nudges every value by a bounded
//! random step and clamps it to a plausible range.

use super::{ReadingSource, SourceError};
use relay_store::Message;
use serde_json::json;

/// One simulated quantity.
struct Walk {
    value: f64,
    step: f64,
    min: f64,
    max: f64,
}

impl Walk {
    const fn new(value: f64, step: f64, min: f64, max: f64) -> Self {
        Self {
            value,
            step,
            min,
            max,
        }
    }

    fn advance(&mut self, rng: &mut fastrand::Rng) -> f64 {
        let delta = (rng.f64() * 2.0 - 1.0) * self.step;
        self.value = (self.value + delta).clamp(self.min, self.max);
        round2(self.value)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct SimulatedSource {
    rng: fastrand::Rng,
    temperature: Walk,
    humidity: Walk,
    co2: Walk,
    pm2_5: Walk,
    pm10: Walk,
}

impl SimulatedSource {
    /// Create a source; a fixed `seed` makes the sequence reproducible
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };

        Self {
            rng,
            temperature: Walk::new(21.0, 0.4, -20.0, 60.0),
            humidity: Walk::new(45.0, 1.5, 0.0, 100.0),
            co2: Walk::new(600.0, 25.0, 400.0, 5000.0),
            pm2_5: Walk::new(8.0, 1.0, 0.0, 500.0),
            pm10: Walk::new(12.0, 1.5, 0.0, 500.0),
        }
    }
}

impl ReadingSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn read_all(&mut self) -> Result<Message, SourceError> {
        let rng = &mut self.rng;
        let reading = json!({
            "shtc3": {
                "temperature": self.temperature.advance(rng),
                "humidity": self.humidity.advance(rng),
            },
            "stc31c": {
                "co2": self.co2.advance(rng),
            },
            "sps30": {
                "pm2.5": self.pm2_5.advance(rng),
                "pm10": self.pm10.advance(rng),
            },
        });

        match reading {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(SourceError::Parse(format!("unexpected reading shape: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_shape() {
        let mut source = SimulatedSource::new(Some(7));
        let reading = source.read_all().unwrap();

        assert!(reading["shtc3"]["temperature"].is_f64());
        assert!(reading["shtc3"]["humidity"].is_f64());
        assert!(reading["stc31c"]["co2"].is_f64());
        assert!(reading["sps30"]["pm2.5"].is_f64());
    }

    #[test]
    fn test_values_stay_in_range() {
        let mut source = SimulatedSource::new(Some(3));

        for _ in 0..2_000 {
            let reading = source.read_all().unwrap();
            let humidity = reading["shtc3"]["humidity"].as_f64().unwrap();
            let co2 = reading["stc31c"]["co2"].as_f64().unwrap();
            assert!((0.0..=100.0).contains(&humidity));
            assert!((400.0..=5000.0).contains(&co2));
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let mut a = SimulatedSource::new(Some(11));
        let mut b = SimulatedSource::new(Some(11));

        for _ in 0..10 {
            assert_eq!(a.read_all().unwrap(), b.read_all().unwrap());
        }
    }
}
