// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect backoff
//!
//! Delay before retry `n` (1-based) is `base_delay * 2^(n-1)` plus a uniform
//! jitter in `[0, jitter_ratio * delay)`. The jitter keeps a fleet of devices
//! that lost the same uplink from retrying in lockstep.

use super::{EndpointError, TelemetryEndpoint};
use std::time::Duration;

/// Default base delay between reconnect attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default jitter as a fraction of the computed delay.
pub const DEFAULT_JITTER_RATIO: f64 = 0.3;

/// Exponent cap so `2^(n-1)` cannot overflow on absurd retry counts.
const MAX_EXPONENT: u32 = 16;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the delay
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl BackoffPolicy {
    /// Policy with a custom base delay and the default jitter
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before retrying after failed attempt `attempt` (1-based), without jitter
    pub fn base_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Delay before retrying after failed attempt `attempt`, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_for(attempt);
        let ratio = self.jitter_ratio.max(0.0);
        if ratio == 0.0 || delay.is_zero() {
            return delay;
        }

        // fastrand::f64() is in [0, 1), so the jitter never reaches ratio * delay.
        delay + delay.mul_f64(ratio * fastrand::f64())
    }
}

/// Call `connect` up to `max_retries` times, sleeping between attempts.
///
/// Returns the 1-based attempt that connected, or `Ok(0)` when the endpoint
/// was already connected (also when another caller connected it first, so
/// only one caller ever sees a fresh transition). No sleep follows the last
/// attempt. `sleep` is injected so the schedule can be observed in tests.
pub fn retry_connect<E>(
    endpoint: &E,
    max_retries: u32,
    policy: &BackoffPolicy,
    sleep: &mut dyn FnMut(Duration),
) -> Result<u32, EndpointError>
where
    E: TelemetryEndpoint + ?Sized,
{
    retry_connect_until(endpoint, max_retries, policy, sleep, &|| false)
}

/// [`retry_connect`] that gives up with [`EndpointError::Cancelled`] once
/// `cancelled` returns true.
///
/// `cancelled` is checked before every attempt, so a sleeper that returns
/// early on cancellation ends the retry without another connect.
pub fn retry_connect_until<E>(
    endpoint: &E,
    max_retries: u32,
    policy: &BackoffPolicy,
    sleep: &mut dyn FnMut(Duration),
    cancelled: &dyn Fn() -> bool,
) -> Result<u32, EndpointError>
where
    E: TelemetryEndpoint + ?Sized,
{
    if endpoint.is_connected() {
        tracing::debug!("Reconnect requested while already connected");
        return Ok(0);
    }

    for attempt in 1..=max_retries {
        if cancelled() {
            tracing::info!(attempt, "Reconnect cancelled");
            return Err(EndpointError::Cancelled);
        }
        tracing::info!(attempt, max_retries, "Reconnection attempt");

        match endpoint.connect() {
            Ok(true) => {
                tracing::info!(attempt, "Reconnected");
                return Ok(attempt);
            }
            Ok(false) => {
                tracing::debug!(attempt, "Connected concurrently by another caller");
                return Ok(0);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
            }
        }

        if attempt < max_retries {
            let delay = policy.delay_for(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
            sleep(delay);
        }
    }

    tracing::error!(max_retries, "All reconnection attempts failed");
    Err(EndpointError::Exhausted {
        attempts: max_retries,
    })
}
