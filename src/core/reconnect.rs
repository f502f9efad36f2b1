//! Subscription reconnect policy.
//!
//! The first subscription is attempted at most `startup_attempts` times; an
//! unreachable store at startup is a configuration problem worth surfacing.
//! Once the listener has been subscribed, losing the stream is treated as an
//! outage instead: resubscription keeps going with capped delays until the
//! consumer is told to stop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to space out subscription attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Failed attempts tolerated before the first subscription
    pub startup_attempts: u32,

    /// Delay after the first failure, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            startup_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Pause between a stream ending and the next subscription attempt
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms))
    }

    /// Start a fresh run of attempts
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            failures: 0,
        }
    }
}

/// Failure counter for one run of subscription attempts
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a ReconnectPolicy,
    failures: u32,
}

impl Backoff<'_> {
    /// Failed attempts so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt; returns how long to wait before the next one
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);

        // Exponent is clamped so the float math stays finite
        let exponent = (self.failures - 1).min(64) as i32;
        let growth = self.policy.multiplier.max(1.0).powi(exponent);
        let delay = (self.policy.initial_delay_ms as f64 * growth).min(self.policy.max_delay_ms as f64);

        Duration::from_millis(delay as u64)
    }

    /// True once the startup budget is spent
    pub fn exhausted_at_startup(&self) -> bool {
        self.failures >= self.policy.startup_attempts.max(1)
    }
}
