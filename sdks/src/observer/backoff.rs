// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reconnection backoff
//!
//! Delay for attempt `n` is `min(initial * 2^n + jitter, max)` with jitter
//! drawn from `[0, initial)`. Because the doubling step is always at least
//! `initial`, consecutive delays never decrease.

use rand::Rng;
use std::time::Duration;

use afk_core::domain::config::ObserverConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ObserverConfig::default())
    }
}

impl From<&ObserverConfig> for ReconnectPolicy {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_reconnect_delay_ms),
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt `attempt` (zero-based) with the given jitter.
    pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let base = self.initial_delay.saturating_mul(factor);
        base.saturating_add(jitter).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let jitter = random_jitter(self.policy.initial_delay);
        let delay = self.policy.delay_for(self.attempt, jitter);
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn random_jitter(upper: Duration) -> Duration {
    let upper_ms = upper.as_millis() as u64;
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..upper_ms))
}
