//! Reconnection scheduling with exponential backoff
//!
//! Decides *when* the next connection attempt may run. The delay grows
//! exponentially from `initial_delay` up to `max_delay`, with uniform jitter
//! added on top to avoid thundering-herd reconnect storms. A permanent
//! disconnect or a rejected authentication suppresses scheduling until the
//! caller explicitly reconnects.

use rand::Rng;
use std::time::Duration;

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    pub enabled: bool,

    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,

    /// Maximum delay between reconnection attempts
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter added on top of the delay, as a fraction of the delay
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.5,
        }
    }
}

/// Backoff state machine feeding the orchestrator's reconnect timer
#[derive(Debug)]
pub struct ReconnectManager {
    config: ReconnectConfig,
    attempt: u32,
    suppressed: bool,
}

impl ReconnectManager {
    /// Create a manager with the given policy
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            suppressed: false,
        }
    }

    /// Reset backoff after the session reached the command phase
    pub fn record_success(&mut self) {
        self.attempt = 0;
    }

    /// Stop scheduling attempts until [`resume`](Self::resume) is called
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    /// Lift suppression on an explicit connect
    pub fn resume(&mut self) {
        self.suppressed = false;
        self.attempt = 0;
    }

    /// Whether scheduling is currently suppressed
    pub fn is_suppressed(&self) -> bool {
        self.suppressed || !self.config.enabled
    }

    /// Delay before the next attempt, or `None` when reconnection is off
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_suppressed() {
            return None;
        }

        let exponent = self.config.backoff_multiplier.powi(self.attempt as i32);
        let base_ms = self.config.initial_delay.as_millis() as f64 * exponent;
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);

        let jitter_ms = if self.config.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.config.jitter_factor * capped_ms)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_millis((capped_ms + jitter_ms) as u64))
    }
}
