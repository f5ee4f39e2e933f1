//! Reconnection policies for the relay subscription
//!
//! The subscription loop asks its [`BackoffPolicy`] how long to wait after each
//! failed connection attempt, and after a session the relay ended before
//! sending anything. It is reset once a session delivers its first frame.
//! Neither policy gives up: the loop retries until shutdown.

use std::time::Duration;

use crate::config::{BackoffStrategy, ReconnectConfig};

/// Subscription connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; waiting to (re)connect
    Disconnected,

    /// Connection attempt in flight
    Connecting,

    /// Session established and reading frames
    Connected,
}

/// Delay schedule between failed connection attempts
pub trait BackoffPolicy: Send {
    /// Delay before the next attempt, called once per failed attempt or
    /// empty session
    fn next_delay(&mut self) -> Duration;

    /// Forget past failures once a session delivers a frame
    fn reset(&mut self);
}

/// Same delay after every failure
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Retry without waiting
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}

/// Exponential backoff, capped, with jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub initial_delay: Duration,

    /// Upper bound on the delay
    pub max_delay: Duration,

    /// Growth factor per consecutive failure
    pub multiplier: f64,

    /// Jitter factor to randomize delays (0.0 - 1.0)
    pub jitter_factor: f64,

    failures: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.1,
            failures: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    fn base_delay(&self) -> f64 {
        let exponent = self.failures.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        delay.min(self.max_delay.as_secs_f64())
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);

        let clamped = self.base_delay();
        let jitter_range = clamped * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;

        Duration::from_secs_f64((clamped + jitter).clamp(0.0, self.max_delay.as_secs_f64()))
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Build the policy selected in the configuration
pub fn policy_from_config(config: &ReconnectConfig) -> Box<dyn BackoffPolicy> {
    let delay = Duration::from_secs(config.delay_secs);
    match config.strategy {
        BackoffStrategy::Fixed => Box::new(FixedBackoff::new(delay)),
        BackoffStrategy::Exponential => Box::new(ExponentialBackoff::new(
            delay,
            Duration::from_secs(config.max_delay_secs.max(config.delay_secs)),
        )),
    }
}
