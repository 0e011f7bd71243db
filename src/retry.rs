//! Redial backoff.
//!
//! The session supply never gives up on the broker, so unlike a bounded
//! retry helper there is no attempt limit here: [`Backoff`] only decides how
//! long to wait before the next dial.
//!
//! # Strategy
//!
//! - First wait: `initial_delay` (with jitter)
//! - Subsequent waits: `min(previous * multiplier, max_delay)` (with jitter)
//! - Jitter: ±25% so that several processes restarted together do not dial
//!   the broker in lockstep
//! - [`Backoff::reset`] after a successful session mint

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::time::Duration;

/// Backoff settings for broker redial.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first redial.
    pub initial_delay: Duration,

    /// Growth factor applied after each failed attempt.
    ///
    /// Example: 2.0 doubles the delay each time.
    pub multiplier: f32,

    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    /// - `initial_delay`: 100ms
    /// - `multiplier`: 2.0
    /// - `max_delay`: 5s
    fn default() -> Self {
        // ---
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Stateful exponential backoff over a [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct Backoff {
    // ---
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        // ---
        let current = config.initial_delay;
        Self { config, current }
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        // ---
        let delay = apply_jitter(self.current);

        // clamp in f64 first: a huge multiplier must not overflow Duration
        let max = self.config.max_delay;
        let grown = (self.current.as_secs_f64() * f64::from(self.config.multiplier.max(1.0)))
            .min(max.as_secs_f64());
        self.current = Duration::try_from_secs_f64(grown)
            .unwrap_or(max)
            .min(max);

        delay
    }

    /// Return to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }
}

/// Apply ±25% jitter to a duration.
///
/// Uses a simple multiplicative jitter: `delay * (0.75 + random(0.0..0.5))`
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    delay.mul_f64(jitter_multiplier)
}
