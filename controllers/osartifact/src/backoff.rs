//! # Exponential Backoff
//!
//! Provides a capped exponential backoff used in two places:
//! - between conflict retries of a status or finalizer write (milliseconds)
//! - between requeues of an artifact whose reconcile keeps failing (seconds)
//!
//! Each delay is the previous one multiplied by `factor`, never exceeding `max`.

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates delays `initial, initial*factor, initial*factor^2, ...` capped at `max`.
/// A fresh value starts the sequence over.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay returned by the next call
    current: Duration,
    /// Multiplier applied after each call
    factor: u32,
    /// Upper bound for any delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    ///
    /// # Arguments
    ///
    /// * `initial` - First delay
    /// * `factor` - Growth factor per step (1 gives a constant delay)
    /// * `max` - Cap for every delay
    #[must_use]
    pub fn new(initial: Duration, factor: u32, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            factor: factor.max(1),
            max,
        }
    }

    /// Backoff for requeueing an artifact whose reconcile failed: 5s doubling up to 5m
    #[must_use]
    pub fn for_reconcile_errors() -> Self {
        Self::new(Duration::from_secs(5), 2, Duration::from_secs(300))
    }

    /// Get the next delay and advance the sequence
    pub fn next_delay(&mut self) -> Duration {
        let result = self.current;
        self.current = self
            .current
            .checked_mul(self.factor)
            .map_or(self.max, |next| next.min(self.max));
        result
    }
}
