// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconnect policy: retry decision, backoff timing, attempt ceiling.
//!
//! The retry decision and the backoff delay both come in a fixed and a
//! computed flavor. Computed variants are re-invoked at every failure so
//! they can consult live connectivity or auth state; nothing is cached.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default reconnect attempt ceiling.
pub const DEFAULT_RECONNECTS_BEFORE_CLOSE: i32 = 3;

/// Default jittered backoff window.
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(2000);
/// Upper bound of the default backoff window.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(5000);

/// Whether a failed stream should attempt to reconnect.
#[derive(Clone)]
pub enum RetryPolicy {
    /// Always the same answer.
    Fixed(bool),
    /// Re-evaluated on every failure.
    Check(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl RetryPolicy {
    /// Always reconnect.
    #[must_use]
    pub fn always() -> Self {
        Self::Fixed(true)
    }

    /// Never reconnect.
    #[must_use]
    pub fn never() -> Self {
        Self::Fixed(false)
    }

    /// Reconnect while the predicate holds; evaluated fresh per failure.
    pub fn check(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self::Check(Arc::new(predicate))
    }

    /// Resolve the decision for the current failure.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Fixed(value) => *value,
            Self::Check(predicate) => predicate(),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Self::Check(_) => f.write_str("Check(..)"),
        }
    }
}

/// How long to wait before a reconnect attempt.
#[derive(Clone)]
pub enum BackoffTimeout {
    /// Fixed delay.
    Fixed(Duration),
    /// Uniformly random delay within `[min, max]`.
    Jittered {
        /// Lower bound.
        min: Duration,
        /// Upper bound.
        max: Duration,
    },
    /// Computed from the attempt number, evaluated per failure.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl BackoffTimeout {
    /// Compute the delay before the given attempt (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Jittered { min, max } => {
                let span = max.saturating_sub(*min).as_secs_f64();
                let jitter = span * rand::random::<f64>();
                *min + Duration::from_secs_f64(jitter)
            }
            Self::Custom(f) => f(attempt),
        }
    }
}

impl Default for BackoffTimeout {
    fn default() -> Self {
        Self::Jittered {
            min: DEFAULT_BACKOFF_MIN,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl fmt::Debug for BackoffTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Jittered { min, max } => f
                .debug_struct("Jittered")
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Attempt counter with a ceiling.
///
/// The ceiling is the absolute value of the configured
/// `reconnects_before_close`; zero disables it. A delivered message proves
/// the connection healthy and resets the counter.
#[derive(Debug)]
pub struct ReconnectState {
    attempts: u32,
    ceiling: u32,
}

impl ReconnectState {
    /// Create a counter from the configured ceiling.
    #[must_use]
    pub fn new(reconnects_before_close: i32) -> Self {
        Self {
            attempts: 0,
            ceiling: reconnects_before_close.unsigned_abs(),
        }
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another reconnect attempt is allowed.
    #[must_use]
    pub fn can_reconnect(&self) -> bool {
        self.ceiling == 0 || self.attempts < self.ceiling
    }

    /// Record one reconnect attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Reset after a successful message delivery.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
