// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnection backoff policy.

use std::time::Duration;

/// Configuration for the delay between reconnection attempts.
///
/// The delay starts at `initial_delay`, is multiplied by `multiplier` after
/// every failed attempt and never exceeds `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use telemetry_link::transport::BackoffPolicy;
///
/// // Default policy: 1 s, growing by 1.5x, capped at 10 s
/// let policy = BackoffPolicy::default();
///
/// // Custom policy
/// let policy = BackoffPolicy::new()
///     .with_initial_delay(Duration::from_millis(200))
///     .with_multiplier(2.0)
///     .with_max_delay(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before the first reconnection attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the delay to wait given the current backoff counter.
    #[must_use]
    pub fn clamp(&self, current: Duration) -> Duration {
        current.min(self.max_delay)
    }

    /// Returns the counter after one more failed attempt.
    ///
    /// The counter itself keeps growing past `max_delay`; only the scheduled
    /// delay is clamped. It saturates instead of overflowing.
    #[must_use]
    pub fn grow(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
        }
    }
}
