// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration of a [`LinkClient`](super::LinkClient).

use std::time::Duration;

use crate::transport::BackoffPolicy;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default capacity of the client's command inbox.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default timeout of the websocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a link client.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use telemetry_link::LinkConfig;
/// use telemetry_link::transport::BackoffPolicy;
///
/// // Connect right away
/// let config = LinkConfig::new()
///     .with_url("ws://10.1.24.32:1337")
///     .with_connect(true);
///
/// // With a faster backoff and a short handshake timeout
/// let config = LinkConfig::new()
///     .with_backoff(BackoffPolicy::new().with_initial_delay(Duration::from_millis(250)))
///     .with_connect_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Websocket url to use from the start.
    pub url: Option<String>,
    /// Initial connect intent.
    pub connect: bool,
    /// Delays between reconnection attempts.
    pub backoff: BackoffPolicy,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the command inbox.
    pub command_capacity: usize,
    /// Timeout of the websocket handshake. A timed out handshake counts as a
    /// failed connection attempt.
    pub connect_timeout: Duration,
}

impl LinkConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the websocket url.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the initial connect intent.
    #[must_use]
    pub fn with_connect(mut self, connect: bool) -> Self {
        self.connect = connect;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the capacity of the event broadcast channel.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Sets the capacity of the command inbox.
    #[must_use]
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Sets the websocket handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect: false,
            backoff: BackoffPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LinkConfig::default();
        assert!(config.url.is_none());
        assert!(!config.connect);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.command_capacity, 64);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn setters() {
        let config = LinkConfig::new()
            .with_url("ws://robot:1337")
            .with_connect(true)
            .with_event_capacity(8)
            .with_connect_timeout(Duration::from_millis(500));
        assert_eq!(config.url.as_deref(), Some("ws://robot:1337"));
        assert!(config.connect);
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
    }

    #[test]
    fn zero_capacities_are_raised() {
        let config = LinkConfig::new()
            .with_event_capacity(0)
            .with_command_capacity(0);
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.command_capacity, 1);
    }
}
