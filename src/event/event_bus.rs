// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan-out of connection events to async observers.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::LinkEvent;
use crate::error::Error;
use crate::state::ConnectionState;

/// Broadcasts state changes and out-of-band errors of one link.
///
/// [`LinkClient::spawn`](crate::LinkClient::spawn) registers the bus as the
/// connection's state and error listener, so every merged state transition
/// becomes a [`LinkEvent::StateChanged`] and every error that belongs to no
/// topic or request becomes a [`LinkEvent::Error`].
///
/// Events published while nobody listens are dropped. A receiver that falls
/// more than `capacity` events behind gets `RecvError::Lagged` and skips
/// ahead; the link itself is never slowed down by observers.
///
/// # Examples
///
/// ```
/// use telemetry_link::ConnectionState;
/// use telemetry_link::event::EventBus;
///
/// let bus = EventBus::new(8);
/// let mut events = bus.subscribe();
///
/// bus.publish_state(ConnectionState::Connecting);
/// let event = events.try_recv().unwrap();
/// assert_eq!(event.state(), Some(ConnectionState::Connecting));
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per receiver.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns a receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.sender.subscribe()
    }

    /// Announces a new merged connection state.
    pub fn publish_state(&self, state: ConnectionState) {
        self.publish(LinkEvent::StateChanged(state));
    }

    /// Announces an error that no subscription or request can take.
    pub fn publish_error(&self, error: Arc<Error>) {
        self.publish(LinkEvent::Error(error));
    }

    fn publish(&self, event: LinkEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event receivers");
        }
    }
}
