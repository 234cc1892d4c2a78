// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link event types.

use std::sync::Arc;

use crate::error::Error;
use crate::state::ConnectionState;

/// Events emitted by a [`LinkClient`](crate::LinkClient).
///
/// # Examples
///
/// ```
/// use telemetry_link::ConnectionState;
/// use telemetry_link::event::LinkEvent;
///
/// let event = LinkEvent::StateChanged(ConnectionState::Connected);
/// assert_eq!(event.state(), Some(ConnectionState::Connected));
/// assert!(event.error().is_none());
/// ```
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The merged connection state changed.
    StateChanged(ConnectionState),

    /// An error occurred that belongs to no topic or operation.
    ///
    /// Unparseable messages, responses to unknown requests, failed hierarchy
    /// fetches and socket errors end up here.
    Error(Arc<Error>),
}

impl LinkEvent {
    /// Returns the new state if this is a state change.
    #[must_use]
    pub fn state(&self) -> Option<ConnectionState> {
        match self {
            Self::StateChanged(state) => Some(*state),
            Self::Error(_) => None,
        }
    }

    /// Returns the error if this is an error event.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Error(error) => Some(error),
            Self::StateChanged(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_accessors() {
        let event = LinkEvent::Error(Arc::new(Error::NotConnected));
        assert!(event.state().is_none());
        assert!(matches!(event.error(), Some(Error::NotConnected)));
    }
}
