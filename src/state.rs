// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Externally observable connection state.
//!
//! Both the transport and the protocol state machine reduce their detailed
//! states to a [`ConnectionState`]. The connection reports the merge of the
//! two, recomputed after every transition of either side.

use std::fmt;

/// The state of the link as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Nothing is connected and nothing is being attempted.
    #[default]
    Disconnected,
    /// A connection is being established or re-established.
    Connecting,
    /// The link is up and its subscriptions are live.
    Connected,
    /// The socket is being closed on request.
    Disconnecting,
}

impl ConnectionState {
    /// Merges the transport and protocol views into one state.
    ///
    /// The protocol state only means something once the transport is
    /// connected, so until then the transport state is reported as is.
    #[must_use]
    pub fn merge(transport: Self, protocol: Self) -> Self {
        if transport == Self::Connected {
            protocol
        } else {
            transport
        }
    }

    /// Returns true if the link is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_reports_transport_until_connected() {
        use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting};

        assert_eq!(ConnectionState::merge(Connecting, Connected), Connecting);
        assert_eq!(
            ConnectionState::merge(Disconnecting, Connected),
            Disconnecting
        );
        assert_eq!(
            ConnectionState::merge(Disconnected, Connecting),
            Disconnected
        );
        assert_eq!(ConnectionState::merge(Connected, Connecting), Connecting);
        assert_eq!(ConnectionState::merge(Connected, Connected), Connected);
    }

    #[test]
    fn default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
    }
}
