// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socket lifecycle state machine.
//!
//! The machine never touches a socket or a timer itself. Every input returns
//! the [`TransportAction`]s the caller has to perform, which keeps the
//! transition table testable without a runtime.
//!
//! ```text
//!  WantsDisconnectedUnsetUrl ──url──▶ Disconnected ──connect──▶ Connecting ──open──▶ Connected
//!          │connect                        ▲                      │close ▲            │close
//!          ▼                               │close                 ▼      │timer       ▼
//!  WantsConnectUnsetUrl ──url──▶ Connecting   Disconnecting ◀──  BackOff ◀────────────┘
//!                                               ▲ │connect
//!                                    !connect   │ ▼
//!                                      ConnectAfterDisconnect ──close──▶ Connecting
//! ```

use std::fmt;
use std::time::Duration;

use super::BackoffPolicy;
use crate::state::ConnectionState;

/// Identity of one physical socket.
///
/// Events carrying an id other than the current socket's are stale and
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Socket({})", self.0)
    }
}

/// Detailed state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// No connect intent and no url yet.
    WantsDisconnectedUnsetUrl,
    /// Connect intent, waiting for a url.
    WantsConnectUnsetUrl,
    /// A socket is opening.
    Connecting,
    /// The socket is open.
    Connected,
    /// Waiting for the reconnect timer after a lost connection.
    BackOff,
    /// The socket is closing because the caller asked for it.
    Disconnecting,
    /// The socket is closing and a new one opens once it has closed.
    ConnectAfterDisconnect,
    /// No connect intent, url known.
    Disconnected,
}

impl TransportState {
    /// Reduces the detailed state to the externally visible one.
    #[must_use]
    pub fn simplified(self) -> ConnectionState {
        match self {
            Self::WantsDisconnectedUnsetUrl | Self::Disconnected => ConnectionState::Disconnected,
            Self::WantsConnectUnsetUrl
            | Self::Connecting
            | Self::BackOff
            | Self::ConnectAfterDisconnect => ConnectionState::Connecting,
            Self::Connected => ConnectionState::Connected,
            Self::Disconnecting => ConnectionState::Disconnecting,
        }
    }
}

/// Side effect requested by the transport state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    /// Open a new socket to `url`.
    Open {
        /// Identity to report back with the socket's events.
        socket: SocketId,
        /// The websocket url.
        url: String,
    },
    /// Close the socket.
    Close {
        /// The socket to close.
        socket: SocketId,
    },
    /// Start the single reconnect timer.
    ScheduleReconnect {
        /// Time until the timer fires.
        delay: Duration,
    },
    /// Cancel the pending reconnect timer.
    CancelReconnect,
}

/// Owns the lifecycle of one physical socket.
///
/// Inputs are the caller's `connect` intent and `url`, plus the socket's
/// open and close events and the reconnect timer. At most one socket and at
/// most one reconnect timer exist at any time.
#[derive(Debug)]
pub struct TransportStateMachine {
    state: TransportState,
    connect: bool,
    url: Option<String>,
    socket: Option<SocketId>,
    next_socket: u64,
    timer_pending: bool,
    backoff: Duration,
    policy: BackoffPolicy,
}

impl TransportStateMachine {
    /// Creates a machine with no connect intent and no url.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: TransportState::WantsDisconnectedUnsetUrl,
            connect: false,
            url: None,
            socket: None,
            next_socket: 1,
            timer_pending: false,
            backoff: policy.initial_delay,
            policy,
        }
    }

    /// Returns the detailed state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Returns the connect intent.
    #[must_use]
    pub fn connect(&self) -> bool {
        self.connect
    }

    /// Returns the url, if one was set.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Returns the current socket, if one is opening, open or closing.
    #[must_use]
    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    /// Returns the current backoff counter.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Returns true if messages may be sent, which is only while `Connected`.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.state == TransportState::Connected
    }

    /// Sets the connect intent.
    pub fn set_connect(&mut self, connect: bool) -> Vec<TransportAction> {
        let mut actions = Vec::new();
        if connect == self.connect {
            return actions;
        }
        self.connect = connect;

        if connect {
            match self.state {
                TransportState::WantsDisconnectedUnsetUrl => {
                    self.transition(TransportState::WantsConnectUnsetUrl);
                }
                TransportState::Disconnected => self.open(&mut actions),
                TransportState::Disconnecting => {
                    self.transition(TransportState::ConnectAfterDisconnect);
                }
                _ => {}
            }
        } else {
            match self.state {
                TransportState::WantsConnectUnsetUrl => {
                    self.transition(TransportState::WantsDisconnectedUnsetUrl);
                }
                TransportState::Connecting | TransportState::Connected => {
                    self.close(&mut actions);
                    self.transition(TransportState::Disconnecting);
                }
                TransportState::BackOff => {
                    self.cancel_timer(&mut actions);
                    self.backoff = self.policy.initial_delay;
                    self.transition(TransportState::Disconnected);
                }
                TransportState::ConnectAfterDisconnect => {
                    self.transition(TransportState::Disconnecting);
                }
                _ => {}
            }
        }
        actions
    }

    /// Sets the url to connect to.
    ///
    /// Changing the url of a live socket closes it first and opens the new
    /// one only after the old one reported its close.
    pub fn set_url(&mut self, url: impl Into<String>) -> Vec<TransportAction> {
        let url = url.into();
        let mut actions = Vec::new();
        if self.url.as_deref() == Some(url.as_str()) {
            return actions;
        }
        tracing::debug!(url = %url, "Transport url changed");
        self.url = Some(url);

        match self.state {
            TransportState::WantsDisconnectedUnsetUrl => {
                self.transition(TransportState::Disconnected);
            }
            TransportState::WantsConnectUnsetUrl => self.open(&mut actions),
            TransportState::Connecting | TransportState::Connected => {
                self.close(&mut actions);
                self.transition(TransportState::ConnectAfterDisconnect);
            }
            TransportState::BackOff => {
                self.cancel_timer(&mut actions);
                self.open(&mut actions);
            }
            _ => {}
        }
        actions
    }

    /// Handles the socket's open event.
    pub fn on_open(&mut self, socket: SocketId) -> Vec<TransportAction> {
        if self.socket != Some(socket) {
            tracing::trace!(socket = %socket, "Ignoring open event of stale socket");
            return Vec::new();
        }
        if self.state == TransportState::Connecting {
            self.backoff = self.policy.initial_delay;
            self.transition(TransportState::Connected);
        }
        Vec::new()
    }

    /// Handles the socket's close event.
    pub fn on_close(&mut self, socket: SocketId) -> Vec<TransportAction> {
        let mut actions = Vec::new();
        if self.socket != Some(socket) {
            tracing::trace!(socket = %socket, "Ignoring close event of stale socket");
            return actions;
        }
        self.socket = None;

        match self.state {
            TransportState::Connecting | TransportState::Connected => {
                let delay = self.policy.clamp(self.backoff);
                self.backoff = self.policy.grow(self.backoff);
                self.cancel_timer(&mut actions);
                self.timer_pending = true;
                actions.push(TransportAction::ScheduleReconnect { delay });
                tracing::debug!(delay_ms = delay.as_millis(), "Connection lost, backing off");
                self.transition(TransportState::BackOff);
            }
            TransportState::ConnectAfterDisconnect => self.open(&mut actions),
            TransportState::Disconnecting => self.transition(TransportState::Disconnected),
            _ => {}
        }
        actions
    }

    /// Handles the reconnect timer firing.
    pub fn on_backoff_elapsed(&mut self) -> Vec<TransportAction> {
        let mut actions = Vec::new();
        if self.state == TransportState::BackOff && self.timer_pending {
            self.timer_pending = false;
            self.open(&mut actions);
        }
        actions
    }

    /// Closes the current socket while keeping the connect intent.
    ///
    /// The close event that follows moves a live connection into `BackOff`,
    /// so the attempt is retried on the backoff schedule.
    pub fn drop_connection(&mut self) -> Vec<TransportAction> {
        let mut actions = Vec::new();
        if matches!(
            self.state,
            TransportState::Connecting | TransportState::Connected
        ) {
            self.close(&mut actions);
        }
        actions
    }

    fn open(&mut self, actions: &mut Vec<TransportAction>) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let socket = SocketId(self.next_socket);
        self.next_socket += 1;
        self.socket = Some(socket);
        tracing::info!(socket = %socket, url = %url, "Opening socket");
        actions.push(TransportAction::Open { socket, url });
        self.transition(TransportState::Connecting);
    }

    fn close(&mut self, actions: &mut Vec<TransportAction>) {
        if let Some(socket) = self.socket {
            tracing::info!(socket = %socket, "Closing socket");
            actions.push(TransportAction::Close { socket });
        }
    }

    fn cancel_timer(&mut self, actions: &mut Vec<TransportAction>) {
        if self.timer_pending {
            self.timer_pending = false;
            actions.push(TransportAction::CancelReconnect);
        }
    }

    fn transition(&mut self, next: TransportState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Transport state changed");
            self.state = next;
        }
    }
}

impl Default for TransportStateMachine {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
