// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The connection facade.
//!
//! [`Connection`] composes the transport and protocol state machines into a
//! single object with one observable [`ConnectionState`]. It performs no I/O
//! of its own: socket and timer effects go through a [`Transport`], and the
//! owner feeds socket events back in through the `handle_*` methods.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use telemetry_link::connection::{Connection, Transport};
//! use telemetry_link::transport::{BackoffPolicy, SocketId};
//! use telemetry_link::{ConnectionState, OutputType};
//!
//! #[derive(Default)]
//! struct Noop;
//!
//! impl Transport for Noop {
//!     fn open(&mut self, _socket: SocketId, _url: &str) {}
//!     fn close(&mut self, _socket: SocketId) {}
//!     fn send(&mut self, _socket: SocketId, _text: String) {}
//!     fn schedule_reconnect(&mut self, _delay: Duration) {}
//!     fn cancel_reconnect(&mut self) {}
//! }
//!
//! let mut connection = Connection::new(Noop, BackoffPolicy::default());
//! let handle = connection.subscribe_output(
//!     "VisionTop",
//!     OutputType::Main,
//!     "ball.position",
//!     |value| println!("ball at {value}"),
//!     |error| eprintln!("ball failed: {error}"),
//! );
//!
//! connection.set_url("ws://localhost:1337");
//! connection.set_connect(true);
//! assert_eq!(connection.state(), ConnectionState::Connecting);
//!
//! connection.unsubscribe(handle);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use crate::error::Error;
use crate::protocol::{
    PathTypes, ProtocolEffects, ProtocolState, ProtocolStateMachine, Request, SubscriptionOp,
};
use crate::state::ConnectionState;
use crate::subscription::{
    Cycler, OutputTopic, OutputType, SubscriptionHandle, SubscriptionId, Subscriptions, Topic,
};
use crate::transport::{
    BackoffPolicy, SocketId, TransportAction, TransportState, TransportStateMachine,
};

/// Performs the socket and timer effects of a [`Connection`].
///
/// Implementations must not call back into the connection from these
/// methods; events are reported later through the connection's `handle_*`
/// methods.
pub trait Transport {
    /// Starts opening a socket to `url`. Its events carry `socket`.
    fn open(&mut self, socket: SocketId, url: &str);

    /// Starts closing a socket. A close event must follow.
    fn close(&mut self, socket: SocketId);

    /// Sends a text message on an open socket.
    fn send(&mut self, socket: SocketId, text: String);

    /// Starts the reconnect timer. Its expiry is reported through
    /// [`Connection::handle_backoff_elapsed`].
    fn schedule_reconnect(&mut self, delay: Duration);

    /// Cancels the reconnect timer.
    fn cancel_reconnect(&mut self);
}

/// Identifier of a registered state or error listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

/// Listener for changes of the merged connection state.
pub type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Listener for errors not tied to a topic or operation.
pub type ErrorListener = Arc<dyn Fn(&Arc<Error>) + Send + Sync>;

/// Facade over the transport and protocol state machines.
///
/// All methods run to completion without blocking. Callbacks and listeners
/// are invoked from inside these methods and must not call back into the
/// same `Connection`.
pub struct Connection<T: Transport> {
    transport: T,
    transport_machine: TransportStateMachine,
    protocol: ProtocolStateMachine,
    state: ConnectionState,
    next_subscription_id: u64,
    next_listener_id: u64,
    state_listeners: Vec<(ListenerId, StateListener)>,
    error_listeners: Vec<(ListenerId, ErrorListener)>,
}

impl<T: Transport> Connection<T> {
    /// Creates a disconnected connection without a url.
    #[must_use]
    pub fn new(transport: T, policy: BackoffPolicy) -> Self {
        Self {
            transport,
            transport_machine: TransportStateMachine::new(policy),
            protocol: ProtocolStateMachine::new(),
            state: ConnectionState::Disconnected,
            next_subscription_id: 1,
            next_listener_id: 1,
            state_listeners: Vec::new(),
            error_listeners: Vec::new(),
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Returns the merged connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the detailed transport state.
    #[must_use]
    pub fn transport_state(&self) -> TransportState {
        self.transport_machine.state()
    }

    /// Returns the detailed protocol state.
    #[must_use]
    pub fn protocol_state(&self) -> ProtocolState {
        self.protocol.state()
    }

    /// Returns the connect intent.
    #[must_use]
    pub fn connect(&self) -> bool {
        self.transport_machine.connect()
    }

    /// Returns the websocket url, if one was set.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.transport_machine.url()
    }

    /// Returns the current socket, if any.
    #[must_use]
    pub fn socket(&self) -> Option<SocketId> {
        self.transport_machine.socket()
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the transport mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns the subscription registries.
    #[must_use]
    pub fn subscriptions(&self) -> &Subscriptions {
        self.protocol.subscriptions()
    }

    /// Returns the flattened output hierarchy of the current connection.
    #[must_use]
    pub fn output_types(&self) -> Option<&PathTypes> {
        self.protocol.output_types()
    }

    /// Returns the flattened parameter hierarchy of the current connection.
    #[must_use]
    pub fn parameter_types(&self) -> Option<&PathTypes> {
        self.protocol.parameter_types()
    }

    /// Looks up the type name of an output path.
    #[must_use]
    pub fn output_path_type(&self, path: &str) -> Option<&str> {
        self.output_types()?.get(path).map(String::as_str)
    }

    /// Looks up the type name of a parameter path.
    #[must_use]
    pub fn parameter_path_type(&self, path: &str) -> Option<&str> {
        self.parameter_types()?.get(path).map(String::as_str)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sets the connect intent.
    pub fn set_connect(&mut self, connect: bool) {
        let actions = self.transport_machine.set_connect(connect);
        self.drive(actions);
    }

    /// Sets the websocket url.
    pub fn set_url(&mut self, url: impl Into<String>) {
        let actions = self.transport_machine.set_url(url);
        self.drive(actions);
    }

    /// Reports that a socket finished opening.
    pub fn handle_open(&mut self, socket: SocketId) {
        let actions = self.transport_machine.on_open(socket);
        self.drive(actions);
    }

    /// Reports that a socket closed or failed to open.
    pub fn handle_close(&mut self, socket: SocketId) {
        let actions = self.transport_machine.on_close(socket);
        self.drive(actions);
    }

    /// Reports that the reconnect timer fired.
    pub fn handle_backoff_elapsed(&mut self) {
        let actions = self.transport_machine.on_backoff_elapsed();
        self.drive(actions);
    }

    /// Reports a text message received on a socket.
    ///
    /// Messages from anything but the current, connected socket are ignored.
    pub fn handle_text(&mut self, socket: SocketId, text: &str) {
        if !self.accepts_messages_from(socket) {
            tracing::trace!(socket = %socket, "Ignoring text from inactive socket");
            return;
        }
        let effects = self.protocol.handle_text(text);
        self.apply(effects);
    }

    /// Reports a binary frame received on a socket.
    pub fn handle_binary(&mut self, socket: SocketId, frame: &Bytes) {
        if !self.accepts_messages_from(socket) {
            tracing::trace!(socket = %socket, "Ignoring binary frame from inactive socket");
            return;
        }
        self.protocol.handle_binary(frame);
    }

    /// Reports an error raised on a socket.
    ///
    /// The error only reaches the error listeners. The socket's close event
    /// follows separately through [`Connection::handle_close`] and drives
    /// the reconnect backoff.
    pub fn handle_socket_error(&mut self, socket: SocketId, error: Error) {
        tracing::warn!(socket = %socket, error = %error, "Socket error");
        self.emit_error(error);
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribes to one output of a cycler.
    pub fn subscribe_output<D, E>(
        &mut self,
        cycler: impl Into<Cycler>,
        output_type: OutputType,
        path: impl Into<String>,
        on_data: D,
        on_error: E,
    ) -> SubscriptionHandle
    where
        D: Fn(&Value) + Send + Sync + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        let topic = OutputTopic::new(cycler, output_type, path);
        let id = self.next_subscription_id();
        let first = self.protocol.subscriptions().outputs.register(
            topic.clone(),
            id,
            Arc::new(on_data),
            Arc::new(on_error),
        );
        self.after_register(Topic::Output(topic), id, first)
    }

    /// Subscribes to the images of a cycler.
    pub fn subscribe_image<D, E>(
        &mut self,
        cycler: impl Into<Cycler>,
        on_data: D,
        on_error: E,
    ) -> SubscriptionHandle
    where
        D: Fn(&Bytes) + Send + Sync + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        let cycler = cycler.into();
        let id = self.next_subscription_id();
        let first = self.protocol.subscriptions().images.register(
            cycler.clone(),
            id,
            Arc::new(on_data),
            Arc::new(on_error),
        );
        self.after_register(Topic::Image(cycler), id, first)
    }

    /// Subscribes to updates of a parameter.
    pub fn subscribe_parameter<D, E>(
        &mut self,
        path: impl Into<String>,
        on_data: D,
        on_error: E,
    ) -> SubscriptionHandle
    where
        D: Fn(&Value) + Send + Sync + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        let path = path.into();
        let id = self.next_subscription_id();
        let first = self.protocol.subscriptions().parameters.register(
            path.clone(),
            id,
            Arc::new(on_data),
            Arc::new(on_error),
        );
        self.after_register(Topic::Parameter(path), id, first)
    }

    /// Removes a subscription.
    ///
    /// The remote subscription is dropped once the topic's last subscriber
    /// is gone.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        let (topic, id) = handle.into_parts();
        match self.protocol.subscriptions().unregister(&topic, id) {
            Some(true) => {
                tracing::debug!(topic = %topic, subscription = %id, "Last subscriber removed");
                let op = SubscriptionOp::unsubscribe(topic);
                let effects = self.protocol.request_subscription(op);
                self.apply(effects);
            }
            Some(false) => {
                tracing::debug!(topic = %topic, subscription = %id, "Subscriber removed");
            }
            None => {
                tracing::debug!(topic = %topic, subscription = %id, "Unsubscribe of unknown topic");
            }
        }
    }

    /// Overwrites a parameter on the remote process.
    ///
    /// Exactly one of the two callbacks is invoked, unless the connection is
    /// lost before the response arrives, in which case neither is. If the
    /// link is not subscribed, `on_error` receives [`Error::NotConnected`]
    /// before this returns.
    pub fn update_parameter<S, E>(
        &mut self,
        path: impl Into<String>,
        data: Value,
        on_success: S,
        on_error: E,
    ) where
        S: FnOnce() + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        let effects = self.protocol.update_parameter(
            path.into(),
            data,
            Box::new(on_success),
            Box::new(on_error),
        );
        self.apply(effects);
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Registers a listener for changes of the merged state.
    pub fn on_state_changed<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        self.state_listeners.push((id, Arc::new(listener)));
        id
    }

    /// Registers a listener for out-of-band errors.
    pub fn on_error<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&Arc<Error>) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        self.error_listeners.push((id, Arc::new(listener)));
        id
    }

    /// Removes a state or error listener.
    ///
    /// Returns `true` if the listener was found.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.state_listeners.len() + self.error_listeners.len();
        self.state_listeners.retain(|(listener, _)| *listener != id);
        self.error_listeners.retain(|(listener, _)| *listener != id);
        before != self.state_listeners.len() + self.error_listeners.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn after_register(
        &mut self,
        topic: Topic,
        id: SubscriptionId,
        first: bool,
    ) -> SubscriptionHandle {
        if first {
            tracing::debug!(topic = %topic, subscription = %id, "First subscriber registered");
            let op = SubscriptionOp::subscribe(topic.clone());
            let effects = self.protocol.request_subscription(op);
            self.apply(effects);
        } else {
            tracing::debug!(topic = %topic, subscription = %id, "Subscriber registered");
        }
        SubscriptionHandle::new(topic, id)
    }

    fn accepts_messages_from(&self, socket: SocketId) -> bool {
        self.transport_machine.socket() == Some(socket) && self.transport_machine.can_send()
    }

    /// Performs transport actions, then lets the protocol follow the transport.
    fn drive(&mut self, actions: Vec<TransportAction>) {
        self.perform(actions);
        let transport = self.transport_machine.state().simplified();
        let effects = self.protocol.on_transport_state(transport);
        self.apply(effects);
    }

    fn apply(&mut self, effects: ProtocolEffects) {
        for request in &effects.requests {
            self.send(request);
        }
        for error in effects.errors {
            self.emit_error(error);
        }
        if effects.abort_connection {
            let actions = self.transport_machine.drop_connection();
            self.perform(actions);
        }
        self.notify_state();
    }

    fn perform(&mut self, actions: Vec<TransportAction>) {
        for action in actions {
            match action {
                TransportAction::Open { socket, url } => self.transport.open(socket, &url),
                TransportAction::Close { socket } => self.transport.close(socket),
                TransportAction::ScheduleReconnect { delay } => {
                    self.transport.schedule_reconnect(delay);
                }
                TransportAction::CancelReconnect => self.transport.cancel_reconnect(),
            }
        }
    }

    fn send(&mut self, request: &Request) {
        let socket = match self.transport_machine.socket() {
            Some(socket) if self.transport_machine.can_send() => socket,
            _ => {
                tracing::trace!(id = request.id, "Dropping request, transport not connected");
                return;
            }
        };
        match request.to_text() {
            Ok(text) => self.transport.send(socket, text),
            Err(error) => {
                tracing::warn!(id = request.id, error = %error, "Failed to encode request");
                self.emit_error(error.into());
            }
        }
    }

    fn emit_error(&self, error: Error) {
        let error = Arc::new(error);
        let listeners: Vec<ErrorListener> = self
            .error_listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&error);
        }
    }

    fn notify_state(&mut self) {
        let state = ConnectionState::merge(
            self.transport_machine.state().simplified(),
            self.protocol.state().simplified(),
        );
        if state == self.state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        let listeners: Vec<StateListener> = self
            .state_listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(state);
        }
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription_id);
        self.next_subscription_id += 1;
        id
    }

    fn next_listener_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        id
    }
}

impl<T: Transport + fmt::Debug> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("transport", &self.transport)
            .field("transport_machine", &self.transport_machine)
            .field("protocol", &self.protocol)
            .field("state_listeners", &self.state_listeners.len())
            .field("error_listeners", &self.error_listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Recorder {
        opened: Vec<SocketId>,
        closed: Vec<SocketId>,
        sent: Vec<Value>,
        timers: usize,
    }

    impl Transport for Recorder {
        fn open(&mut self, socket: SocketId, _url: &str) {
            self.opened.push(socket);
        }

        fn close(&mut self, socket: SocketId) {
            self.closed.push(socket);
        }

        fn send(&mut self, _socket: SocketId, text: String) {
            self.sent.push(serde_json::from_str(&text).unwrap());
        }

        fn schedule_reconnect(&mut self, _delay: Duration) {
            self.timers += 1;
        }

        fn cancel_reconnect(&mut self) {
            self.timers -= 1;
        }
    }

    fn open_connection() -> (Connection<Recorder>, SocketId) {
        let mut connection = Connection::new(Recorder::default(), BackoffPolicy::default());
        connection.set_url("ws://robot:1337");
        connection.set_connect(true);
        let socket = connection.socket().unwrap();
        connection.handle_open(socket);
        (connection, socket)
    }

    fn answer_hierarchies(connection: &mut Connection<Recorder>, socket: SocketId, outputs: Value) {
        let sent = connection.transport().sent.clone();
        let output_id = sent[sent.len() - 2]["id"].as_u64().unwrap();
        let parameter_id = sent[sent.len() - 1]["id"].as_u64().unwrap();
        connection.handle_text(
            socket,
            &json!({"id": output_id, "ok": true, "output_hierarchy": outputs}).to_string(),
        );
        connection.handle_text(
            socket,
            &json!({"id": parameter_id, "ok": true, "parameter_hierarchy": {}}).to_string(),
        );
    }

    #[test]
    fn listener_sees_merged_states() {
        let states = Arc::new(Mutex::new(Vec::new()));
        let mut connection = Connection::new(Recorder::default(), BackoffPolicy::default());
        let sink = Arc::clone(&states);
        connection.on_state_changed(move |s| sink.lock().push(s));

        connection.set_url("ws://robot:1337");
        connection.set_connect(true);
        let socket = connection.socket().unwrap();
        connection.handle_open(socket);
        assert_eq!(connection.state(), ConnectionState::Connecting);
        answer_hierarchies(&mut connection, socket, json!({}));

        assert_eq!(
            *states.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[test]
    fn removed_listener_is_not_called() {
        let calls = Arc::new(Mutex::new(0));
        let mut connection = Connection::new(Recorder::default(), BackoffPolicy::default());
        let sink = Arc::clone(&calls);
        let id = connection.on_state_changed(move |_| *sink.lock() += 1);

        assert!(connection.remove_listener(id));
        assert!(!connection.remove_listener(id));
        connection.set_url("ws://robot:1337");
        connection.set_connect(true);
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn hierarchy_types_are_exposed() {
        let (mut connection, socket) = open_connection();
        answer_hierarchies(
            &mut connection,
            socket,
            json!({"ball": {"type": "Option", "nested": {"type": "Primary", "name": "Ball"}}}),
        );
        assert_eq!(connection.output_path_type("ball"), Some("Option<Ball>"));
        assert_eq!(connection.output_path_type("nope"), None);
        assert_eq!(connection.parameter_types(), Some(&PathTypes::new()));
    }

    #[test]
    fn rejected_hierarchy_drops_socket_and_backs_off() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (mut connection, socket) = open_connection();
        let sink = Arc::clone(&errors);
        connection.on_error(move |error| sink.lock().push(error.to_string()));

        let output_id = connection.transport().sent[0]["id"].as_u64().unwrap();
        connection.handle_text(
            socket,
            &json!({"id": output_id, "ok": false, "reason": "busy"}).to_string(),
        );
        assert_eq!(
            *errors.lock(),
            vec!["GetOutputHierarchy rejected: busy".to_string()]
        );
        assert_eq!(connection.transport().closed, vec![socket]);

        connection.handle_close(socket);
        assert_eq!(connection.transport_state(), TransportState::BackOff);
        assert_eq!(connection.protocol_state(), ProtocolState::Disconnected);
        assert_eq!(connection.transport().timers, 1);

        connection.handle_backoff_elapsed();
        assert_eq!(connection.transport().opened.len(), 2);
    }

    #[test]
    fn text_from_stale_socket_is_ignored() {
        let (mut connection, socket) = open_connection();
        connection.set_url("ws://other:1337");
        connection.handle_close(socket);
        let fresh = connection.socket().unwrap();
        assert_ne!(fresh, socket);

        let errors = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&errors);
        connection.on_error(move |_| *sink.lock() += 1);
        connection.handle_text(socket, "garbage");
        connection.handle_text(fresh, "garbage");
        assert_eq!(*errors.lock(), 0);

        connection.handle_open(fresh);
        connection.handle_text(fresh, "garbage");
        assert_eq!(*errors.lock(), 1);
    }

    #[test]
    fn update_parameter_while_disconnected_fails_synchronously() {
        let mut connection = Connection::new(Recorder::default(), BackoffPolicy::default());
        let failure = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&failure);
        connection.update_parameter(
            "walk.speed",
            json!(1.0),
            || panic!("must not succeed"),
            move |error: Error| *sink.lock() = Some(error.to_string()),
        );
        assert_eq!(failure.lock().as_deref(), Some("not connected"));
        assert!(connection.transport().sent.is_empty());
    }

    #[test]
    fn second_subscriber_sends_nothing() {
        let (mut connection, socket) = open_connection();
        answer_hierarchies(&mut connection, socket, json!({}));
        let baseline = connection.transport().sent.len();

        let first = connection.subscribe_parameter("head", |_| {}, |_| {});
        let second = connection.subscribe_parameter("head", |_| {}, |_| {});
        assert_eq!(connection.transport().sent.len(), baseline + 1);

        connection.unsubscribe(second);
        assert_eq!(connection.transport().sent.len(), baseline + 1);
        let parameters = &connection.subscriptions().parameters;
        assert_eq!(parameters.subscriber_count(&"head".to_string()), 1);
        connection.unsubscribe(first);
        assert!(connection.subscriptions().parameters.is_empty());
    }

    #[test]
    fn debug_shows_listener_counts() {
        let mut connection = Connection::new(Recorder::default(), BackoffPolicy::default());
        connection.on_error(|_| {});

        let debug = format!("{connection:?}");
        assert!(debug.starts_with("Connection { state: Disconnected"));
        assert!(debug.contains("error_listeners: 1"));
        assert!(debug.ends_with(", .. }"));
    }
}
