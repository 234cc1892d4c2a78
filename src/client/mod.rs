// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tokio client for the telemetry link.
//!
//! [`LinkClient`] is a cheap, cloneable handle to a background task that
//! owns a [`Connection`] driven by real websockets and timers. Commands are
//! queued to the task, so the handle can be used from anywhere, including
//! from inside subscription callbacks via `tokio::spawn`.
//!
//! # Examples
//!
//! ```no_run
//! use telemetry_link::{LinkClient, LinkConfig, OutputType};
//!
//! # async fn example() -> telemetry_link::Result<()> {
//! let client = LinkClient::spawn(
//!     LinkConfig::new()
//!         .with_url("ws://10.1.24.32:1337")
//!         .with_connect(true),
//! );
//!
//! let ball = client
//!     .subscribe_output(
//!         "VisionTop",
//!         OutputType::Main,
//!         "ball.position",
//!         |value| println!("ball: {value}"),
//!         |error| eprintln!("ball subscription failed: {error}"),
//!     )
//!     .await?;
//!
//! client
//!     .update_parameter("walk.speed", serde_json::json!(0.25))
//!     .await?;
//!
//! client.unsubscribe(ball).await?;
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod websocket;

pub use config::{
    DEFAULT_COMMAND_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_EVENT_CAPACITY, LinkConfig,
};

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::event::{EventBus, LinkEvent};
use crate::protocol::PathTypes;
use crate::state::ConnectionState;
use crate::subscription::{
    Cycler, DataCallback, ErrorCallback, OutputTopic, OutputType, SubscriptionHandle,
};
use websocket::{SocketEvent, WebSocketTransport};

/// Which path hierarchy a lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HierarchyKind {
    Outputs,
    Parameters,
}

/// Commands sent from the handle to the background task.
enum Command {
    SetConnect(bool),
    SetUrl(String),
    SubscribeOutput {
        topic: OutputTopic,
        on_data: DataCallback<Value>,
        on_error: ErrorCallback,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    SubscribeImage {
        cycler: Cycler,
        on_data: DataCallback<Bytes>,
        on_error: ErrorCallback,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    SubscribeParameter {
        path: String,
        on_data: DataCallback<Value>,
        on_error: ErrorCallback,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    Unsubscribe(SubscriptionHandle),
    UpdateParameter {
        path: String,
        data: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Hierarchy {
        kind: HierarchyKind,
        reply: oneshot::Sender<PathTypes>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running link.
///
/// Cloning the handle is cheap; all clones talk to the same background task.
/// The task stops on [`shutdown`](Self::shutdown) or once every handle has
/// been dropped.
///
/// Subscription callbacks run on the background task and must not block.
#[derive(Debug, Clone)]
pub struct LinkClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: EventBus,
}

impl LinkClient {
    /// Starts the background task and returns a handle to it.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn spawn(config: LinkConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let events = EventBus::new(config.event_capacity);

        let transport = WebSocketTransport::new(socket_tx, config.connect_timeout);
        let mut connection = Connection::new(transport, config.backoff);

        let bus = events.clone();
        connection.on_state_changed(move |state| {
            state_tx.send_replace(state);
            bus.publish_state(state);
        });
        let bus = events.clone();
        connection.on_error(move |error| {
            bus.publish_error(Arc::clone(error));
        });

        if let Some(url) = config.url {
            connection.set_url(url);
        }
        connection.set_connect(config.connect);

        tokio::spawn(run(connection, command_rx, socket_rx));

        Self {
            commands: command_tx,
            state: state_rx,
            events,
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver that tracks the connection state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribes to state changes and out-of-band errors.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sets the connect intent.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn set_connect(&self, connect: bool) -> Result<()> {
        self.send(Command::SetConnect(connect)).await
    }

    /// Sets the websocket url.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn set_url(&self, url: impl Into<String>) -> Result<()> {
        self.send(Command::SetUrl(url.into())).await
    }

    /// Subscribes to one output of a cycler.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn subscribe_output<D, E>(
        &self,
        cycler: impl Into<Cycler>,
        output_type: OutputType,
        path: impl Into<String>,
        on_data: D,
        on_error: E,
    ) -> Result<SubscriptionHandle>
    where
        D: Fn(&Value) + Send + Sync + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        let (reply, handle) = oneshot::channel();
        self.send(Command::SubscribeOutput {
            topic: OutputTopic::new(cycler, output_type, path),
            on_data: Arc::new(on_data),
            on_error: Arc::new(on_error),
            reply,
        })
        .await?;
        handle.await.map_err(|_| Error::ChannelClosed)
    }

    /// Subscribes to the images of a cycler.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn subscribe_image<D, E>(
        &self,
        cycler: impl Into<Cycler>,
        on_data: D,
        on_error: E,
    ) -> Result<SubscriptionHandle>
    where
        D: Fn(&Bytes) + Send + Sync + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        let (reply, handle) = oneshot::channel();
        self.send(Command::SubscribeImage {
            cycler: cycler.into(),
            on_data: Arc::new(on_data),
            on_error: Arc::new(on_error),
            reply,
        })
        .await?;
        handle.await.map_err(|_| Error::ChannelClosed)
    }

    /// Subscribes to updates of a parameter.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn subscribe_parameter<D, E>(
        &self,
        path: impl Into<String>,
        on_data: D,
        on_error: E,
    ) -> Result<SubscriptionHandle>
    where
        D: Fn(&Value) + Send + Sync + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        let (reply, handle) = oneshot::channel();
        self.send(Command::SubscribeParameter {
            path: path.into(),
            on_data: Arc::new(on_data),
            on_error: Arc::new(on_error),
            reply,
        })
        .await?;
        handle.await.map_err(|_| Error::ChannelClosed)
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.send(Command::Unsubscribe(handle)).await
    }

    /// Overwrites a parameter and waits for the remote process to confirm.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the link is not subscribed or the
    /// connection is lost before the response arrives, `Error::Rejected` if
    /// the remote process refused the update and `Error::ChannelClosed` if
    /// the client has shut down.
    pub async fn update_parameter(&self, path: impl Into<String>, data: Value) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.send(Command::UpdateParameter {
            path: path.into(),
            data,
            reply,
        })
        .await?;
        result.await.map_err(|_| Error::NotConnected)?
    }

    /// Returns the flattened output hierarchy of the current connection.
    ///
    /// The map is empty until the hierarchy has been fetched.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn output_types(&self) -> Result<PathTypes> {
        self.hierarchy(HierarchyKind::Outputs).await
    }

    /// Returns the flattened parameter hierarchy of the current connection.
    ///
    /// The map is empty until the hierarchy has been fetched.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has shut down.
    pub async fn parameter_types(&self) -> Result<PathTypes> {
        self.hierarchy(HierarchyKind::Parameters).await
    }

    /// Closes the socket, cancels the reconnect timer and stops the task.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the client has already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        done.await.map_err(|_| Error::ChannelClosed)
    }

    async fn hierarchy(&self, kind: HierarchyKind) -> Result<PathTypes> {
        let (reply, types) = oneshot::channel();
        self.send(Command::Hierarchy { kind, reply }).await?;
        types.await.map_err(|_| Error::ChannelClosed)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

// ============================================================================
// Background task
// ============================================================================

async fn run(
    mut connection: Connection<WebSocketTransport>,
    mut commands: mpsc::Receiver<Command>,
    mut socket_events: mpsc::UnboundedReceiver<SocketEvent>,
) {
    tracing::debug!("Link task started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown { reply }) => {
                    stop(&mut connection);
                    let _ = reply.send(());
                    break;
                }
                Some(command) => handle_command(&mut connection, command),
                None => {
                    stop(&mut connection);
                    break;
                }
            },
            Some(event) = socket_events.recv() => handle_socket_event(&mut connection, event),
        }
    }
    tracing::debug!("Link task stopped");
}

fn stop(connection: &mut Connection<WebSocketTransport>) {
    connection.set_connect(false);
    connection.transport_mut().shutdown();
}

fn handle_command(connection: &mut Connection<WebSocketTransport>, command: Command) {
    match command {
        Command::SetConnect(connect) => connection.set_connect(connect),
        Command::SetUrl(url) => connection.set_url(url),
        Command::SubscribeOutput {
            topic,
            on_data,
            on_error,
            reply,
        } => {
            let handle = connection.subscribe_output(
                topic.cycler,
                topic.output_type,
                topic.path,
                move |value: &Value| on_data(value),
                move |error: &Error| on_error(error),
            );
            deliver_handle(connection, reply, handle);
        }
        Command::SubscribeImage {
            cycler,
            on_data,
            on_error,
            reply,
        } => {
            let handle = connection.subscribe_image(
                cycler,
                move |blob: &Bytes| on_data(blob),
                move |error: &Error| on_error(error),
            );
            deliver_handle(connection, reply, handle);
        }
        Command::SubscribeParameter {
            path,
            on_data,
            on_error,
            reply,
        } => {
            let handle = connection.subscribe_parameter(
                path,
                move |value: &Value| on_data(value),
                move |error: &Error| on_error(error),
            );
            deliver_handle(connection, reply, handle);
        }
        Command::Unsubscribe(handle) => connection.unsubscribe(handle),
        Command::UpdateParameter { path, data, reply } => {
            let reply = Arc::new(Mutex::new(Some(reply)));
            let on_error_reply = Arc::clone(&reply);
            connection.update_parameter(
                path,
                data,
                move || {
                    if let Some(reply) = reply.lock().take() {
                        let _ = reply.send(Ok(()));
                    }
                },
                move |error: Error| {
                    if let Some(reply) = on_error_reply.lock().take() {
                        let _ = reply.send(Err(error));
                    }
                },
            );
        }
        Command::Hierarchy { kind, reply } => {
            let types = match kind {
                HierarchyKind::Outputs => connection.output_types(),
                HierarchyKind::Parameters => connection.parameter_types(),
            };
            let _ = reply.send(types.cloned().unwrap_or_default());
        }
        Command::Shutdown { .. } => {}
    }
}

/// Hands the subscription handle back, or drops the subscription if the
/// caller stopped waiting for it.
fn deliver_handle(
    connection: &mut Connection<WebSocketTransport>,
    reply: oneshot::Sender<SubscriptionHandle>,
    handle: SubscriptionHandle,
) {
    if let Err(handle) = reply.send(handle) {
        tracing::debug!(topic = %handle.topic(), "Subscriber gone, removing subscription");
        connection.unsubscribe(handle);
    }
}

fn handle_socket_event(connection: &mut Connection<WebSocketTransport>, event: SocketEvent) {
    match event {
        SocketEvent::Opened(socket) => connection.handle_open(socket),
        SocketEvent::Text(socket, text) => connection.handle_text(socket, &text),
        SocketEvent::Binary(socket, frame) => connection.handle_binary(socket, &frame),
        SocketEvent::Failed(socket, error) => connection.handle_socket_error(socket, error),
        SocketEvent::Closed(socket) => {
            connection.transport_mut().forget(socket);
            connection.handle_close(socket);
        }
        SocketEvent::BackoffElapsed(generation) => {
            if connection.transport_mut().take_timer(generation) {
                connection.handle_backoff_elapsed();
            }
        }
    }
}
