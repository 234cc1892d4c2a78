// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Websocket and timer backend of the link client.
//!
//! Every socket runs in its own task and reports back through one
//! [`SocketEvent`] channel, tagged with its [`SocketId`]. The reconnect timer
//! is a spawned sleep whose handle is aborted on cancellation.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::connection::Transport;
use crate::error::{Error, ProtocolError};
use crate::transport::SocketId;

/// Something that happened on a socket or the reconnect timer.
#[derive(Debug)]
pub(crate) enum SocketEvent {
    Opened(SocketId),
    Text(SocketId, String),
    Binary(SocketId, Bytes),
    Failed(SocketId, Error),
    Closed(SocketId),
    BackoffElapsed(u64),
}

enum Outgoing {
    Text(String),
    Close,
}

/// [`Transport`] over tokio-tungstenite sockets.
#[derive(Debug)]
pub(crate) struct WebSocketTransport {
    events: mpsc::UnboundedSender<SocketEvent>,
    connect_timeout: Duration,
    sockets: HashMap<SocketId, mpsc::UnboundedSender<Outgoing>>,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
}

impl WebSocketTransport {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<SocketEvent>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            events,
            connect_timeout,
            sockets: HashMap::new(),
            timer: None,
            timer_generation: 0,
        }
    }

    /// Forgets a socket whose task has finished.
    pub(crate) fn forget(&mut self, socket: SocketId) {
        self.sockets.remove(&socket);
    }

    /// Consumes a timer expiry, returning false if the timer was cancelled
    /// or replaced after it fired.
    pub(crate) fn take_timer(&mut self, generation: u64) -> bool {
        if generation == self.timer_generation && self.timer.is_some() {
            self.timer = None;
            true
        } else {
            false
        }
    }

    /// Closes every socket and stops the timer.
    pub(crate) fn shutdown(&mut self) {
        self.cancel_reconnect();
        for (_, outgoing) in self.sockets.drain() {
            let _ = outgoing.send(Outgoing::Close);
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, socket: SocketId, url: &str) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.sockets.insert(socket, outgoing_tx);
        tokio::spawn(run_socket(
            socket,
            url.to_string(),
            self.connect_timeout,
            outgoing_rx,
            self.events.clone(),
        ));
    }

    fn close(&mut self, socket: SocketId) {
        if let Some(outgoing) = self.sockets.remove(&socket) {
            let _ = outgoing.send(Outgoing::Close);
        }
    }

    fn send(&mut self, socket: SocketId, text: String) {
        if let Some(outgoing) = self.sockets.get(&socket) {
            if outgoing.send(Outgoing::Text(text)).is_err() {
                tracing::warn!(socket = %socket, "Socket task gone, message dropped");
            }
        } else {
            tracing::warn!(socket = %socket, "Unknown socket, message dropped");
        }
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_reconnect();
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let events = self.events.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SocketEvent::BackoffElapsed(generation));
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

async fn run_socket(
    socket: SocketId,
    url: String,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let connect = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    let stream = tokio::select! {
        result = connect => match result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                let error = ProtocolError::from(e);
                let _ = events.send(SocketEvent::Failed(socket, error.into()));
                let _ = events.send(SocketEvent::Closed(socket));
                return;
            }
            Err(_) => {
                let error = ProtocolError::ConnectionFailed(format!(
                    "handshake with {url} timed out after {connect_timeout:?}"
                ));
                let _ = events.send(SocketEvent::Failed(socket, error.into()));
                let _ = events.send(SocketEvent::Closed(socket));
                return;
            }
        },
        _ = outgoing.recv() => {
            tracing::debug!(socket = %socket, "Socket closed while connecting");
            let _ = events.send(SocketEvent::Closed(socket));
            return;
        }
    };

    tracing::info!(socket = %socket, url = %url, "Socket open");
    let _ = events.send(SocketEvent::Opened(socket));
    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        let error = ProtocolError::from(e);
                        let _ = events.send(SocketEvent::Failed(socket, error.into()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Text(socket, text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(SocketEvent::Binary(socket, data));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    let error = ProtocolError::from(e);
                    let _ = events.send(SocketEvent::Failed(socket, error.into()));
                    break;
                }
            },
        }
    }

    tracing::info!(socket = %socket, "Socket closed");
    let _ = events.send(SocketEvent::Closed(socket));
}
