// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the telemetry link.
//!
//! Nothing in this crate is fatal: every error either reaches the callback
//! supplied for the affected topic or operation, or is surfaced through the
//! out-of-band error listeners of the [`Connection`](crate::Connection).

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred on the socket or while correlating frames.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a message from the remote process.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The remote process answered a request with `ok: false`.
    #[error("{request} rejected: {reason}")]
    Rejected {
        /// The request type that was rejected (e.g. `SubscribeOutput`).
        request: &'static str,
        /// The reason given by the remote process.
        reason: String,
    },

    /// The link is not subscribed yet, so the request cannot be sent.
    #[error("not connected")]
    NotConnected,

    /// The client task has shut down.
    #[error("link client has shut down")]
    ChannelClosed,
}

/// Errors related to the websocket and its frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The websocket reported an error.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Opening the socket failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A response arrived for a request id that is not pending.
    #[error("response for unknown request id {0}")]
    UnmatchedResponse(u64),

    /// A binary frame was shorter than its 8 byte header.
    #[error("binary frame of {0} bytes is shorter than the 8 byte header")]
    FrameTooShort(usize),
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}

/// Errors related to parsing messages from the remote process.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the message.
    #[error("missing field in message: {0}")]
    MissingField(&'static str),

    /// Unexpected message format.
    #[error("unexpected message format: {0}")]
    UnexpectedFormat(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
