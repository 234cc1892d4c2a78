// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `telemetry_link` - A resilient live-telemetry link to a robot process.
//!
//! The link runs over a single websocket. It keeps reconnecting through
//! flaky networks, resubscribes every active topic after each reconnect,
//! correlates requests with their responses and pairs binary image frames
//! with the metadata that announces them.
//!
//! # Layers
//!
//! - [`transport`]: socket lifecycle and reconnection backoff
//! - [`protocol`]: wire messages, schema hierarchies, image frames and
//!   subscription reconciliation
//! - [`connection`]: the I/O-free facade composing both state machines
//! - [`LinkClient`]: a tokio task driving the facade over real websockets
//!
//! # Quick Start
//!
//! ```no_run
//! use telemetry_link::{ConnectionState, LinkClient, LinkConfig, OutputType};
//!
//! #[tokio::main]
//! async fn main() -> telemetry_link::Result<()> {
//!     let client = LinkClient::spawn(
//!         LinkConfig::new()
//!             .with_url("ws://10.1.24.32:1337")
//!             .with_connect(true),
//!     );
//!
//!     let _ball = client
//!         .subscribe_output(
//!             "VisionTop",
//!             OutputType::Main,
//!             "ball.position",
//!             |value| println!("ball at {value}"),
//!             |error| eprintln!("ball: {error}"),
//!         )
//!         .await?;
//!
//!     let mut state = client.watch_state();
//!     state
//!         .wait_for(|state| *state == ConnectionState::Connected)
//!         .await
//!         .map_err(|_| telemetry_link::Error::ChannelClosed)?;
//!
//!     println!("{} output paths", client.output_types().await?.len());
//!     client.shutdown().await
//! }
//! ```
//!
//! # Without a runtime
//!
//! [`Connection`] performs no I/O itself. Plugging in a custom
//! [`connection::Transport`] drives the same state machines from any event
//! loop, or from a test.

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod protocol;
pub mod state;
pub mod subscription;
pub mod transport;

pub use client::{LinkClient, LinkConfig};
pub use connection::{Connection, ListenerId, Transport};
pub use error::{Error, ParseError, ProtocolError, Result};
pub use event::{EventBus, LinkEvent};
pub use protocol::{PathTypes, ProtocolState};
pub use state::ConnectionState;
pub use subscription::{Cycler, OutputTopic, OutputType, SubscriptionHandle, SubscriptionId, Topic};
pub use transport::{BackoffPolicy, SocketId, TransportState};
