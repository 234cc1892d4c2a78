// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for link state changes and out-of-band errors.
//!
//! The [`EventBus`] uses tokio's broadcast channel so any number of async
//! observers receive the same [`LinkEvent`]s.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use telemetry_link::Error;
//! use telemetry_link::event::{EventBus, LinkEvent};
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.publish_error(Arc::new(Error::NotConnected));
//! assert!(matches!(rx.try_recv(), Ok(LinkEvent::Error(_))));
//! ```

mod event_bus;
mod link_event;

pub use event_bus::EventBus;
pub use link_event::LinkEvent;
