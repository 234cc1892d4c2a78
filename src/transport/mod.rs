// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socket lifecycle: connect intent, url changes and reconnection backoff.
//!
//! - [`TransportStateMachine`]: the transition table, free of I/O
//! - [`TransportAction`]: effects the machine asks its owner to perform
//! - [`BackoffPolicy`]: delays between reconnection attempts

mod backoff;
mod state_machine;

pub use backoff::BackoffPolicy;
pub use state_machine::{SocketId, TransportAction, TransportState, TransportStateMachine};
