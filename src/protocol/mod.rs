// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application protocol spoken over the socket.
//!
//! - [`message`]: request, response and push wire formats
//! - [`hierarchy`]: output and parameter schema trees and their flattening
//! - [`image`]: binary frames and their pairing with metadata pushes
//! - [`ProtocolStateMachine`]: request correlation and subscription reconciliation

pub mod hierarchy;
pub mod image;
pub mod message;
mod state_machine;

pub use hierarchy::{Hierarchy, PathTypes};
pub use image::{ImageCorrelator, ImageFrame};
pub use message::{OutputRef, OutputUpdate, Push, Request, RequestBody, Response, ServerMessage};
pub use state_machine::{
    FailureCallback, ProtocolEffects, ProtocolState, ProtocolStateMachine, SubscriptionOp,
    SuccessCallback,
};
