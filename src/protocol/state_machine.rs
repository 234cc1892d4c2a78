// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request correlation, subscription reconciliation and push routing.
//!
//! # Lifecycle
//!
//! ```text
//! transport up ──▶ GettingHierarchies ──both answered──▶ Subscribing ──batch done──▶ Subscribed
//!                  (2 requests in flight)                 (1 request per topic)   ◀── new op ──┘
//! transport down ──▶ Disconnected (pending requests and queued ops are dropped)
//! ```
//!
//! Completion of both the hierarchy fetch and a subscription batch is
//! detected by the pending request map running empty, never by per-request
//! flags, so responses may arrive in any order.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use super::hierarchy::{PathTypes, parse_path_types};
use super::image::{ImageCorrelator, ImageFrame};
use super::message::{Push, Request, RequestBody, Response, ServerMessage};
use crate::error::{Error, ProtocolError};
use crate::state::ConnectionState;
use crate::subscription::{Subscriptions, Topic};

/// Called once when an update request succeeds.
pub type SuccessCallback = Box<dyn FnOnce() + Send>;

/// Called once when an update request fails.
pub type FailureCallback = Box<dyn FnOnce(Error) + Send>;

/// Detailed state of the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    /// The transport is not connected.
    Disconnected,
    /// Waiting for the output and parameter hierarchies.
    GettingHierarchies,
    /// Subscription requests are in flight.
    Subscribing,
    /// The remote subscriptions match the registries.
    Subscribed,
}

impl ProtocolState {
    /// Reduces the detailed state to the externally visible one.
    #[must_use]
    pub fn simplified(self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::GettingHierarchies => ConnectionState::Connecting,
            Self::Subscribing | Self::Subscribed => ConnectionState::Connected,
        }
    }
}

/// A change of the remote subscription set for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOp {
    /// `true` to subscribe, `false` to unsubscribe.
    pub subscribe: bool,
    /// The affected topic.
    pub topic: Topic,
}

impl SubscriptionOp {
    /// Creates a subscribe op.
    #[must_use]
    pub fn subscribe(topic: Topic) -> Self {
        Self {
            subscribe: true,
            topic,
        }
    }

    /// Creates an unsubscribe op.
    #[must_use]
    pub fn unsubscribe(topic: Topic) -> Self {
        Self {
            subscribe: false,
            topic,
        }
    }
}

enum PendingRequest {
    OutputHierarchy,
    ParameterHierarchy,
    Subscription(SubscriptionOp),
    UpdateParameter {
        path: String,
        on_success: SuccessCallback,
        on_error: FailureCallback,
    },
}

impl PendingRequest {
    /// Parameter updates do not hold back the subscription barrier.
    fn blocks_reconciliation(&self) -> bool {
        !matches!(self, Self::UpdateParameter { .. })
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputHierarchy => f.write_str("OutputHierarchy"),
            Self::ParameterHierarchy => f.write_str("ParameterHierarchy"),
            Self::Subscription(op) => f.debug_tuple("Subscription").field(op).finish(),
            Self::UpdateParameter { path, .. } => f
                .debug_struct("UpdateParameter")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// What the protocol machine asks its owner to do after an input.
#[derive(Debug, Default)]
pub struct ProtocolEffects {
    /// Requests to send, in order.
    pub requests: Vec<Request>,
    /// Out-of-band errors to surface.
    pub errors: Vec<Error>,
    /// States entered during the input, in order.
    pub transitions: Vec<ProtocolState>,
    /// The connection attempt failed and the socket should be dropped.
    pub abort_connection: bool,
}

impl ProtocolEffects {
    /// Returns true if the input had no visible effect.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.errors.is_empty()
            && self.transitions.is_empty()
            && !self.abort_connection
    }
}

/// Protocol layer on top of a connected transport.
///
/// Owns the three subscription registries, the pending request map, the
/// queue of subscription ops waiting for the next batch and the image
/// correlation buffers. All of it is touched from a single context; the
/// machine performs no I/O and returns [`ProtocolEffects`] instead.
pub struct ProtocolStateMachine {
    state: ProtocolState,
    next_request_id: u64,
    pending: HashMap<u64, PendingRequest>,
    queue: VecDeque<SubscriptionOp>,
    output_types: Option<PathTypes>,
    parameter_types: Option<PathTypes>,
    images: ImageCorrelator,
    subscriptions: Subscriptions,
}

impl ProtocolStateMachine {
    /// Creates a disconnected machine with empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ProtocolState::Disconnected,
            next_request_id: 0,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            output_types: None,
            parameter_types: None,
            images: ImageCorrelator::new(),
            subscriptions: Subscriptions::new(),
        }
    }

    /// Returns the detailed state.
    #[must_use]
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Returns the subscription registries.
    #[must_use]
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Returns the flattened output hierarchy of the current connection.
    #[must_use]
    pub fn output_types(&self) -> Option<&PathTypes> {
        self.output_types.as_ref()
    }

    /// Returns the flattened parameter hierarchy of the current connection.
    #[must_use]
    pub fn parameter_types(&self) -> Option<&PathTypes> {
        self.parameter_types.as_ref()
    }

    /// Returns the number of requests waiting for a response.
    #[must_use]
    pub fn pending_request_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the ops waiting for the next subscription batch.
    #[must_use]
    pub fn queued_ops(&self) -> Vec<SubscriptionOp> {
        self.queue.iter().cloned().collect()
    }

    /// Returns the number of image halves waiting for their counterpart.
    #[must_use]
    pub fn pending_image_count(&self) -> usize {
        self.images.pending_count()
    }

    /// Follows the simplified transport state.
    ///
    /// Reaching `Connected` starts the hierarchy fetch; leaving it abandons
    /// every pending request and queued op without invoking callbacks.
    pub fn on_transport_state(&mut self, transport: ConnectionState) -> ProtocolEffects {
        let mut effects = ProtocolEffects::default();
        let connected = transport == ConnectionState::Connected;

        if connected && self.state == ProtocolState::Disconnected {
            self.transition(ProtocolState::GettingHierarchies, &mut effects);
            self.send(
                RequestBody::GetOutputHierarchy,
                PendingRequest::OutputHierarchy,
                &mut effects,
            );
            self.send(
                RequestBody::GetParameterHierarchy,
                PendingRequest::ParameterHierarchy,
                &mut effects,
            );
        } else if !connected && self.state != ProtocolState::Disconnected {
            tracing::debug!(
                pending = self.pending.len(),
                queued = self.queue.len(),
                "Transport lost, abandoning protocol state"
            );
            self.pending.clear();
            self.queue.clear();
            self.images.clear();
            self.output_types = None;
            self.parameter_types = None;
            self.transition(ProtocolState::Disconnected, &mut effects);
        }
        effects
    }

    /// Announces a subscription change for a topic.
    ///
    /// Before the hierarchies are in, nothing is sent: the batch that follows
    /// them covers every registered topic anyway.
    pub fn request_subscription(&mut self, op: SubscriptionOp) -> ProtocolEffects {
        let mut effects = ProtocolEffects::default();
        if matches!(
            self.state,
            ProtocolState::Subscribing | ProtocolState::Subscribed
        ) {
            self.enqueue(op);
            self.reconcile(&mut effects);
        }
        effects
    }

    /// Sends a parameter update.
    ///
    /// Outside `Subscribing` and `Subscribed` the request is not sent and
    /// `on_error` receives [`Error::NotConnected`] before this returns.
    pub fn update_parameter(
        &mut self,
        path: String,
        data: Value,
        on_success: SuccessCallback,
        on_error: FailureCallback,
    ) -> ProtocolEffects {
        let mut effects = ProtocolEffects::default();
        if !matches!(
            self.state,
            ProtocolState::Subscribing | ProtocolState::Subscribed
        ) {
            tracing::debug!(
                path = %path,
                state = ?self.state,
                "Parameter update while not connected"
            );
            on_error(Error::NotConnected);
            return effects;
        }
        let body = RequestBody::UpdateParameter {
            path: path.clone(),
            data,
        };
        self.send(
            body,
            PendingRequest::UpdateParameter {
                path,
                on_success,
                on_error,
            },
            &mut effects,
        );
        effects
    }

    /// Handles a text message.
    pub fn handle_text(&mut self, text: &str) -> ProtocolEffects {
        let mut effects = ProtocolEffects::default();
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Response(response)) => self.on_response(&response, &mut effects),
            Ok(ServerMessage::Push(push)) => self.on_push(push),
            Err(error) => {
                tracing::warn!(error = %error, "Ignoring unparseable message");
                effects.errors.push(error.into());
            }
        }
        effects
    }

    /// Handles a binary image frame.
    ///
    /// Frames shorter than their header are dropped without notifying anyone.
    pub fn handle_binary(&mut self, frame: &Bytes) {
        let frame = match ImageFrame::decode(frame) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(error = %error, "Dropping binary frame");
                return;
            }
        };
        tracing::trace!(
            image_id = frame.image_id,
            size = frame.payload.len(),
            "Image frame received"
        );
        if let Some((cycler, blob)) = self.images.on_frame(frame) {
            self.subscriptions.images.dispatch_data(&cycler, &blob);
        }
    }

    fn on_response(&mut self, response: &Response, effects: &mut ProtocolEffects) {
        let Some(request) = self.pending.remove(&response.id) else {
            tracing::warn!(id = response.id, "Response for unknown request");
            effects
                .errors
                .push(ProtocolError::UnmatchedResponse(response.id).into());
            return;
        };
        tracing::trace!(
            id = response.id,
            ok = response.ok,
            request = ?request,
            "Response received"
        );

        match request {
            PendingRequest::OutputHierarchy => {
                let types = Self::read_hierarchy(
                    response,
                    "GetOutputHierarchy",
                    "output_hierarchy",
                    effects,
                );
                self.output_types = types;
                self.finish_hierarchies(effects);
            }
            PendingRequest::ParameterHierarchy => {
                let types = Self::read_hierarchy(
                    response,
                    "GetParameterHierarchy",
                    "parameter_hierarchy",
                    effects,
                );
                self.parameter_types = types;
                self.finish_hierarchies(effects);
            }
            PendingRequest::Subscription(op) => {
                if !response.ok {
                    let error = Error::Rejected {
                        request: RequestBody::subscription(&op.topic, op.subscribe).name(),
                        reason: response.reason(),
                    };
                    tracing::warn!(
                        topic = %op.topic,
                        error = %error,
                        "Subscription change rejected"
                    );
                    self.subscriptions.dispatch_error(&op.topic, &error);
                }
                self.reconcile(effects);
            }
            PendingRequest::UpdateParameter {
                path,
                on_success,
                on_error,
            } => {
                if response.ok {
                    tracing::debug!(path = %path, "Parameter updated");
                    on_success();
                } else {
                    let error = Error::Rejected {
                        request: "UpdateParameter",
                        reason: response.reason(),
                    };
                    tracing::warn!(path = %path, error = %error, "Parameter update rejected");
                    on_error(error);
                }
                self.reconcile(effects);
            }
        }
    }

    fn read_hierarchy(
        response: &Response,
        request: &'static str,
        field: &'static str,
        effects: &mut ProtocolEffects,
    ) -> Option<PathTypes> {
        let result = if response.ok {
            parse_path_types(&response.payload, field).map_err(Error::from)
        } else {
            Err(Error::Rejected {
                request,
                reason: response.reason(),
            })
        };
        match result {
            Ok(types) => {
                tracing::debug!(request, paths = types.len(), "Hierarchy received");
                Some(types)
            }
            Err(error) => {
                tracing::warn!(
                    request,
                    error = %error,
                    "Hierarchy fetch failed, dropping connection"
                );
                effects.errors.push(error);
                effects.abort_connection = true;
                None
            }
        }
    }

    fn finish_hierarchies(&mut self, effects: &mut ProtocolEffects) {
        if self.state != ProtocolState::GettingHierarchies
            || self.reconciliation_in_flight()
            || self.output_types.is_none()
            || self.parameter_types.is_none()
        {
            return;
        }
        self.queue = self
            .subscriptions
            .active_topics()
            .into_iter()
            .map(SubscriptionOp::subscribe)
            .collect();
        tracing::debug!(
            topics = self.queue.len(),
            "Hierarchies complete, resubscribing"
        );
        self.reconcile(effects);
    }

    fn on_push(&mut self, push: Push) {
        match push {
            Push::OutputsUpdated {
                cycler,
                outputs,
                image_id,
            } => {
                for update in &outputs {
                    if let Some(topic) = update.output.to_topic(&cycler) {
                        self.subscriptions
                            .outputs
                            .dispatch_data(&topic, &update.data);
                    } else {
                        tracing::trace!(cycler = %cycler, "Ignoring image entry in outputs");
                    }
                }
                if let Some(image_id) = image_id
                    && let Some((cycler, blob)) = self.images.on_metadata(image_id, cycler)
                {
                    self.subscriptions.images.dispatch_data(&cycler, &blob);
                }
            }
            Push::ParameterUpdated { path, data } => {
                self.subscriptions.parameters.dispatch_data(&path, &data);
            }
        }
    }

    /// Queues an op, cancelling a queued opposite op for the same topic instead.
    fn enqueue(&mut self, op: SubscriptionOp) {
        if let Some(index) = self.queue.iter().position(|other| other.topic == op.topic) {
            if self.queue[index].subscribe != op.subscribe {
                tracing::trace!(topic = %op.topic, "Coalesced opposite subscription ops");
                self.queue.remove(index);
            }
            return;
        }
        self.queue.push_back(op);
    }

    /// Sends queued ops batch by batch until nothing is in flight or queued.
    fn reconcile(&mut self, effects: &mut ProtocolEffects) {
        if self.state == ProtocolState::Disconnected {
            return;
        }
        if self.state == ProtocolState::GettingHierarchies
            && (self.output_types.is_none() || self.parameter_types.is_none())
        {
            return;
        }
        while !self.reconciliation_in_flight() {
            if self.queue.is_empty() {
                self.transition(ProtocolState::Subscribed, effects);
                return;
            }
            self.transition(ProtocolState::Subscribing, effects);
            let batch: Vec<SubscriptionOp> = self.queue.drain(..).collect();
            for op in batch {
                let body = RequestBody::subscription(&op.topic, op.subscribe);
                self.send(body, PendingRequest::Subscription(op), effects);
            }
        }
    }

    fn reconciliation_in_flight(&self) -> bool {
        self.pending
            .values()
            .any(PendingRequest::blocks_reconciliation)
    }

    fn send(&mut self, body: RequestBody, pending: PendingRequest, effects: &mut ProtocolEffects) {
        let id = self.next_request_id;
        self.next_request_id += 1;
        tracing::debug!(id, request = body.name(), "Sending request");
        self.pending.insert(id, pending);
        effects.requests.push(Request { id, body });
    }

    fn transition(&mut self, next: ProtocolState, effects: &mut ProtocolEffects) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Protocol state changed");
            self.state = next;
            effects.transitions.push(next);
        }
    }
}

impl Default for ProtocolStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProtocolStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolStateMachine")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("queued", &self.queue.len())
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}
