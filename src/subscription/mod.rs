// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription bookkeeping for outputs, images and parameters.
//!
//! # Overview
//!
//! The subscription system consists of:
//!
//! - [`SubscriptionId`] - A unique identifier for one subscribe call
//! - [`SubscriptionRegistry`] - Per-topic callback sets, reference counted
//! - [`Subscriptions`] - The three registries used by a connection
//! - [`SubscriptionHandle`] - Returned to callers, consumed on unsubscribe
//!
//! The registries survive reconnects. After every new connection the
//! protocol layer walks all active topics and subscribes them again.

mod registry;
mod topic;

pub use registry::{DataCallback, ErrorCallback, SubscriptionId, SubscriptionRegistry};
pub use topic::{Cycler, OutputTopic, OutputType, SubscriptionHandle, Topic};

use bytes::Bytes;
use serde_json::Value;

use crate::error::Error;

/// The three registries of a connection.
#[derive(Debug, Default)]
pub struct Subscriptions {
    /// Output subscriptions, keyed by cycler, output type and path.
    pub outputs: SubscriptionRegistry<OutputTopic, Value>,
    /// Image subscriptions, keyed by cycler.
    pub images: SubscriptionRegistry<Cycler, Bytes>,
    /// Parameter subscriptions, keyed by path.
    pub parameters: SubscriptionRegistry<String, Value>,
}

impl Subscriptions {
    /// Creates three empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every topic that currently has subscribers, across all registries.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        let mut topics = Vec::new();
        self.outputs
            .for_each_active_topic(|topic| topics.push(Topic::Output(topic.clone())));
        self.images
            .for_each_active_topic(|cycler| topics.push(Topic::Image(cycler.clone())));
        self.parameters
            .for_each_active_topic(|path| topics.push(Topic::Parameter(path.clone())));
        topics
    }

    /// Routes an error to the subscribers of a topic in the matching registry.
    pub fn dispatch_error(&self, topic: &Topic, error: &Error) -> usize {
        match topic {
            Topic::Output(output) => self.outputs.dispatch_error(output, error),
            Topic::Image(cycler) => self.images.dispatch_error(cycler, error),
            Topic::Parameter(path) => self.parameters.dispatch_error(path, error),
        }
    }

    /// Removes one subscriber, returning whether its topic lost its last subscriber.
    pub(crate) fn unregister(&self, topic: &Topic, id: SubscriptionId) -> Option<bool> {
        match topic {
            Topic::Output(output) => self.outputs.unregister(output, id),
            Topic::Image(cycler) => self.images.unregister(cycler, id),
            Topic::Parameter(path) => self.parameters.unregister(path, id),
        }
    }

    /// Returns the total number of active topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.outputs.topic_count() + self.images.topic_count() + self.parameters.topic_count()
    }
}
