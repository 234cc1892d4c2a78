// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reference-counted bookkeeping of which callbacks watch which topic.
//!
//! This module provides the core types for managing subscription callbacks:
//!
//! - [`SubscriptionId`] - Unique identifier of one subscribe call
//! - [`SubscriptionRegistry`] - Per-topic callback sets with first/last signalling

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Error;

/// Unique identifier for a subscription.
///
/// Every subscribe call gets a fresh id, even when the topic is already
/// watched by other subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a new subscription ID with the given value.
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Callback receiving pushed values of a topic.
pub type DataCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback receiving errors routed to a topic.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

struct Subscriber<T> {
    on_data: DataCallback<T>,
    on_error: ErrorCallback,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            on_data: Arc::clone(&self.on_data),
            on_error: Arc::clone(&self.on_error),
        }
    }
}

/// Registry mapping topics to their subscribers.
///
/// A topic entry exists exactly as long as it has at least one subscriber.
/// The return values of [`register`](Self::register) and
/// [`unregister`](Self::unregister) tell the caller when a topic gains its
/// first or loses its last subscriber, which is when the remote process has
/// to be told.
///
/// Dispatching works on a snapshot of the subscribers, so callbacks may
/// register or unregister on the same registry without affecting the
/// broadcast in progress.
pub struct SubscriptionRegistry<K, T> {
    topics: RwLock<HashMap<K, HashMap<SubscriptionId, Subscriber<T>>>>,
}

impl<K, T> SubscriptionRegistry<K, T>
where
    K: Eq + Hash + Clone,
{
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a subscriber for a topic.
    ///
    /// Returns `true` if this is the first subscriber of the topic.
    pub fn register(
        &self,
        topic: K,
        id: SubscriptionId,
        on_data: DataCallback<T>,
        on_error: ErrorCallback,
    ) -> bool {
        let mut topics = self.topics.write();
        let subscribers = topics.entry(topic).or_default();
        let first = subscribers.is_empty();
        subscribers.insert(id, Subscriber { on_data, on_error });
        first
    }

    /// Unregisters a subscriber from a topic.
    ///
    /// Returns `Some(true)` if the topic lost its last subscriber and was
    /// removed, `Some(false)` if subscribers remain, and `None` if the topic
    /// was never registered.
    pub fn unregister(&self, topic: &K, id: SubscriptionId) -> Option<bool> {
        let mut topics = self.topics.write();
        let subscribers = topics.get_mut(topic)?;
        subscribers.remove(&id);
        if subscribers.is_empty() {
            topics.remove(topic);
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Invokes every data callback of the topic with the value.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch_data(&self, topic: &K, value: &T) -> usize {
        let snapshot = self.snapshot(topic);
        for subscriber in &snapshot {
            (subscriber.on_data)(value);
        }
        snapshot.len()
    }

    /// Invokes every error callback of the topic with the error.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch_error(&self, topic: &K, error: &Error) -> usize {
        let snapshot = self.snapshot(topic);
        for subscriber in &snapshot {
            (subscriber.on_error)(error);
        }
        snapshot.len()
    }

    /// Calls `f` once for every topic that currently has subscribers.
    pub fn for_each_active_topic(&self, mut f: impl FnMut(&K)) {
        let topics: Vec<K> = self.topics.read().keys().cloned().collect();
        for topic in &topics {
            f(topic);
        }
    }

    /// Returns `true` if the topic has at least one subscriber.
    #[must_use]
    pub fn contains(&self, topic: &K) -> bool {
        self.topics.read().contains_key(topic)
    }

    /// Returns the number of topics with subscribers.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Returns the number of subscribers of a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &K) -> usize {
        self.topics.read().get(topic).map_or(0, HashMap::len)
    }

    /// Returns `true` if no topic has subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }

    fn snapshot(&self, topic: &K) -> Vec<Subscriber<T>> {
        self.topics
            .read()
            .get(topic)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl<K, T> Default for SubscriptionRegistry<K, T>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for SubscriptionRegistry<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topic_count", &self.topics.read().len())
            .finish()
    }
}
