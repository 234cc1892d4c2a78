// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic keys for the three subscription registries.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::SubscriptionId;

/// A named remote execution stage producing outputs (e.g. `VisionTop`).
///
/// # Examples
///
/// ```
/// use telemetry_link::subscription::Cycler;
///
/// let cycler = Cycler::new("VisionTop");
/// assert_eq!(cycler.as_str(), "VisionTop");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cycler(String);

impl Cycler {
    /// Creates a cycler key from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the cycler name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cycler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cycler {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Cycler {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Classification of a cycler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputType {
    /// Always computed by the cycler.
    Main,
    /// Only computed while someone is subscribed.
    Additional,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("Main"),
            Self::Additional => f.write_str("Additional"),
        }
    }
}

/// Key of the output registry: one path of one cycler's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputTopic {
    /// The producing cycler.
    pub cycler: Cycler,
    /// Main or additional output.
    pub output_type: OutputType,
    /// Dot-separated path into the output struct.
    pub path: String,
}

impl OutputTopic {
    /// Creates an output topic.
    #[must_use]
    pub fn new(
        cycler: impl Into<Cycler>,
        output_type: OutputType,
        path: impl Into<String>,
    ) -> Self {
        Self {
            cycler: cycler.into(),
            output_type,
            path: path.into(),
        }
    }
}

impl fmt::Display for OutputTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.cycler, self.output_type, self.path)
    }
}

/// Any topic of any of the three registries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// An output path, keyed by cycler, output type and path.
    Output(OutputTopic),
    /// The image stream of a cycler.
    Image(Cycler),
    /// A parameter path.
    Parameter(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(topic) => write!(f, "output {topic}"),
            Self::Image(cycler) => write!(f, "image {cycler}"),
            Self::Parameter(path) => write!(f, "parameter {path}"),
        }
    }
}

/// Proof of one subscribe call, consumed by unsubscribing.
///
/// The handle is not `Clone`: a subscription can be released
/// exactly once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping the handle leaves the subscription registered"]
pub struct SubscriptionHandle {
    topic: Topic,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub(crate) fn new(topic: Topic, id: SubscriptionId) -> Self {
        Self { topic, id }
    }

    /// Returns the subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Returns the subscriber id of this subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn into_parts(self) -> (Topic, SubscriptionId) {
        (self.topic, self.id)
    }
}
