// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Text messages exchanged with the remote process.
//!
//! Requests carry an `id` that the matching response repeats. Pushes carry
//! no `id`.
//!
//! ```text
//! → {"id":3,"type":"SubscribeOutput","cycler":"VisionTop","output":{"type":"Main","path":"ball"}}
//! ← {"id":3,"ok":true}
//! ← {"type":"OutputsUpdated","cycler":"VisionTop","outputs":[{"output":{"type":"Main","path":"ball"},"data":null}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::subscription::{Cycler, OutputTopic, OutputType, Topic};

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Correlation id, repeated by the response.
    pub id: u64,
    /// The request type and its fields.
    #[serde(flatten)]
    pub body: RequestBody,
}

impl Request {
    /// Serializes the request to its wire text.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Json` if the request data cannot be serialized.
    pub fn to_text(&self) -> Result<String, ParseError> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

/// The request catalogue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum RequestBody {
    /// Fetch the schema of all outputs.
    GetOutputHierarchy,
    /// Fetch the schema of all parameters.
    GetParameterHierarchy,
    /// Start receiving an output or a cycler's images.
    SubscribeOutput {
        /// The producing cycler.
        cycler: Cycler,
        /// Which output of the cycler.
        output: OutputRef,
    },
    /// Stop receiving an output or a cycler's images.
    UnsubscribeOutput {
        /// The producing cycler.
        cycler: Cycler,
        /// Which output of the cycler.
        output: OutputRef,
    },
    /// Start receiving updates of a parameter.
    SubscribeParameter {
        /// Parameter path.
        path: String,
    },
    /// Stop receiving updates of a parameter.
    UnsubscribeParameter {
        /// Parameter path.
        path: String,
    },
    /// Overwrite a parameter.
    UpdateParameter {
        /// Parameter path.
        path: String,
        /// New value.
        data: Value,
    },
}

impl RequestBody {
    /// Builds the subscribe or unsubscribe request for a topic.
    #[must_use]
    pub fn subscription(topic: &Topic, subscribe: bool) -> Self {
        match topic {
            Topic::Output(output) => {
                let cycler = output.cycler.clone();
                let output = OutputRef::from_topic(output);
                if subscribe {
                    Self::SubscribeOutput { cycler, output }
                } else {
                    Self::UnsubscribeOutput { cycler, output }
                }
            }
            Topic::Image(cycler) => {
                let cycler = cycler.clone();
                if subscribe {
                    Self::SubscribeOutput {
                        cycler,
                        output: OutputRef::Image,
                    }
                } else {
                    Self::UnsubscribeOutput {
                        cycler,
                        output: OutputRef::Image,
                    }
                }
            }
            Topic::Parameter(path) => {
                let path = path.clone();
                if subscribe {
                    Self::SubscribeParameter { path }
                } else {
                    Self::UnsubscribeParameter { path }
                }
            }
        }
    }

    /// Returns the wire name of the request type.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetOutputHierarchy => "GetOutputHierarchy",
            Self::GetParameterHierarchy => "GetParameterHierarchy",
            Self::SubscribeOutput { .. } => "SubscribeOutput",
            Self::UnsubscribeOutput { .. } => "UnsubscribeOutput",
            Self::SubscribeParameter { .. } => "SubscribeParameter",
            Self::UnsubscribeParameter { .. } => "UnsubscribeParameter",
            Self::UpdateParameter { .. } => "UpdateParameter",
        }
    }
}

/// Reference to one output of a cycler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputRef {
    /// A main output path.
    Main {
        /// Dot-separated path.
        path: String,
    },
    /// An additional output path.
    Additional {
        /// Dot-separated path.
        path: String,
    },
    /// The cycler's image stream.
    Image,
}

impl OutputRef {
    fn from_topic(topic: &OutputTopic) -> Self {
        let path = topic.path.clone();
        match topic.output_type {
            OutputType::Main => Self::Main { path },
            OutputType::Additional => Self::Additional { path },
        }
    }

    /// Returns the registry key of this output, if it is a path output.
    #[must_use]
    pub fn to_topic(&self, cycler: &Cycler) -> Option<OutputTopic> {
        let (output_type, path) = match self {
            Self::Main { path } => (OutputType::Main, path),
            Self::Additional { path } => (OutputType::Additional, path),
            Self::Image => return None,
        };
        Some(OutputTopic::new(cycler.clone(), output_type, path))
    }
}

/// A message received from the remote process.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Answer to a request.
    Response(Response),
    /// Unsolicited update.
    Push(Push),
}

impl ServerMessage {
    /// Parses a text message.
    ///
    /// Messages with an `id` are responses, all others are pushes.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the text is not JSON or matches neither shape.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = &value else {
            return Err(ParseError::UnexpectedFormat(format!(
                "expected a JSON object, got {value}"
            )));
        };
        if object.contains_key("id") {
            Ok(Self::Response(serde_json::from_value(value)?))
        } else {
            Ok(Self::Push(serde_json::from_value(value)?))
        }
    }
}

/// Answer to a request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Id of the answered request.
    pub id: u64,
    /// Whether the request succeeded.
    pub ok: bool,
    /// Failure reason, if `ok` is false.
    #[serde(default)]
    pub reason: Option<String>,
    /// Every other field of the response.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Response {
    /// Returns the failure reason, or a placeholder if none was given.
    #[must_use]
    pub fn reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "no reason given".to_string())
    }
}

/// Unsolicited update from the remote process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Push {
    /// New values of subscribed outputs of one cycler.
    OutputsUpdated {
        /// The producing cycler.
        cycler: Cycler,
        /// Updated outputs.
        #[serde(default)]
        outputs: Vec<OutputUpdate>,
        /// Correlation id of a binary image frame belonging to this update.
        #[serde(default)]
        image_id: Option<u32>,
    },
    /// New value of a subscribed parameter.
    ParameterUpdated {
        /// Parameter path.
        path: String,
        /// New value.
        data: Value,
    },
}

/// One updated output inside an `OutputsUpdated` push.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputUpdate {
    /// Which output was updated.
    pub output: OutputRef,
    /// The new value.
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_output_wire_format() {
        let topic = Topic::Output(OutputTopic::new("VisionTop", OutputType::Main, "ball"));
        let request = Request {
            id: 3,
            body: RequestBody::subscription(&topic, true),
        };
        let value: Value = serde_json::from_str(&request.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 3,
                "type": "SubscribeOutput",
                "cycler": "VisionTop",
                "output": {"type": "Main", "path": "ball"}
            })
        );
    }

    #[test]
    fn unsubscribe_image_has_no_path() {
        let request = Request {
            id: 0,
            body: RequestBody::subscription(&Topic::Image(Cycler::new("VisionBottom")), false),
        };
        let value: Value = serde_json::from_str(&request.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 0,
                "type": "UnsubscribeOutput",
                "cycler": "VisionBottom",
                "output": {"type": "Image"}
            })
        );
    }

    #[test]
    fn hierarchy_request_is_bare() {
        let request = Request {
            id: 1,
            body: RequestBody::GetParameterHierarchy,
        };
        let value: Value = serde_json::from_str(&request.to_text().unwrap()).unwrap();
        assert_eq!(value, json!({"id": 1, "type": "GetParameterHierarchy"}));
    }

    #[test]
    fn update_parameter_wire_format() {
        let request = Request {
            id: 9,
            body: RequestBody::UpdateParameter {
                path: "head.pitch".to_string(),
                data: json!(0.5),
            },
        };
        let value: Value = serde_json::from_str(&request.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": 9, "type": "UpdateParameter", "path": "head.pitch", "data": 0.5})
        );
        assert_eq!(request.body.name(), "UpdateParameter");
    }

    #[test]
    fn parse_response_keeps_payload() {
        let text = r#"{"id":4,"ok":true,"output_hierarchy":{}}"#;
        let message = ServerMessage::parse(text).unwrap();
        let ServerMessage::Response(response) = message else {
            panic!("expected response");
        };
        assert_eq!(response.id, 4);
        assert!(response.ok);
        assert!(response.payload.contains_key("output_hierarchy"));
    }

    #[test]
    fn parse_rejected_response() {
        let text = r#"{"id":5,"ok":false,"reason":"no such path"}"#;
        let message = ServerMessage::parse(text).unwrap();
        let ServerMessage::Response(response) = message else {
            panic!("expected response");
        };
        assert!(!response.ok);
        assert_eq!(response.reason(), "no such path");
    }

    #[test]
    fn parse_outputs_updated() {
        let text = r#"{
            "type": "OutputsUpdated",
            "cycler": "Control",
            "outputs": [{"output": {"type": "Additional", "path": "a.b"}, "data": [1, 2]}],
            "image_id": 12
        }"#;
        let ServerMessage::Push(Push::OutputsUpdated {
            cycler,
            outputs,
            image_id,
        }) = ServerMessage::parse(text).unwrap()
        else {
            panic!("expected OutputsUpdated");
        };
        assert_eq!(cycler, Cycler::new("Control"));
        assert_eq!(image_id, Some(12));
        assert_eq!(
            outputs[0].output.to_topic(&cycler),
            Some(OutputTopic::new("Control", OutputType::Additional, "a.b"))
        );
        assert_eq!(outputs[0].data, json!([1, 2]));
    }

    #[test]
    fn parse_parameter_updated() {
        let text = r#"{"type":"ParameterUpdated","path":"x","data":true}"#;
        let message = ServerMessage::parse(text).unwrap();
        assert_eq!(
            message,
            ServerMessage::Push(Push::ParameterUpdated {
                path: "x".to_string(),
                data: json!(true),
            })
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            ServerMessage::parse("not json"),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            ServerMessage::parse("[1,2]"),
            Err(ParseError::UnexpectedFormat(_))
        ));
        assert!(ServerMessage::parse(r#"{"type":"Unknown"}"#).is_err());
    }
}
