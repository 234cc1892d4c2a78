// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the link client against an in-process websocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use telemetry_link::transport::BackoffPolicy;
use telemetry_link::{ConnectionState, Error, LinkClient, LinkConfig, LinkEvent, OutputType};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

const WAIT: Duration = Duration::from_secs(5);

/// Behaviour of the fake robot process.
#[derive(Debug, Clone, Copy, Default)]
struct RobotScript {
    /// Close the first connection right after its first subscription.
    drop_first_connection: bool,
}

/// Requests seen by the fake robot, per connection.
#[derive(Debug, Default)]
struct RobotLog {
    connections: AtomicUsize,
    requests: Mutex<Vec<(usize, Value)>>,
}

impl RobotLog {
    fn requests_of(&self, connection: usize, kind: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(index, _)| *index == connection)
            .filter(|(_, request)| request["type"] == kind)
            .map(|(_, request)| request.clone())
            .collect()
    }
}

/// Starts a fake robot process and returns its websocket url.
async fn spawn_robot(script: RobotScript) -> (String, Arc<RobotLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let log = Arc::new(RobotLog::default());

    let server_log = Arc::clone(&log);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = server_log.connections.fetch_add(1, Ordering::SeqCst);
            let log = Arc::clone(&server_log);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let request: Value = serde_json::from_str(text.as_str()).unwrap();
                    log.requests.lock().push((index, request.clone()));

                    for reply in replies_to(&request) {
                        if ws.send(reply).await.is_err() {
                            return;
                        }
                    }
                    if script.drop_first_connection
                        && index == 0
                        && request["type"] == "SubscribeOutput"
                    {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            });
        }
    });

    (url, log)
}

fn replies_to(request: &Value) -> Vec<Message> {
    let id = request["id"].clone();
    let ok = |extra: Value| {
        let mut response = json!({"id": id, "ok": true});
        if let (Some(target), Some(fields)) = (response.as_object_mut(), extra.as_object()) {
            target.extend(fields.clone());
        }
        Message::text(response.to_string())
    };

    match request["type"].as_str().unwrap_or_default() {
        "GetOutputHierarchy" => vec![ok(json!({
            "output_hierarchy": {
                "ball": {"type": "Struct", "fields": {
                    "position": {"type": "Option", "nested": {"type": "Primary", "name": "Point2"}}
                }}
            }
        }))],
        "GetParameterHierarchy" => vec![ok(json!({
            "parameter_hierarchy": {
                "walk": {"type": "Struct", "fields": {"speed": {"type": "Primary", "name": "f32"}}}
            }
        }))],
        "SubscribeOutput" => {
            let cycler = request["cycler"].clone();
            let output = request["output"].clone();
            if output["type"] == "Image" {
                let mut frame = vec![0, 0, 0, 0];
                frame.extend_from_slice(&7u32.to_le_bytes());
                frame.extend_from_slice(b"png");
                let metadata = json!({
                    "type": "OutputsUpdated",
                    "cycler": cycler,
                    "outputs": [],
                    "image_id": 7
                });
                vec![
                    ok(json!({})),
                    Message::Binary(Bytes::from(frame)),
                    Message::text(metadata.to_string()),
                ]
            } else {
                vec![
                    ok(json!({})),
                    Message::text(
                        json!({
                            "type": "OutputsUpdated",
                            "cycler": cycler,
                            "outputs": [{"output": output, "data": {"x": 1.0, "y": 2.0}}]
                        })
                        .to_string(),
                    ),
                ]
            }
        }
        "UpdateParameter" if request["path"] != "walk.speed" => {
            vec![Message::text(
                json!({"id": id, "ok": false, "reason": "unknown parameter"}).to_string(),
            )]
        }
        _ => vec![ok(json!({}))],
    }
}

fn fast_config(url: &str) -> LinkConfig {
    LinkConfig::new()
        .with_url(url)
        .with_connect(true)
        .with_backoff(
            BackoffPolicy::new()
                .with_initial_delay(Duration::from_millis(20))
                .with_max_delay(Duration::from_millis(100)),
        )
        .with_connect_timeout(Duration::from_secs(2))
}

async fn wait_for_state(client: &LinkClient, wanted: ConnectionState) {
    let mut state = client.watch_state();
    timeout(WAIT, state.wait_for(|state| *state == wanted))
        .await
        .expect("timed out waiting for state")
        .expect("client stopped");
}

// ============================================================================
// Subscriptions
// ============================================================================

mod subscriptions {
    use super::*;

    #[tokio::test]
    async fn output_data_arrives() {
        let (url, log) = spawn_robot(RobotScript::default()).await;
        let client = LinkClient::spawn(fast_config(&url));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _ball = client
            .subscribe_output(
                "VisionTop",
                OutputType::Main,
                "ball.position",
                move |value| {
                    let _ = tx.send(value.clone());
                },
                |error| panic!("unexpected error {error}"),
            )
            .await
            .unwrap();

        let value = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(value, json!({"x": 1.0, "y": 2.0}));
        wait_for_state(&client, ConnectionState::Connected).await;

        let subscribes = log.requests_of(0, "SubscribeOutput");
        assert_eq!(subscribes.len(), 1);
        let expected = json!({"type": "Main", "path": "ball.position"});
        assert_eq!(subscribes[0]["output"], expected);

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn image_is_paired_with_metadata() {
        let (url, _log) = spawn_robot(RobotScript::default()).await;
        let client = LinkClient::spawn(fast_config(&url));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _top = client
            .subscribe_image(
                "VisionTop",
                move |blob| {
                    let _ = tx.send(blob.clone());
                },
                |_| {},
            )
            .await
            .unwrap();

        let blob = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(blob, Bytes::from_static(b"png"));

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn hierarchies_are_flattened() {
        let (url, _log) = spawn_robot(RobotScript::default()).await;
        let client = LinkClient::spawn(fast_config(&url));
        wait_for_state(&client, ConnectionState::Connected).await;

        let outputs = client.output_types().await.unwrap();
        assert_eq!(outputs["ball"], "GenericStruct");
        assert_eq!(outputs["ball.position"], "Option<Point2>");

        let parameters = client.parameter_types().await.unwrap();
        assert_eq!(parameters["walk.speed"], "f32");

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn resubscribes_after_connection_loss() {
        let script = RobotScript {
            drop_first_connection: true,
        };
        let (url, log) = spawn_robot(script).await;
        let client = LinkClient::spawn(fast_config(&url));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _ball = client
            .subscribe_output(
                "VisionTop",
                OutputType::Main,
                "ball.position",
                move |value| {
                    let _ = tx.send(value.clone());
                },
                |_| {},
            )
            .await
            .unwrap();

        // One update per connection.
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();

        assert!(log.connections.load(Ordering::SeqCst) >= 2);
        assert_eq!(log.requests_of(1, "SubscribeOutput").len(), 1);
        assert_eq!(log.requests_of(1, "GetOutputHierarchy").len(), 1);

        client.shutdown().await.unwrap();
    }
}

// ============================================================================
// Parameters
// ============================================================================

mod parameters {
    use super::*;

    #[tokio::test]
    async fn update_is_confirmed() {
        let (url, log) = spawn_robot(RobotScript::default()).await;
        let client = LinkClient::spawn(fast_config(&url));
        wait_for_state(&client, ConnectionState::Connected).await;

        client
            .update_parameter("walk.speed", json!(0.3))
            .await
            .unwrap();
        let updates = log.requests_of(0, "UpdateParameter");
        assert_eq!(updates[0]["data"], json!(0.3));

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_update_reports_reason() {
        let (url, _log) = spawn_robot(RobotScript::default()).await;
        let client = LinkClient::spawn(fast_config(&url));
        wait_for_state(&client, ConnectionState::Connected).await;

        let result = client.update_parameter("walk.sped", json!(0.3)).await;
        let Err(Error::Rejected { request, reason }) = result else {
            panic!("expected a rejection");
        };
        assert_eq!(request, "UpdateParameter");
        assert_eq!(reason, "unknown parameter");

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn update_while_disconnected_fails() {
        let client = LinkClient::spawn(LinkConfig::new());
        let result = client.update_parameter("walk.speed", json!(0.3)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        client.shutdown().await.unwrap();
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn state_events_are_broadcast() {
        let (url, _log) = spawn_robot(RobotScript::default()).await;
        let client = LinkClient::spawn(LinkConfig::new().with_url(&url));
        let mut events = client.subscribe_events();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.set_connect(true).await.unwrap();
        let mut seen = Vec::new();
        while !seen.contains(&ConnectionState::Connected) {
            let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
            if let LinkEvent::StateChanged(state) = event {
                seen.push(state);
            }
        }
        assert_eq!(
            seen,
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );

        client.set_connect(false).await.unwrap();
        wait_for_state(&client, ConnectionState::Disconnected).await;
        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_server_keeps_retrying() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = LinkClient::spawn(fast_config(&url));
        let mut events = client.subscribe_events();

        let mut failures = 0;
        while failures < 2 {
            let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
            if event.error().is_some() {
                failures += 1;
            }
        }
        assert_eq!(client.state(), ConnectionState::Connecting);
        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn commands_after_shutdown_fail() {
        let client = LinkClient::spawn(LinkConfig::new());
        client.shutdown().await.unwrap();

        let result = client.set_connect(true).await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
        let result = client.output_types().await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }
}
