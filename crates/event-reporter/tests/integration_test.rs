// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use event_reporter::{
    encode::{decode, ContentType},
    transport::{AUTH_HEADER, ERROR_HEADER, USER_AGENT},
    Client, ClientOptions, Error, Packet, Tags, TransportError,
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

const STORE_PATH: &str = "/api/42/store/";
const AUTH: &str = "Sentry sentry_version=4, sentry_key=public, sentry_secret=secret";

fn client_for(server: &ServerGuard) -> Client {
    Client::new(ClientOptions {
        dsn: Some(format!(
            "http://public:secret@{}/42",
            server.host_with_port()
        )),
        release: Some("1.2.3".to_string()),
        ..Default::default()
    })
    .expect("valid options")
}

#[tokio::test]
async fn small_event_is_posted_as_json() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", STORE_PATH)
        .match_header(AUTH_HEADER, AUTH)
        .match_header("Content-Type", "application/json")
        .match_header("User-Agent", USER_AGENT)
        .match_body(Matcher::PartialJson(json!({
            "message": "disk full",
            "project": "42",
            "release": "1.2.3",
            "level": "error",
            "platform": "rust",
            "tags": [["region", "eu"]],
            "logentry": {"message": "disk full"},
        })))
        .with_status(200)
        .create_async()
        .await;

    let client = client_for(&server);
    let handle = client.capture_message("disk full", [("region", "eu")], vec![]);
    assert!(handle.event_id().is_some());
    handle.result().await.expect("event delivered");

    mock.assert_async().await;
}

#[tokio::test]
async fn large_event_is_compressed() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", STORE_PATH)
        .match_header("Content-Type", "application/octet-stream")
        .with_status(200)
        .create_async()
        .await;

    let client = client_for(&server);
    let message = "x".repeat(4_096);
    let handle = client.capture(Packet::new(message.clone(), vec![]), Tags::default());
    handle.result().await.expect("event delivered");
    mock.assert_async().await;

    let mut packet = Packet::new(message.clone(), vec![]);
    packet.init("42").expect("init");
    let encoded = event_reporter::encode::encode(&packet).expect("encode");
    assert_eq!(encoded.content_type, ContentType::OctetStream);
    let decoded = decode(&encoded.body, encoded.content_type).expect("decode");
    assert_eq!(decoded.message, message);
}

#[tokio::test]
async fn rejected_event_reports_server_detail() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", STORE_PATH)
        .with_status(500)
        .with_header(ERROR_HEADER, "project disabled")
        .create_async()
        .await;

    let client = client_for(&server);
    let handle = client.capture_message("boom", Tags::default(), vec![]);
    let err = handle.result().await.expect_err("server rejects event");

    match err {
        Error::Transport(TransportError::Status { status, detail }) => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(detail, "project disabled");
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn events_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", STORE_PATH)
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let client = client_for(&server);
    let handles: Vec<_> = (0..3)
        .map(|i| client.capture_message(&format!("event {i}"), Tags::default(), vec![]))
        .collect();
    for handle in handles {
        assert!(handle.result().await.is_err());
    }
    mock.assert_async().await;
}

#[test]
fn blocking_wait_drains_queue() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", STORE_PATH)
        .with_status(200)
        .expect(10)
        .create();

    let client = client_for(&server);
    for i in 0..10 {
        let _ = client.capture_message(&format!("event {i}"), Tags::default(), vec![]);
    }
    client.wait();
    assert_eq!(client.pending_count(), 0);
    mock.assert();
}
