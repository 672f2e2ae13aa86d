//! Client and server together: routing of relayed envelopes and broadcasts.

mod harness;

use std::time::Duration;

use harness::{TestPeer, TestServer, init_tracing, within};
use serde_json::json;
use tokio::sync::mpsc;
use wskit::{Client, ClientState};

/// Route `action` on `client` into a channel of raw `data` bytes.
fn capture(client: &Client, action: &str) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.register_route(action, move |data| {
        let _ = tx.send(data.to_vec());
    });
    rx
}

#[tokio::test]
async fn test_sms_code_routed_to_other_client() {
    init_tracing();
    let server = TestServer::spawn().await;

    let receiver = Client::connect(server.url()).await.unwrap();
    let mut sms = capture(&receiver, "sms_code");
    let sender = Client::connect(server.url()).await.unwrap();
    server.wait_for_peers(2).await;

    sender
        .send_message(r#"{"action":"sms_code","data":{"phone":"13800000000","code":"4821"}}"#)
        .await
        .unwrap();

    let data = within("sms_code", sms.recv()).await.unwrap();
    assert_eq!(data, br#"{"phone":"13800000000","code":"4821"}"#.to_vec());

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_server_broadcast_reaches_two_clients() {
    init_tracing();
    let server = TestServer::spawn().await;

    let first = Client::connect(server.url()).await.unwrap();
    let second = Client::connect(server.url()).await.unwrap();
    let mut first_rx = capture(&first, "voice_code");
    let mut second_rx = capture(&second, "voice_code");
    server.wait_for_peers(2).await;

    server
        .server
        .send_message(r#"{"action":"voice_code","data":"1234"}"#)
        .unwrap();

    assert_eq!(within("first", first_rx.recv()).await.unwrap(), br#""1234""#);
    assert_eq!(within("second", second_rx.recv()).await.unwrap(), br#""1234""#);

    first.close().await.unwrap();
    second.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_unrouted_and_malformed_messages_are_dropped() {
    init_tracing();
    let server = TestServer::spawn().await;

    let client = Client::connect(server.url()).await.unwrap();
    let mut sms = capture(&client, "sms_code");
    server.wait_for_peers(1).await;

    let relay = &server.server;
    relay.send_message(r#"{"action":"voice_code","data":1}"#).unwrap();
    relay.send_message("this is not json").unwrap();
    relay.send_binary(vec![0xff, 0x00]).unwrap();
    relay.send_message(r#"{"action":"sms_code","data":2}"#).unwrap();

    // The queue is FIFO, so the only routed message arrives last.
    assert_eq!(within("sms_code", sms.recv()).await.unwrap(), b"2");
    assert!(sms.try_recv().is_err());
    assert_eq!(client.state(), ClientState::Connected);

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_envelope_helpers_between_clients() {
    init_tracing();
    let server = TestServer::spawn().await;

    let receiver = Client::connect(server.url()).await.unwrap();
    let mut inbound = receiver.subscribe();
    let mut sms = capture(&receiver, "sms_code");
    let sender = Client::connect(server.url()).await.unwrap();
    server.wait_for_peers(2).await;

    sender
        .send_envelope("sms_code", &json!({"phone": "13900000000"}))
        .await
        .unwrap();

    let data = within("sms_code", sms.recv()).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(value, json!({"phone": "13900000000"}));

    let raw = within("inbound", inbound.recv()).await.unwrap();
    assert!(raw.into_text().unwrap().contains("\"sms_code\""));

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_pings_are_not_relayed() {
    init_tracing();
    let server = TestServer::spawn().await;

    let config = wskit::ClientConfig::new().with_keepalive_interval(Duration::from_millis(10));
    let client = Client::with_config(server.url(), config).await.unwrap();
    let mut peer = TestPeer::connect(&server.url()).await.unwrap();
    server.wait_for_peers(2).await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    server.server.send_message("marker").unwrap();
    assert_eq!(peer.recv_text().await, "marker");

    client.close().await.unwrap();
    peer.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_other_paths_are_refused() {
    let server = TestServer::spawn().await;
    let url = format!("ws://{}/elsewhere", server.addr);
    assert!(matches!(
        Client::connect(url).await,
        Err(wskit::Error::Dial(_))
    ));
    server.shutdown().await;
}
