mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use common::{TestServer, TopicField, WAIT, assert_quiet, forward, recv, reserve_addr};
use zq_collector::config::WsConfig;
use zq_collector::error::ConnectionError;
use zq_collector::ws::{
    Callback, ConnectionManager, ConnectionState, FrameHandler, FrameWriter, InboundMessage,
    StreamClient, Topic,
};

fn client(url: &str) -> StreamClient {
    common::init();
    let config = WsConfig::new(url).with_reconnect_delay(Duration::from_millis(50));
    StreamClient::new(config, Arc::new(TopicField)).unwrap()
}

async fn wait_for_state(client: &StreamClient, want: ConnectionState) {
    let mut states = client.connection().watch_state();
    timeout(WAIT, states.wait_for(|s| *s == want))
        .await
        .expect("state not reached in time")
        .unwrap();
}

async fn reject(_: serde_json::Value) -> anyhow::Result<()> {
    anyhow::bail!("subscriber rejected message")
}

#[tokio::test]
async fn subscribe_sends_one_frame_per_topic_and_fans_out() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.subscribe(Topic::new("a"), forward("a1", tx.clone())).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let (conn, frame) = server.next_text().await;
    assert_eq!(conn, 0);
    assert_eq!(frame["op"], "sub");
    assert_eq!(frame["topic"], "a");

    // second subscriber of a known topic sends nothing
    client.subscribe(Topic::new("a"), forward("a2", tx.clone())).await.unwrap();
    client.subscribe(Topic::new("b"), forward("b", tx.clone())).await.unwrap();

    let (_, frame) = server.next_text().await;
    assert_eq!(frame["topic"], "b");

    server.push_json(0, json!({"topic": "a", "v": 1})).await;
    let (first, msg) = recv(&mut rx).await;
    assert_eq!((first, msg["v"].clone()), ("a1", json!(1)));
    let (second, _) = recv(&mut rx).await;
    assert_eq!(second, "a2");
    assert_quiet(&mut rx).await;

    server.push_json(0, json!({"topic": "b", "v": 2})).await;
    assert_eq!(recv(&mut rx).await.0, "b");
    assert_quiet(&mut rx).await;

    client.close().await;
}

#[tokio::test]
async fn messages_of_one_topic_arrive_in_order() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.subscribe(Topic::new("seq"), forward("seq", tx)).await.unwrap();
    server.next_text().await;

    for i in 0..20 {
        server.push_json(0, json!({"topic": "seq", "n": i})).await;
    }

    for i in 0..20 {
        let (_, msg) = recv(&mut rx).await;
        assert_eq!(msg["n"], i);
    }

    client.close().await;
}

#[tokio::test]
async fn reconnect_resubscribes_every_topic() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.subscribe(Topic::new("b"), forward("b", tx.clone())).await.unwrap();
    client.subscribe(Topic::new("a"), forward("a", tx.clone())).await.unwrap();
    server.next_text().await;
    server.next_text().await;

    server.drop_connection(0).await;

    let first = server.next_text_from(1).await;
    let second = server.next_text_from(1).await;
    assert_eq!(first["topic"], "a");
    assert_eq!(second["topic"], "b");

    wait_for_state(&client, ConnectionState::Connected).await;
    assert!(client.connection().connect_attempts() >= 2);

    server.push_json(1, json!({"topic": "a"})).await;
    assert_eq!(recv(&mut rx).await.0, "a");

    client.close().await;
}

#[tokio::test]
async fn peer_close_frame_triggers_resubscribe() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.subscribe(Topic::new("a"), forward("a", tx)).await.unwrap();
    server.next_text().await;

    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "maintenance".into(),
    };
    server.push(0, Message::Close(Some(frame))).await;

    let resubscribe = server.next_text_from(1).await;
    assert_eq!(resubscribe["op"], "sub");
    assert_eq!(resubscribe["topic"], "a");

    wait_for_state(&client, ConnectionState::Connected).await;
    server.push_json(1, json!({"topic": "a", "n": 1})).await;
    assert_eq!(recv(&mut rx).await.1["n"], 1);

    client.close().await;
}

#[tokio::test]
async fn pending_subscription_survives_repeated_failed_connects() {
    let addr = reserve_addr().await;
    let client = client(&format!("ws://{addr}"));
    let (tx, mut rx) = mpsc::unbounded_channel();

    // nothing listens yet; the subscription is kept for later
    client.subscribe(Topic::new("a"), forward("a", tx)).await.unwrap();
    assert_ne!(client.state(), ConnectionState::Connected);

    timeout(WAIT, async {
        while client.connection().connect_attempts() < 3 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("lifecycle stopped retrying");

    let mut server = TestServer::start_at(&addr).await;
    let (conn, frame) = server.next_text().await;
    assert_eq!(conn, 0);
    assert_eq!(frame["op"], "sub");
    assert_eq!(frame["topic"], "a");

    wait_for_state(&client, ConnectionState::Connected).await;
    server.push_json(0, json!({"topic": "a", "n": 7})).await;
    assert_eq!(recv(&mut rx).await.1["n"], 7);

    client.close().await;
}

#[tokio::test]
async fn concurrent_subscribes_during_reconnect_send_each_topic_once() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, _rx) = mpsc::unbounded_channel();

    client.subscribe(Topic::new("warm"), forward("warm", tx.clone())).await.unwrap();
    server.next_text().await;
    server.drop_connection(0).await;

    let topics: Vec<String> = (0..16).map(|i| format!("t{i}")).collect();
    let results = join_all(
        topics
            .iter()
            .map(|t| client.subscribe(Topic::new(t.as_str()), forward("t", tx.clone()))),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let mut sent: HashMap<String, usize> = HashMap::new();
    for _ in 0..=topics.len() {
        let frame = server.next_text_from(1).await;
        let topic = frame["topic"].as_str().unwrap().to_string();
        *sent.entry(topic).or_default() += 1;
    }
    assert!(server.no_text_within(Duration::from_millis(300)).await);

    assert_eq!(sent.len(), topics.len() + 1);
    assert!(sent.values().all(|&n| n == 1), "duplicate subscribe frames: {sent:?}");

    client.close().await;
}

#[tokio::test]
async fn ping_is_answered_and_not_dispatched() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.subscribe(Topic::new("a"), forward("a", tx)).await.unwrap();
    server.next_text().await;

    server.push(0, Message::Ping(b"hb".to_vec().into())).await;

    let (conn, payload) = server.next_pong().await;
    assert_eq!(conn, 0);
    assert_eq!(payload, b"hb".to_vec());
    assert_quiet(&mut rx).await;

    client.close().await;
}

#[tokio::test]
async fn failing_callback_does_not_break_the_stream() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.subscribe(Topic::new("a"), Callback::new(reject)).await.unwrap();
    client.subscribe(Topic::new("a"), forward("ok", tx)).await.unwrap();
    server.next_text().await;

    server.push_json(0, json!({"topic": "a", "n": 1})).await;
    assert_eq!(recv(&mut rx).await.1["n"], 1);

    server.push_json(0, json!({"topic": "a", "n": 2})).await;
    assert_eq!(recv(&mut rx).await.1["n"], 2);

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(server.connections(), 1);

    client.close().await;
}

#[tokio::test]
async fn unsubscribe_of_last_callback_sends_frame() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first = forward("1", tx.clone());
    let second = forward("2", tx);
    client.subscribe(Topic::new("a"), first.clone()).await.unwrap();
    client.subscribe(Topic::new("a"), second.clone()).await.unwrap();
    server.next_text().await;

    client.unsubscribe(&Topic::new("a"), &first).await.unwrap();
    server.push_json(0, json!({"topic": "a"})).await;
    assert_eq!(recv(&mut rx).await.0, "2");
    assert_quiet(&mut rx).await;

    client.unsubscribe(&Topic::new("a"), &second).await.unwrap();
    let (_, frame) = server.next_text().await;
    assert_eq!(frame["op"], "unsub");
    assert_eq!(frame["topic"], "a");
    assert!(client.registry().is_empty().await);

    client.close().await;
}

#[tokio::test]
async fn close_stops_reconnection() {
    let mut server = TestServer::start().await;
    let client = client(&server.url);

    client.subscribe(Topic::new("a"), forward("a", mpsc::unbounded_channel().0)).await.unwrap();
    server.next_text().await;

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);

    let err = client
        .subscribe(Topic::new("b"), forward("b", mpsc::unbounded_channel().0))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Closed));
}

// ------------------------------------------------------------
// ConnectionManager used directly
// ------------------------------------------------------------

#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

#[async_trait]
impl FrameHandler for Journal {
    async fn on_connected(&self, _: &FrameWriter) -> Result<(), ConnectionError> {
        // widen the window in which a racing message could overtake us
        sleep(Duration::from_millis(50)).await;
        self.entries.lock().unwrap().push("connected".into());
        Ok(())
    }

    async fn on_message(&self, message: InboundMessage) {
        if let InboundMessage::Text(text) = message {
            self.entries.lock().unwrap().push(text);
        }
    }
}

#[tokio::test]
async fn resubscribe_hook_runs_before_first_message() {
    common::init();
    let server = TestServer::start_with_greeting(Some(Message::text("hello"))).await;
    let journal = Arc::new(Journal::default());
    let manager = ConnectionManager::new(WsConfig::new(&server.url), journal.clone()).unwrap();

    manager.connect().await.unwrap();

    timeout(WAIT, async {
        while journal.entries.lock().unwrap().len() < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*journal.entries.lock().unwrap(), vec!["connected", "hello"]);
    manager.close().await;
}

#[tokio::test]
async fn send_while_disconnected_attempts_one_connect() {
    common::init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let config = WsConfig::new(url).with_reconnect_delay(Duration::from_secs(60));
    let manager = ConnectionManager::new(config, Arc::new(Journal::default())).unwrap();

    let err = manager.send(json!({"op": "ping"})).await.unwrap_err();
    assert!(matches!(err, ConnectionError::SendWhileDisconnected { .. }));
    assert_eq!(manager.connect_attempts(), 1);

    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn send_during_reconnect_delay_connects_immediately() {
    common::init();
    let addr = reserve_addr().await;
    let config = WsConfig::new(format!("ws://{addr}")).with_reconnect_delay(Duration::from_secs(30));
    let manager = ConnectionManager::new(config, Arc::new(Journal::default())).unwrap();

    let err = manager.send(json!({"op": "ping", "n": 1})).await.unwrap_err();
    assert!(matches!(err, ConnectionError::SendWhileDisconnected { .. }));
    assert_eq!(manager.state(), ConnectionState::Reconnecting);

    let mut server = TestServer::start_at(&addr).await;

    timeout(Duration::from_secs(3), manager.send(json!({"op": "ping", "n": 2})))
        .await
        .expect("send waited out the reconnect delay")
        .unwrap();
    assert_eq!(manager.connect_attempts(), 2);

    let (_, frame) = server.next_text().await;
    assert_eq!(frame["n"], 2);

    manager.close().await;
}
