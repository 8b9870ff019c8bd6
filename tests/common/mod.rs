#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use zq_collector::ws::{Callback, Protocol, Topic};

pub const WAIT: Duration = Duration::from_secs(5);

/// Installs the TLS provider and test logging. Safe to call repeatedly.
pub fn init() {
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );
    let _ = env_logger::builder().is_test(true).try_init();
}

// ------------------------------------------------------------
// Local WebSocket server
// ------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub enum ServerEvent {
    Accepted(usize),
    Text(usize, String),
    Pong(usize, Vec<u8>),
}

enum Command {
    Push(Message),
    Drop,
}

/// Accepts any number of connections, reports what clients send and
/// lets a test push frames or sever a connection.
pub struct TestServer {
    pub url: String,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    conns: Arc<Mutex<Vec<mpsc::UnboundedSender<Command>>>>,
    accepted: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_greeting(None).await
    }

    /// Listens on a fixed `host:port`, e.g. one from `reserve_addr`.
    pub async fn start_at(addr: &str) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, None)
    }

    /// Every accepted connection is immediately sent `greeting`.
    pub async fn start_with_greeting(greeting: Option<Message>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, greeting)
    }

    fn serve(listener: TcpListener, greeting: Option<Message>) -> Self {
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (event_tx, events) = mpsc::unbounded_channel();
        let conns: Arc<Mutex<Vec<mpsc::UnboundedSender<Command>>>> = Arc::default();
        let accepted = Arc::new(AtomicUsize::new(0));

        let conns_task = conns.clone();
        let accepted_task = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };

                let id = accepted_task.fetch_add(1, Ordering::SeqCst);
                let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
                conns_task.lock().await.push(cmd_tx);
                let _ = event_tx.send(ServerEvent::Accepted(id));

                let events = event_tx.clone();
                let greeting = greeting.clone();
                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();

                    if let Some(msg) = greeting {
                        if write.send(msg).await.is_err() {
                            return;
                        }
                    }

                    loop {
                        tokio::select! {
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = events.send(ServerEvent::Text(id, text.to_string()));
                                }
                                Some(Ok(Message::Pong(data))) => {
                                    let _ = events.send(ServerEvent::Pong(id, data.to_vec()));
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            cmd = cmd_rx.recv() => match cmd {
                                Some(Command::Push(msg)) => {
                                    if write.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                // dropping both halves resets the socket without a close frame
                                Some(Command::Drop) | None => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            url,
            events,
            conns,
            accepted,
        }
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        timeout(WAIT, self.events.recv()).await.ok().flatten()
    }

    /// Next text frame from any connection, parsed as JSON.
    pub async fn next_text(&mut self) -> (usize, Value) {
        loop {
            match self.next_event().await {
                Some(ServerEvent::Text(conn, text)) => {
                    return (conn, serde_json::from_str(&text).unwrap());
                }
                Some(_) => continue,
                None => panic!("no text frame within {WAIT:?}"),
            }
        }
    }

    /// Next text frame sent on connection `conn`; frames from other
    /// connections are skipped.
    pub async fn next_text_from(&mut self, conn: usize) -> Value {
        loop {
            let (from, value) = self.next_text().await;
            if from == conn {
                return value;
            }
        }
    }

    /// True when no text frame arrives within `window`.
    pub async fn no_text_within(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(ServerEvent::Text(..))) => return false,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return true,
            }
        }
    }

    /// Next pong from any connection.
    pub async fn next_pong(&mut self) -> (usize, Vec<u8>) {
        loop {
            match self.next_event().await {
                Some(ServerEvent::Pong(conn, data)) => return (conn, data),
                Some(_) => continue,
                None => panic!("no pong within {WAIT:?}"),
            }
        }
    }

    pub async fn push(&self, conn: usize, msg: Message) {
        let conns = self.conns.lock().await;
        conns[conn].send(Command::Push(msg)).unwrap();
    }

    pub async fn push_json(&self, conn: usize, value: Value) {
        self.push(conn, Message::text(value.to_string())).await;
    }

    pub async fn drop_connection(&self, conn: usize) {
        let conns = self.conns.lock().await;
        let _ = conns[conn].send(Command::Drop);
    }
}

/// A local address with nothing listening on it.
pub async fn reserve_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

// ------------------------------------------------------------
// Minimal framing used against the test server
// ------------------------------------------------------------
//
// subscribe:   {"op":"sub","topic":..,"id":..}
// unsubscribe: {"op":"unsub","topic":..,"id":..}
// data:        {"topic":..,...}
//
pub struct TopicField;

impl Protocol for TopicField {
    fn subscribe_frame(&self, topic: &Topic, request_id: u64) -> Value {
        json!({"op": "sub", "topic": topic.as_str(), "id": request_id})
    }

    fn unsubscribe_frame(&self, topic: &Topic, request_id: u64) -> Value {
        json!({"op": "unsub", "topic": topic.as_str(), "id": request_id})
    }

    fn topic_of(&self, message: &Value) -> Option<Topic> {
        message.get("topic")?.as_str().map(Topic::new)
    }
}

/// Callback forwarding `(tag, message)` into a channel.
pub fn forward(tag: &'static str, tx: mpsc::UnboundedSender<(&'static str, Value)>) -> Callback {
    Callback::new(move |msg| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((tag, msg));
            anyhow::Ok(())
        }
    })
}

pub async fn recv(rx: &mut mpsc::UnboundedReceiver<(&'static str, Value)>) -> (&'static str, Value) {
    timeout(WAIT, rx.recv())
        .await
        .expect("callback not invoked in time")
        .expect("callback channel closed")
}

/// Asserts nothing arrives on `rx` for a short while.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<(&'static str, Value)>) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err(), "unexpected callback invocation");
}
