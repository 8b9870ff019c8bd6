//! WebSocket connection lifecycle.
//!
//! One `ConnectionManager` owns at most one socket at a time and drives
//! it through
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting ...
//!                       \______________________/
//!        any state --close()--> Closed (terminal)
//! ```
//!
//! The lifecycle runs in a single spawned task bound to a cancellation
//! token. Errors while connecting or receiving never end the task; they
//! move it to `Reconnecting`, wait a fixed delay and try again. A
//! `connect()` or `send()` issued during that delay cuts it short. Only
//! `close()` (or dropping the manager) stops it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::config::WsConfig;
use crate::error::ConnectionError;
use crate::metrics::{METRICS, RuntimeMetrics};

use super::message::{InboundMessage, OutboundPayload};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Receives lifecycle events from the connection task.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Runs after every successful (re)connect, before the first frame
    /// is read. An error drops the socket and schedules a reconnect.
    async fn on_connected(&self, writer: &FrameWriter) -> Result<(), ConnectionError>;

    /// Text and binary frames, in transport order.
    async fn on_message(&self, message: InboundMessage);
}

/// Write half of the current socket, shared by the lifecycle task and
/// callers of `send`.
#[derive(Clone, Default)]
pub struct FrameWriter {
    sink: Arc<Mutex<Option<WsSink>>>,
    generation: Arc<AtomicU64>,
}

impl FrameWriter {
    /// Identifies the installed socket; bumped on every new connection.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn send(&self, payload: OutboundPayload) -> Result<(), ConnectionError> {
        self.send_message(payload.into_message()).await
    }

    async fn send_message(&self, message: Message) -> Result<(), ConnectionError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(ConnectionError::NotConnected)?;
        sink.send(message)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn install(&self, sink: WsSink) {
        let mut slot = self.sink.lock().await;
        *slot = Some(sink);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn discard(&self) {
        self.sink.lock().await.take();
    }

    /// Sends a close frame (best effort) and drops the socket.
    async fn shutdown(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = timeout(CLOSE_FRAME_TIMEOUT, sink.close()).await {
                debug!("close frame not flushed: {e}");
            }
        }
    }
}

enum Served {
    Shutdown,
    Lost(String),
}

struct Inner {
    config: WsConfig,
    handler: Arc<dyn FrameHandler>,
    state: watch::Sender<ConnectionState>,
    writer: FrameWriter,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    attempts: AtomicU64,
    wake: Notify,
}

impl Inner {
    fn url(&self) -> &str {
        &self.config.host
    }

    /// Moves to `next` unless the manager is already closed.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            debug!("{}: {:?} -> {:?}", self.config.host, *state, next);
            *state = next;
            true
        });
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let established = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok(stream) => {
                    RuntimeMetrics::incr(&METRICS.ws_connects);
                    match self.serve(stream).await {
                        Served::Shutdown => break,
                        Served::Lost(reason) => warn!("{}: connection lost: {}", self.url(), reason),
                    }
                }
                Err(e) => error!("{e}"),
            }

            // registered before the state flips so a connect() that sees
            // Reconnecting always finds a waiter
            let wake = self.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();

            self.set_state(ConnectionState::Reconnecting);
            RuntimeMetrics::incr(&METRICS.ws_reconnects);
            info!(
                "{}: reconnecting in {:?}",
                self.url(),
                self.config.reconnect_delay()
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.config.reconnect_delay()) => {}
                _ = &mut wake => debug!("{}: reconnect requested", self.url()),
            }
        }

        self.writer.shutdown().await;
        debug!("{}: lifecycle task stopped", self.url());
    }

    async fn establish(&self) -> Result<WsStream, ConnectionError> {
        let after = self.config.connect_timeout();
        let (stream, _) = timeout(after, connect_async(self.url()))
            .await
            .map_err(|_| ConnectionError::Timeout {
                url: self.url().to_string(),
                after,
            })?
            .map_err(|e| ConnectionError::Connect {
                url: self.url().to_string(),
                reason: e.to_string(),
            })?;
        Ok(stream)
    }

    async fn serve(&self, stream: WsStream) -> Served {
        let (sink, mut read) = stream.split();
        self.writer.install(sink).await;

        // the writer already accepts frames; Connected is only announced
        // once the handler has replayed its state
        let resubscribed = tokio::select! {
            _ = self.shutdown.cancelled() => return Served::Shutdown,
            result = self.handler.on_connected(&self.writer) => result,
        };
        if let Err(e) = resubscribed {
            self.writer.discard().await;
            return Served::Lost(format!("connected callback failed: {e}"));
        }

        self.set_state(ConnectionState::Connected);
        info!("{}: connected", self.url());

        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => return Served::Shutdown,
                read = read.next() => read,
            };

            let Some(message) = InboundMessage::from_read(read) else {
                continue;
            };

            match message {
                InboundMessage::Ping(payload) => {
                    trace!("{}: ping ({} bytes)", self.url(), payload.len());
                    if let Err(e) = self.writer.send_message(Message::Pong(payload.into())).await {
                        self.writer.discard().await;
                        return Served::Lost(format!("pong failed: {e}"));
                    }
                }
                InboundMessage::Pong(_) => trace!("{}: pong", self.url()),
                InboundMessage::Close(reason) => {
                    self.writer.discard().await;
                    return Served::Lost(format!(
                        "closed by peer ({})",
                        reason.as_deref().unwrap_or("no reason")
                    ));
                }
                InboundMessage::Error(cause) => {
                    self.writer.discard().await;
                    return Served::Lost(cause);
                }
                message => {
                    RuntimeMetrics::incr(&METRICS.frames_received);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Served::Shutdown,
                        _ = self.handler.on_message(message) => {}
                    }
                }
            }
        }
    }
}

/// Owns one WebSocket endpoint and keeps it connected until closed.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Fails fast on an unusable configuration; does not connect.
    pub fn new(config: WsConfig, handler: Arc<dyn FrameHandler>) -> Result<Self, ConnectionError> {
        config
            .validate()
            .map_err(|e| ConnectionError::Config(e.to_string()))?;

        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state,
                writer: FrameWriter::default(),
                shutdown: CancellationToken::new(),
                task: Mutex::new(None),
                attempts: AtomicU64::new(0),
                wake: Notify::new(),
            }),
        })
    }

    pub fn url(&self) -> &str {
        self.inner.url()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch handle for state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of connect attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn writer(&self) -> &FrameWriter {
        &self.inner.writer
    }

    /// Starts the lifecycle if needed and waits for the outcome of the
    /// next connect attempt. While a reconnect delay is pending the
    /// attempt is made immediately.
    ///
    /// A failed attempt is reported here, but the lifecycle keeps
    /// retrying in the background.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut rx = self.inner.state.subscribe();
        let seen = *rx.borrow_and_update();
        match seen {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            _ => {}
        }

        self.ensure_running().await;
        if seen == ConnectionState::Reconnecting {
            self.inner.wake.notify_waiters();
        }

        loop {
            if rx.changed().await.is_err() {
                return Err(ConnectionError::Closed);
            }
            // a fresh Reconnecting means an attempt ended in failure
            match *rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(ConnectionError::Closed),
                ConnectionState::Reconnecting => {
                    return Err(ConnectionError::Connect {
                        url: self.url().to_string(),
                        reason: "connect attempt failed".into(),
                    });
                }
                ConnectionState::Disconnected | ConnectionState::Connecting => {}
            }
        }
    }

    async fn ensure_running(&self) {
        let mut task = self.inner.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(inner.run()));
    }

    /// Transmits `payload`, connecting first if needed.
    ///
    /// If the socket is down and the connect attempt this triggers fails,
    /// nothing is written and `SendWhileDisconnected` is returned.
    pub async fn send(&self, payload: impl Into<OutboundPayload>) -> Result<(), ConnectionError> {
        let payload = payload.into();

        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            state => {
                warn!("{}: send while {:?}, connecting first", self.url(), state);
                self.connect().await.map_err(|e| match e {
                    ConnectionError::Closed => ConnectionError::Closed,
                    _ => ConnectionError::SendWhileDisconnected {
                        url: self.url().to_string(),
                    },
                })?;
            }
        }

        self.inner.writer.send(payload).await
    }

    /// Stops the lifecycle: cancels any pending receive or reconnect
    /// delay, closes the socket and waits for the task. Idempotent.
    pub async fn close(&self) {
        let previous = self.inner.state.send_replace(ConnectionState::Closed);
        self.inner.shutdown.cancel();
        if previous == ConnectionState::Closed {
            return;
        }

        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("{}: lifecycle task failed: {}", self.url(), e);
            }
        }

        self.inner.writer.shutdown().await;
        info!("{}: closed", self.url());
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
