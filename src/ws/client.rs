use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::WsConfig;
use crate::error::ConnectionError;
use crate::metrics::{METRICS, RuntimeMetrics};

use super::connection::{ConnectionManager, ConnectionState, FrameHandler, FrameWriter};
use super::dispatcher::Dispatcher;
use super::message::{InboundMessage, OutboundPayload};
use super::protocol::Protocol;
use super::subscription::{Callback, Registration, Removal, SubscriptionRegistry, Topic};

/// Topics whose subscribe frame went out on the socket identified by
/// `generation`.
#[derive(Default)]
struct LiveTopics {
    generation: u64,
    topics: HashSet<Topic>,
}

impl LiveTopics {
    fn follow(&mut self, generation: u64) {
        if self.generation != generation {
            self.generation = generation;
            self.topics.clear();
        }
    }
}

/// Bridges the connection task to the registry: replays subscriptions
/// on connect and routes inbound frames to their topic.
struct Router {
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    protocol: Arc<dyn Protocol>,
    request_ids: AtomicU64,
    live: Mutex<LiveTopics>,
}

impl Router {
    fn next_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends the subscribe frame for `topic` unless the current socket
    /// already carries it. Returns whether a frame was written.
    async fn subscribe_once(
        &self,
        live: &mut LiveTopics,
        writer: &FrameWriter,
        topic: &Topic,
    ) -> Result<bool, ConnectionError> {
        live.follow(writer.generation());
        if !live.topics.insert(topic.clone()) {
            return Ok(false);
        }

        let frame = self.protocol.subscribe_frame(topic, self.next_id());
        if let Err(e) = writer.send(OutboundPayload::Json(frame)).await {
            live.topics.remove(topic);
            return Err(e);
        }
        RuntimeMetrics::incr(&METRICS.subscriptions_sent);
        Ok(true)
    }
}

#[async_trait]
impl FrameHandler for Router {
    async fn on_connected(&self, writer: &FrameWriter) -> Result<(), ConnectionError> {
        let mut live = self.live.lock().await;
        let mut sent = 0;
        for topic in self.registry.topics().await {
            if self.subscribe_once(&mut live, writer, &topic).await? {
                sent += 1;
            }
        }
        if sent > 0 {
            info!("resubscribed {sent} topics");
        }
        Ok(())
    }

    async fn on_message(&self, message: InboundMessage) {
        let value = match message {
            InboundMessage::Text(text) => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            InboundMessage::Binary(data) => match self.protocol.decode_binary(&data) {
                Some(value) => value,
                None => {
                    debug!("ignoring binary frame ({} bytes)", data.len());
                    return;
                }
            },
            _ => return,
        };

        match self.protocol.topic_of(&value) {
            Some(topic) => {
                self.dispatcher.dispatch(&topic, value).await;
            }
            None => debug!("control message: {value}"),
        }
    }
}

/// Subscription API over one WebSocket connection.
///
/// Topics and callbacks registered here survive reconnects; each
/// successful reconnect re-sends a subscribe frame per live topic before
/// any message is dispatched. A topic is subscribed at most once per
/// socket.
pub struct StreamClient {
    manager: ConnectionManager,
    router: Arc<Router>,
}

impl StreamClient {
    pub fn new(config: WsConfig, protocol: Arc<dyn Protocol>) -> Result<Self, ConnectionError> {
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = Arc::new(Router {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            protocol,
            request_ids: AtomicU64::new(1),
            live: Mutex::new(LiveTopics::default()),
        });

        Ok(Self {
            manager: ConnectionManager::new(config, router.clone())?,
            router,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.router.registry
    }

    /// Registers `callback` for `topic`.
    ///
    /// The first subscriber of a topic causes a subscribe frame: sent
    /// right away when connected, otherwise by the connect that this call
    /// starts. A failed connect is not an error here; the topic is
    /// subscribed after the next successful reconnect.
    pub async fn subscribe(&self, topic: Topic, callback: Callback) -> Result<(), ConnectionError> {
        if self.manager.state() == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }

        if self.router.registry.insert(topic.clone(), callback).await != Registration::NewTopic {
            return Ok(());
        }

        if self.manager.state() != ConnectionState::Connected {
            match self.manager.connect().await {
                Ok(()) => {}
                Err(ConnectionError::Closed) => return Err(ConnectionError::Closed),
                Err(e) => {
                    warn!("subscribe {topic} deferred to next reconnect: {e}");
                    return Ok(());
                }
            }
        }

        // usually already sent by the replay of the connect above
        let mut live = self.router.live.lock().await;
        if let Err(e) = self
            .router
            .subscribe_once(&mut live, self.manager.writer(), &topic)
            .await
        {
            warn!("subscribe {topic} deferred to next reconnect: {e}");
        }
        Ok(())
    }

    /// Removes one callback; the last one out sends an unsubscribe frame.
    pub async fn unsubscribe(&self, topic: &Topic, callback: &Callback) -> Result<(), ConnectionError> {
        if self.router.registry.remove(topic, callback).await == Removal::TopicRemoved {
            self.send_unsubscribe(topic).await?;
        }
        Ok(())
    }

    /// Removes every callback of `topic`.
    pub async fn unsubscribe_topic(&self, topic: &Topic) -> Result<(), ConnectionError> {
        if self.router.registry.remove_topic(topic).await {
            self.send_unsubscribe(topic).await?;
        }
        Ok(())
    }

    async fn send_unsubscribe(&self, topic: &Topic) -> Result<(), ConnectionError> {
        let was_live = self.router.live.lock().await.topics.remove(topic);
        // a disconnected socket has no server-side subscription to cancel
        if !was_live || self.manager.state() != ConnectionState::Connected {
            return Ok(());
        }
        let frame = self.router.protocol.unsubscribe_frame(topic, self.router.next_id());
        self.manager.send(frame).await
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }
}
