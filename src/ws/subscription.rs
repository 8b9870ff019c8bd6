//! Topic → callback registry.
//!
//! Registrations are declarative per-connection state: the registry
//! outlives every socket and is replayed as subscribe frames after each
//! reconnect.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;

/// Dispatch key of a subscription stream, e.g. `btcusdt@trade`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(topic: &str) -> Self {
        Self::new(topic)
    }
}

impl From<String> for Topic {
    fn from(topic: String) -> Self {
        Self(topic)
    }
}

type CallbackFn = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Handle to an async subscriber callback.
///
/// Equality is identity: clones of one handle are the same callback,
/// two handles built from identical closures are not.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |message| f(message).boxed()))
    }

    pub fn call(&self, message: Value) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.0)(message)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Callback {}

impl Hash for Callback {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", self.addr())
    }
}

/// Result of adding a callback to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First subscriber of the topic: a subscribe frame is needed.
    NewTopic,
    /// Topic already live, callback added to its set.
    Added,
    /// Callback was already registered for the topic.
    Duplicate,
}

/// Result of removing a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Last subscriber gone: an unsubscribe frame is needed.
    TopicRemoved,
    Removed,
    NotFound,
}

/// Maps each topic to its set of callbacks, in registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<Topic, Vec<Callback>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, topic: Topic, callback: Callback) -> Registration {
        let mut topics = self.topics.write().await;
        match topics.get_mut(&topic) {
            Some(callbacks) if callbacks.contains(&callback) => Registration::Duplicate,
            Some(callbacks) => {
                callbacks.push(callback);
                Registration::Added
            }
            None => {
                topics.insert(topic, vec![callback]);
                Registration::NewTopic
            }
        }
    }

    pub async fn remove(&self, topic: &Topic, callback: &Callback) -> Removal {
        let mut topics = self.topics.write().await;
        let Some(callbacks) = topics.get_mut(topic) else {
            return Removal::NotFound;
        };
        let before = callbacks.len();
        callbacks.retain(|cb| cb != callback);
        if callbacks.len() == before {
            return Removal::NotFound;
        }
        if callbacks.is_empty() {
            topics.remove(topic);
            return Removal::TopicRemoved;
        }
        Removal::Removed
    }

    /// Drops every callback of `topic`. Returns whether it existed.
    pub async fn remove_topic(&self, topic: &Topic) -> bool {
        self.topics.write().await.remove(topic).is_some()
    }

    /// Snapshot of the callbacks for `topic`; dispatch iterates this
    /// copy so subscribe/unsubscribe never wait on a slow callback.
    pub async fn callbacks(&self, topic: &Topic) -> Vec<Callback> {
        self.topics
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// All live topics, sorted for a stable resubscribe order.
    pub async fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.topics.read().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.read().await.get(topic).map_or(0, Vec::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.topics.read().await.is_empty()
    }
}
