use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use log::{error, trace};
use serde_json::Value;

use crate::error::CallbackError;
use crate::metrics::{METRICS, RuntimeMetrics};

use super::subscription::{SubscriptionRegistry, Topic};

/// Outcome of delivering one message to a topic.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Callbacks that returned an error or panicked.
    pub failures: Vec<CallbackError>,
}

impl Delivery {
    pub fn invoked(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

/// Fans inbound messages out to the callbacks registered for a topic.
///
/// Callbacks run one after another so per-topic order is the transport
/// order. A failing callback is logged and skipped; it never stops
/// delivery to its siblings nor reaches the receive loop.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, topic: &Topic, message: Value) -> Delivery {
        let callbacks = self.registry.callbacks(topic).await;
        let mut delivery = Delivery::default();

        if callbacks.is_empty() {
            trace!("no subscribers for {topic}, message dropped");
            return delivery;
        }

        for callback in callbacks {
            let outcome = AssertUnwindSafe(async { callback.call(message.clone()).await })
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => {
                    delivery.delivered += 1;
                    continue;
                }
                Ok(Err(source)) => CallbackError::Failed {
                    topic: topic.to_string(),
                    source,
                },
                Err(_) => CallbackError::Panicked {
                    topic: topic.to_string(),
                },
            };

            RuntimeMetrics::incr(&METRICS.callback_errors);
            error!("{failure}");
            delivery.failures.push(failure);
        }

        RuntimeMetrics::incr(&METRICS.messages_dispatched);
        delivery
    }
}
