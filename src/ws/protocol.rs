use serde_json::Value;

use super::subscription::Topic;

/// Exchange-specific framing for a subscription stream.
///
/// Implementations translate topics into control frames and find the
/// topic of an inbound message. They must not perform I/O or panic on
/// unexpected payloads.
pub trait Protocol: Send + Sync + 'static {
    /// Frame asking the server to start streaming `topic`.
    fn subscribe_frame(&self, topic: &Topic, request_id: u64) -> Value;

    /// Frame asking the server to stop streaming `topic`.
    fn unsubscribe_frame(&self, topic: &Topic, request_id: u64) -> Value;

    /// Topic an inbound message belongs to.
    ///
    /// `None` for acknowledgements, heartbeats and anything else that
    /// should not reach subscribers.
    fn topic_of(&self, message: &Value) -> Option<Topic>;

    /// Decodes a binary frame. Binary frames are ignored unless an
    /// exchange overrides this (e.g. compressed payloads).
    fn decode_binary(&self, _payload: &[u8]) -> Option<Value> {
        None
    }
}
