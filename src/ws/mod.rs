//! WebSocket side of the client layer.
//!
//! - `message`:      inbound frame classification, outbound payloads
//! - `connection`:   lifecycle / reconnection state machine
//! - `subscription`: topic → callback registry
//! - `dispatcher`:   per-topic fan-out with callback isolation
//! - `protocol`:     exchange-supplied framing and topic derivation
//! - `client`:       subscribe/unsubscribe API tying it all together

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod protocol;
pub mod subscription;

pub use client::StreamClient;
pub use connection::{ConnectionManager, ConnectionState, FrameHandler, FrameWriter};
pub use dispatcher::{Delivery, Dispatcher};
pub use message::{InboundMessage, OutboundPayload};
pub use protocol::Protocol;
pub use subscription::{Callback, Registration, Removal, SubscriptionRegistry, Topic};
