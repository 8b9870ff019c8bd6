use serde_json::Value;
use tokio_tungstenite::tungstenite::{self, Message};

/// One frame as seen by the receive loop.
///
/// `Ping`, `Pong`, `Close` and `Error` are consumed by the connection
/// manager itself; only `Text` and `Binary` reach the frame handler.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<String>),
    Error(String),
}

impl InboundMessage {
    /// Classifies a read result. End of stream is reported as a close
    /// without reason; raw frames yield `None`.
    pub fn from_read(read: Option<Result<Message, tungstenite::Error>>) -> Option<Self> {
        match read {
            None => Some(Self::Close(None)),
            Some(Err(e)) => Some(Self::Error(e.to_string())),
            Some(Ok(message)) => Self::from_message(message),
        }
    }

    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            Message::Binary(data) => Some(Self::Binary(data.to_vec())),
            Message::Ping(data) => Some(Self::Ping(data.to_vec())),
            Message::Pong(data) => Some(Self::Pong(data.to_vec())),
            Message::Close(frame) => Some(Self::Close(
                frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str())),
            )),
            Message::Frame(_) => None,
        }
    }
}

/// Data handed to `send`: JSON goes out as a text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundPayload {
    pub fn into_message(self) -> Message {
        match self {
            Self::Json(value) => Message::Text(value.to_string().into()),
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(data) => Message::Binary(data.into()),
        }
    }
}

impl From<Value> for OutboundPayload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for OutboundPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for OutboundPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for OutboundPayload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}
