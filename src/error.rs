//! Error types for the REST and WebSocket client layer.
//!
//! REST failures propagate to the direct caller once retries are
//! exhausted. WebSocket failures are handled inside the connection
//! manager (reconnect) and only surface from explicit calls such as
//! `send` or `connect`. Callback failures are logged at the dispatch
//! boundary and never propagated. Storage failures carry the file
//! they concern.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// A single failed REST attempt that may be retried.
#[derive(Error, Debug)]
pub enum TransientRequestError {
    /// Connection refused, reset, DNS failure, broken body stream, ...
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl TransientRequestError {
    /// Status code of the failure, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of a logical REST request that did not produce a value.
#[derive(Error, Debug)]
pub enum RequestError {
    /// Every attempt failed; carries the cause of the last one.
    #[error("request to {url} failed after {attempts} attempts: {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: TransientRequestError,
    },

    /// The server answered with a status the retry policy treats as fatal.
    #[error("request to {url} rejected: {source}")]
    Rejected {
        url: String,
        #[source]
        source: TransientRequestError,
    },

    /// The response body was not the expected JSON.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The executor was closed before (or between) attempts.
    #[error("request executor is closed")]
    Closed,

    /// Missing or invalid connection parameters.
    #[error("invalid REST configuration: {0}")]
    Config(String),
}

impl RequestError {
    /// Number of attempts made before giving up, for exhausted requests.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// Failure to establish, maintain or use the WebSocket connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("invalid websocket configuration: {0}")]
    Config(String),

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("connecting to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("websocket is not connected")]
    NotConnected,

    /// A send found the socket down and the reconnect it triggered failed.
    #[error("cannot send to {url}: connection could not be re-established")]
    SendWhileDisconnected { url: String },

    #[error("connection manager is closed")]
    Closed,
}

/// Reading or writing a stored data file failed.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record for {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A stored line is not a valid record; `line` is 1-based.
    #[error("invalid record at {}:{line}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Fetching a day of history into storage failed.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("no collector registered as '{0}'")]
    UnknownCollector(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A subscriber callback failed while handling a message.
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("callback for topic {topic} failed: {source}")]
    Failed {
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("callback for topic {topic} panicked")]
    Panicked { topic: String },
}
