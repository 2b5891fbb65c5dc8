//! Crate-level error types.
//!
//! - [`ChatError`]: rejected submissions and input edits on the controller.
//! - [`TransportError`]: failures that end the WebSocket transport loop.
//! - [`ConfigError`]: TOML configuration problems.

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::ConnectionState;

/// Why a submission or draft edit was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    /// The text was empty after trimming.
    #[error("message is empty")]
    EmptyInput,
    /// The draft exceeds the configured character limit.
    #[error("message is {len} characters long, limit is {max}")]
    InputTooLong { len: usize, max: usize },
    /// Submission is only allowed while the connection is open.
    #[error("connection is {0}, not Open")]
    NotOpen(ConnectionState),
    /// The transport task has shut down and no longer accepts requests.
    #[error("transport has shut down")]
    TransportClosed,
}

/// Errors that end [`Transport::run`](crate::transport::Transport::run).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket handshake could not be completed.
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },
    /// The handshake did not finish within the connect timeout.
    #[error("connection to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },
    /// The reconnect policy gave up.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    /// An outbound request could not be encoded as JSON.
    #[error("failed to encode outbound request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config TOML at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
