//! Error types for bridge, channel, audiohook and configuration failures.

use thiserror::Error;

use crate::technology::Capabilities;

/// Failure of a bridge lifecycle or membership operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no bridge technology satisfies capabilities {0:?}")]
    NoTechnology(Capabilities),
    #[error("bridge technology '{0}' is already registered")]
    DuplicateTechnology(String),
    #[error("bridge technology '{0}' is not registered")]
    UnknownTechnology(String),
    #[error("bridge {0} has been dissolved")]
    Dissolved(String),
    #[error("channel {0} is not waiting to join")]
    NotWaiting(String),
    #[error("swap channel {0} is not waiting")]
    SwapNotWaiting(String),
    #[error("channel {channel} is not in bridge {bridge}")]
    NotInBridge { channel: String, bridge: String },
    #[error("bridge technology '{technology}' refused channel {channel}: {reason}")]
    Rejected {
        technology: &'static str,
        channel: String,
        reason: String,
    },
    #[error("cannot merge bridge {from} into {into}: {reason}")]
    MergeRefused {
        from: String,
        into: String,
        reason: String,
    },
    #[error("invalid feature hook: {0}")]
    InvalidHook(String),
    #[error("builtin feature {0} is already registered")]
    DuplicateBuiltin(String),
    #[error("builtin feature {0} is not available")]
    UnknownBuiltin(String),
    #[error("failed to start thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Failure writing to a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} has hung up")]
    HungUp(String),
}

/// Failure attaching, detaching or looking up an audiohook.
#[derive(Debug, Error)]
pub enum AudiohookError {
    #[error("audiohook '{0}' is already attached")]
    AlreadyAttached(String),
    #[error("no audiohook with source '{label}' on channel {channel}")]
    NotFound { label: String, channel: String },
    #[error("audiohook '{0}' has already finished")]
    Finished(String),
}

/// Failure loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
