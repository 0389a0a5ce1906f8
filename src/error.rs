//! Error types for the weather sensor agent.
//!
//! Nothing on the ingest or sweep path returns these to a caller; they surface
//! from collaborators (settings files, device layer, notification transport)
//! and are logged where the core catches them.

use thiserror::Error;

/// Configuration file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Settings collaborator errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by the external device layer.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device layer rejected the request: {0}")]
    Rejected(String),
}

/// Failures reported by the notification transport.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Closed,

    #[error("notification queue full")]
    Full,
}

/// Errors returned by the hub handle when the owner thread is gone.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("hub is not running")]
    Stopped,

    #[error("hub dropped the reply")]
    NoReply,

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
}

/// Payload source errors.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
