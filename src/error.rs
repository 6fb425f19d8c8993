//! Error types for the NextMove bridge.

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Malformed connection string: {0}")]
    ConnectionString(String),
}

/// Blob storage errors.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob {name} not found")]
    NotFound { name: String },

    #[error("Blob {op} request failed: {reason}")]
    RequestFailed { op: String, reason: String },

    #[error("Blob {op} on {name} returned {status}: {body}")]
    Status {
        op: String,
        name: String,
        status: u16,
        body: String,
    },

    #[error("Download of {name} failed: {reason}")]
    Download { name: String, reason: String },
}

/// Message queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue {op} request failed: {reason}")]
    RequestFailed { op: String, reason: String },

    #[error("Queue {op} returned {status}: {body}")]
    Status { op: String, status: u16, body: String },

    #[error("Invalid BrokerProperties header: {0}")]
    InvalidBrokerProperties(String),

    #[error("Lock {lock_token} is no longer held")]
    LockLost { lock_token: String },
}

/// Errors raised by the host's inbound intake.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Intake rejected message {message_id}: {reason}")]
    Rejected { message_id: String, reason: String },

    #[error("Attachment stream for {message_id} was dropped before it was drained")]
    NotDrained { message_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// ASiC packaging failures, reported through [`crate::host::Reject`].
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("Failed to create ASiC for {message_id}: {reason}")]
    Failed { message_id: String, reason: String },

    #[error("ASiC stream for {message_id} failed: {source}")]
    Stream {
        message_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
