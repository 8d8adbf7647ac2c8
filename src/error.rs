//! Error types for robolink
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur on the control link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Invalid constructor input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a client that is not connected
    #[error("Client is not connected, connect first")]
    NotConnected,

    /// Send attempted on a server that has never accepted a connection
    #[error("No active session to send to")]
    NoActiveSession,

    /// Start attempted on a server that is already listening
    #[error("Server is already running")]
    AlreadyRunning,

    /// Read or write against a peer that is gone
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Payload is not a well-formed message encoding
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Encoded message kind does not match the expected type
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for robolink operations
pub type Result<T> = std::result::Result<T, LinkError>;
