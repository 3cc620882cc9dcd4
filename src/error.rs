//! Error types for the content store client

use thiserror::Error;

/// Content store client error
#[derive(Debug, Error)]
pub enum ClientError {
    /// Textual or binary content identifier could not be parsed
    #[error("Malformed content identifier {input:?}: {reason}")]
    MalformedIdentifier { input: String, reason: String },

    /// Credential missing or rejected by the service
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network failure before a response was received
    #[error("Transport error: {message}")]
    Transport { message: String, timeout: bool },

    /// Service returned a non-success status
    #[error("Service error {status}: {message}")]
    Service { status: u16, message: String },

    /// Service has no record of the requested content
    #[error("Not found: {0}")]
    NotFound(String),

    /// Retrieved bytes do not hash to the identifier that names them
    #[error("Integrity check failed for {cid}: {reason}")]
    Integrity { cid: String, reason: String },

    /// Directory operation on a regular file
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Malformed or unsupported CAR, dag-pb or UnixFS bytes
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller supplied content that cannot be packed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or applied
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CAR header could not be encoded
    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

impl ClientError {
    /// Whether this is a transport failure caused by the request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Transport { timeout: true, .. })
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        ClientError::Decode(msg.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport {
            timeout: e.is_timeout(),
            message: e.to_string(),
        }
    }
}

/// Result type for content store operations
pub type Result<T> = std::result::Result<T, ClientError>;
