use std::path::PathBuf;

use streamrelay_transport::TransportError;

/// Errors that can occur in relay operations.
///
/// None of these reach the producer: [`crate::StreamRelay::offer`] is
/// infallible. They surface from construction and from the serve loop when
/// the endpoint cannot be kept available.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The endpoint could not be created.
    #[error("endpoint creation failed: {0}")]
    EndpointCreation(TransportError),

    /// Waiting for a client failed.
    #[error("client accept failed: {0}")]
    Accept(TransportError),

    /// The retry policy gave up on the endpoint.
    #[error("endpoint unavailable after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: TransportError,
    },

    /// Configuration values are unusable.
    #[error("invalid relay config: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read or parsed.
    #[error("failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The serve thread could not be started or panicked.
    #[error("serve thread failed: {0}")]
    Thread(String),

    /// `serve` was called while another serve loop is active.
    #[error("relay is already serving")]
    AlreadyServing,
}

impl RelayError {
    /// The transport error underneath, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            RelayError::EndpointCreation(err)
            | RelayError::Accept(err)
            | RelayError::RetriesExhausted { source: err, .. } => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
