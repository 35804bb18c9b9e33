//! Error types surfaced by the controller

use thiserror::Error;

use crate::transport::TransportError;

/// Terminal failure of one generation request
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// Collaborator could not be reached
    #[error("Cannot connect to the generation service: {0}")]
    TransportUnreachable(String),

    /// Collaborator reachable but rejected the request
    #[error("Generation request rejected ({status}): {body}")]
    TransportRejected { status: u16, body: String },

    /// End-of-stream with no terminal event observed
    #[error("Generation stream ended before a result was reported")]
    StreamTruncated,

    /// The stream broke after progress had been observed
    #[error("Generation stream failed: {0}")]
    StreamFailed(String),

    /// The one-shot retry after a streaming failure also failed
    #[error("{0}")]
    FallbackFailed(String),

    /// The generator reported an error event
    #[error("{message}")]
    Generator {
        message: String,
        suggestion: Option<String>,
    },

    /// Caller-initiated abort, or superseded by a newer request
    #[error("Generation cancelled")]
    Aborted,

    #[error("Nothing to generate: provide a prompt or an image")]
    EmptyPrompt,
}

impl GenerationError {
    /// Classify a transport failure that happened after events were decoded.
    pub fn after_progress(error: TransportError) -> Self {
        match error {
            TransportError::StreamTruncated => GenerationError::StreamTruncated,
            other => GenerationError::StreamFailed(other.to_string()),
        }
    }
}

impl From<TransportError> for GenerationError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::ConnectionRefused(reason) => {
                GenerationError::TransportUnreachable(reason)
            }
            TransportError::BadStatus { status, body } => {
                GenerationError::TransportRejected { status, body }
            }
            TransportError::NotFound => GenerationError::TransportRejected {
                status: 404,
                body: "not found".to_string(),
            },
            TransportError::StreamTruncated => GenerationError::StreamTruncated,
            TransportError::Read(reason) | TransportError::Decode(reason) => {
                GenerationError::StreamFailed(reason)
            }
        }
    }
}

/// Failures of the controller actor itself
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Controller stopped")]
    ChannelClosed,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
