//! Transport seams to the generation service.
//!
//! `Transport` covers the generation calls (streaming and one-shot),
//! `ArtifactService` covers the remote listing and deletes. `StoryUiClient`
//! in `http.rs` implements both; tests substitute scripted fakes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use storyui_protocol::{
    ConsiderationsResponse, FallbackRequest, FallbackResponse, GenerationRequest,
    ProvidersResponse, RemoteArtifact,
};

/// Errors signaled by a transport
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("server returned {status}: {body}")]
    BadStatus { status: u16, body: String },

    /// 404 from the service; deletes treat it as success
    #[error("not found")]
    NotFound,

    #[error("stream ended without a terminal event")]
    StreamTruncated,

    #[error("read failed: {0}")]
    Read(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// True when the remote goal state ("artifact no longer exists") holds.
    pub fn is_already_gone(&self) -> bool {
        matches!(self, TransportError::NotFound)
    }
}

/// Raw response body of a streaming generation call
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Result of a connection probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Cheap reachability check issued before each generation.
    async fn probe(&self) -> ConnectionStatus {
        ConnectionStatus::connected()
    }

    /// Open the event stream. Dropping the returned stream releases the
    /// underlying connection.
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ByteStream, TransportError>;

    /// Single-shot, non-streaming generation.
    async fn generate_once(
        &self,
        request: &FallbackRequest,
    ) -> Result<FallbackResponse, TransportError>;
}

#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Full set of generated artifacts known to the service
    async fn list_artifacts(&self) -> Result<Vec<RemoteArtifact>, TransportError>;

    /// Primary delete path, keyed by identity
    async fn delete_artifact(&self, id: &str) -> Result<(), TransportError>;

    /// Legacy delete path, keyed by file name
    async fn delete_artifact_legacy(&self, file_name: &str) -> Result<(), TransportError>;

    async fn delete_artifacts(&self, ids: &[String]) -> Result<(), TransportError>;

    async fn delete_all_artifacts(&self) -> Result<(), TransportError>;

    async fn providers(&self) -> Result<ProvidersResponse, TransportError> {
        Ok(ProvidersResponse::default())
    }

    async fn considerations(&self) -> Result<ConsiderationsResponse, TransportError> {
        Ok(ConsiderationsResponse::default())
    }
}
