//! HTTP client for the generation service (reqwest).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use storyui_protocol::{
    BulkDeleteRequest, ConsiderationsResponse, FallbackRequest, FallbackResponse,
    GenerationRequest, ProvidersResponse, RemoteArtifact, StoriesListing,
};

use crate::config::Endpoints;
use crate::transport::{ArtifactService, ByteStream, ConnectionStatus, Transport, TransportError};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Bound on the probe, listings and deletes. Generation calls have none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed implementation of both transport seams
#[derive(Clone)]
pub struct StoryUiClient {
    client: reqwest::Client,
    endpoints: Endpoints,
    request_timeout: Duration,
}

impl StoryUiClient {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, TransportError> {
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn delete(&self, url: String) -> Result<(), TransportError> {
        let response = self
            .client
            .delete(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await.map(|_| ())
    }
}

#[async_trait]
impl Transport for StoryUiClient {
    async fn probe(&self) -> ConnectionStatus {
        let probe = self
            .client
            .get(self.endpoints.providers())
            .timeout(self.request_timeout)
            .send()
            .await;
        match probe {
            Ok(response) if response.status().is_success() => ConnectionStatus::connected(),
            Ok(response) => {
                ConnectionStatus::failed(format!("Server returned {}", response.status().as_u16()))
            }
            Err(error) => {
                debug!(
                    component = "http",
                    event = "http.probe_failed",
                    error = %error,
                    "Connection probe failed"
                );
                ConnectionStatus::failed("Cannot connect to generation service")
            }
        }
    }

    async fn open_stream(&self, request: &GenerationRequest) -> Result<ByteStream, TransportError> {
        let response = self
            .client
            .post(self.endpoints.generate_stream())
            .json(request)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string())))
            .boxed())
    }

    async fn generate_once(
        &self,
        request: &FallbackRequest,
    ) -> Result<FallbackResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoints.generate())
            .json(request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Read(e.to_string()))?;

        if !status.is_success() {
            // The service reports failures as `{success: false, error}` too
            let body = serde_json::from_str::<FallbackResponse>(&text)
                .ok()
                .and_then(|parsed| parsed.error)
                .unwrap_or_else(|| sanitize_error_body(&text));
            return Err(TransportError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ArtifactService for StoryUiClient {
    async fn list_artifacts(&self) -> Result<Vec<RemoteArtifact>, TransportError> {
        let listing: StoriesListing = self.get_json(self.endpoints.stories()).await?;
        Ok(listing.stories)
    }

    async fn delete_artifact(&self, id: &str) -> Result<(), TransportError> {
        self.delete(self.endpoints.story(id)).await
    }

    async fn delete_artifact_legacy(&self, file_name: &str) -> Result<(), TransportError> {
        self.delete(self.endpoints.legacy_delete(file_name)).await
    }

    async fn delete_artifacts(&self, ids: &[String]) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.endpoints.bulk_delete())
            .json(&BulkDeleteRequest { ids: ids.to_vec() })
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await.map(|_| ())
    }

    async fn delete_all_artifacts(&self) -> Result<(), TransportError> {
        self.delete(self.endpoints.stories()).await
    }

    async fn providers(&self) -> Result<ProvidersResponse, TransportError> {
        self.get_json(self.endpoints.providers()).await
    }

    async fn considerations(&self) -> Result<ConsiderationsResponse, TransportError> {
        self.get_json(self.endpoints.considerations()).await
    }
}

fn map_send_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() || error.is_timeout() {
        TransportError::ConnectionRefused(error.to_string())
    } else {
        warn!(
            component = "http",
            event = "http.send_failed",
            error = %error,
            "Request failed before a response arrived"
        );
        TransportError::Read(error.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(TransportError::NotFound);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::BadStatus {
        status: status.as_u16(),
        body: sanitize_error_body(&body),
    })
}

fn sanitize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut truncated: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push('…');
    truncated
}
