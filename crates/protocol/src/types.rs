//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

use crate::server::{
    CompletionFeedback, ErrorFeedback, IntentPreview, ProgressUpdate, RetryInfo,
    ValidationFeedback,
};

/// Who produced a turn.
///
/// The wire names (`user` / `ai`) match what the generation service and
/// previously persisted histories use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    Requester,
    #[serde(rename = "ai")]
    Generator,
}

/// An image attached to a requester turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    pub id: String,
    pub media_type: String,
    /// Base64 payload, without a `data:` prefix
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Snapshot of an in-flight generation.
///
/// Every field is independently optional; `completion` and `error` are
/// mutually exclusive and either one marks the snapshot as terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationFeedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionFeedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorFeedback>,
}

impl StreamingState {
    pub fn is_terminal(&self) -> bool {
        self.completion.is_some() || self.error.is_some()
    }
}

/// One message exchange unit within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached_images: Vec<MediaAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_data: Option<StreamingState>,
}

impl Turn {
    pub fn requester(content: impl Into<String>, attached_images: Vec<MediaAttachment>) -> Self {
        Self {
            role: Role::Requester,
            content: content.into(),
            attached_images,
            streaming_data: None,
        }
    }

    pub fn generator(content: impl Into<String>) -> Self {
        Self {
            role: Role::Generator,
            content: content.into(),
            attached_images: Vec::new(),
            streaming_data: None,
        }
    }
}

/// A persisted conversation plus its associated generated artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    /// Remote artifact file name; empty until the first successful generation
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub conversation: Vec<Turn>,
    /// Milliseconds since the Unix epoch
    pub last_updated: i64,
}

/// A generated artifact as reported by the remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteArtifact {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Response body of the remote listing endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoriesListing {
    #[serde(default)]
    pub stories: Vec<RemoteArtifact>,
}

/// A remote artifact with no corresponding local session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orphan {
    pub id: String,
    pub title: String,
    pub file_name: String,
}

impl From<&RemoteArtifact> for Orphan {
    fn from(artifact: &RemoteArtifact) -> Self {
        Self {
            id: artifact.id.clone(),
            title: artifact.title.clone(),
            file_name: artifact.file_name.clone(),
        }
    }
}

/// A model provider known to the generation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub name: String,
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub models: Vec<String>,
}

/// The provider/model pair the service currently defaults to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentProvider {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersResponse {
    #[serde(default)]
    pub providers: Vec<ProviderInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentProvider>,
}

/// Design-system guidance configured on the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsiderationsResponse {
    #[serde(default)]
    pub has_considerations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub considerations: Option<String>,
}
