//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::{MediaAttachment, Turn};

/// Vision mode requested whenever images accompany a prompt
pub const SCREENSHOT_VISION_MODE: &str = "screenshot_to_story";

/// An image sent inline with a generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    /// Always `base64`
    #[serde(rename = "type")]
    pub payload_type: String,
    pub data: String,
    pub media_type: String,
}

impl From<&MediaAttachment> for ImagePayload {
    fn from(attachment: &MediaAttachment) -> Self {
        Self {
            payload_type: "base64".to_string(),
            data: attachment.data.clone(),
            media_type: attachment.media_type.clone(),
        }
    }
}

/// Body of the streaming generation endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    pub conversation: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub is_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub considerations: Option<String>,
}

impl GenerationRequest {
    /// The reduced payload sent to the non-streaming endpoint.
    pub fn to_fallback(&self) -> FallbackRequest {
        FallbackRequest {
            prompt: self.prompt.clone(),
            conversation: self.conversation.clone(),
            file_name: self.file_name.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            considerations: self.considerations.clone(),
        }
    }
}

/// Body of the non-streaming generation endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRequest {
    pub prompt: String,
    pub conversation: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub considerations: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<String>,
}
