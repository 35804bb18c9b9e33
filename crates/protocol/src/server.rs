//! Server → Client messages

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The six event kinds carried on the generation stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Intent,
    Progress,
    Validation,
    Retry,
    Completion,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Intent => "intent",
            EventKind::Progress => "progress",
            EventKind::Validation => "validation",
            EventKind::Retry => "retry",
            EventKind::Completion => "completion",
            EventKind::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completion | EventKind::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intent" => Ok(EventKind::Intent),
            "progress" => Ok(EventKind::Progress),
            "validation" => Ok(EventKind::Validation),
            "retry" => Ok(EventKind::Retry),
            "completion" => Ok(EventKind::Completion),
            "error" => Ok(EventKind::Error),
            other => Err(other.to_string()),
        }
    }
}

/// One typed record decoded from the generation stream.
///
/// Serialized as `{"kind": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Intent(IntentPreview),
    Progress(ProgressUpdate),
    Validation(ValidationFeedback),
    Retry(RetryInfo),
    Completion(Box<CompletionFeedback>),
    Error(ErrorFeedback),
}

impl StreamEvent {
    /// Build a typed event from an already-split `kind` tag and payload.
    pub fn from_parts(kind: EventKind, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::Intent => StreamEvent::Intent(serde_json::from_value(data)?),
            EventKind::Progress => StreamEvent::Progress(serde_json::from_value(data)?),
            EventKind::Validation => StreamEvent::Validation(serde_json::from_value(data)?),
            EventKind::Retry => StreamEvent::Retry(serde_json::from_value(data)?),
            EventKind::Completion => {
                StreamEvent::Completion(Box::new(serde_json::from_value(data)?))
            }
            EventKind::Error => StreamEvent::Error(serde_json::from_value(data)?),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Intent(_) => EventKind::Intent,
            StreamEvent::Progress(_) => EventKind::Progress,
            StreamEvent::Validation(_) => EventKind::Validation,
            StreamEvent::Retry(_) => EventKind::Retry,
            StreamEvent::Completion(_) => EventKind::Completion,
            StreamEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// What the generator plans to build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentPreview {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub approach: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub step: u32,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub message: String,
}

impl ProgressUpdate {
    /// Completed fraction in `0.0..=1.0`; zero when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.step.min(self.total_steps) as f64) / (self.total_steps as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFeedback {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default)]
    pub auto_fix_applied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentUsage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutChoice {
    pub pattern: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleChoice {
    pub property: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryInfo {
    /// `created` or `updated`
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingMetrics {
    #[serde(default)]
    pub total_time_ms: u64,
    #[serde(default)]
    pub llm_calls_count: u32,
}

/// Terminal success payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionFeedback {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub summary: SummaryInfo,
    #[serde(default)]
    pub components_used: Vec<ComponentUsage>,
    #[serde(default)]
    pub layout_choices: Vec<LayoutChoice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style_choices: Vec<StyleChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationFeedback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TimingMetrics>,
}

impl CompletionFeedback {
    pub fn is_update(&self) -> bool {
        self.summary.action.eq_ignore_ascii_case("updated")
    }
}

/// Terminal failure payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorFeedback {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Response of the non-streaming generation endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
