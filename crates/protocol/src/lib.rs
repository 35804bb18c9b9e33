//! Story UI Protocol
//!
//! Shared types for communication between the Story UI generation service
//! and its clients. These types are serialized as camelCase JSON over HTTP
//! and as `data:` frames on the generation event stream.

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::{
    BulkDeleteRequest, FallbackRequest, GenerationRequest, ImagePayload, SCREENSHOT_VISION_MODE,
};
pub use server::{
    CompletionFeedback, ComponentUsage, ErrorFeedback, EventKind, FallbackResponse,
    IntentPreview, LayoutChoice, ProgressUpdate, RetryInfo, StreamEvent, StyleChoice,
    SummaryInfo, TimingMetrics, ValidationFeedback,
};
pub use types::*;
