//! Observable panel state published by the controller actor.

use storyui_protocol::{CompletionFeedback, Orphan, ProviderInfo, Session, StreamingState, Turn};

use crate::error::GenerationError;
use crate::transition::GenerationPhase;
use crate::transport::ConnectionStatus;

/// Immutable snapshot of everything a view renders.
///
/// Replaced wholesale after every command; readers load it lock-free.
#[derive(Debug, Clone, Default)]
pub struct PanelSnapshot {
    pub conversation: Vec<Turn>,
    pub active_session_id: Option<String>,
    pub active_title: String,
    /// Present only while a request is pre-terminal
    pub in_flight: Option<StreamingState>,
    pub phase: Option<GenerationPhase>,
    pub loading: bool,
    pub error: Option<String>,
    pub sessions: Vec<Session>,
    pub orphans: Vec<Orphan>,
    pub connection: ConnectionStatus,
    pub providers: Vec<ProviderInfo>,
    pub selected_provider: Option<String>,
    pub selected_model: Option<String>,
    pub considerations: Option<String>,
}

/// Result of a request that reached a terminal success
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub request_id: u64,
    /// Content of the generator turn that was appended
    pub message: String,
    pub completion: CompletionFeedback,
    pub via_fallback: bool,
    /// The session the result was recorded in, unless saving failed
    pub session: Option<Session>,
}

/// Change notifications fanned out to subscribers
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// The in-flight snapshot changed
    StreamingUpdated {
        request_id: u64,
        state: Box<StreamingState>,
    },
    TurnAppended(Turn),
    /// Streaming produced nothing and the one-shot call is running
    FallbackStarted { request_id: u64 },
    GenerationFinished {
        request_id: u64,
        result: Result<Box<GenerationOutcome>, GenerationError>,
    },
    SessionsChanged,
    OrphansChanged { count: usize },
    ConnectionChanged(ConnectionStatus),
}
