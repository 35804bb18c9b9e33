//! Commands sent to the controller actor.

use std::sync::Arc;

use storyui_protocol::{FallbackResponse, MediaAttachment, StreamEvent};
use tokio::sync::oneshot;

use crate::error::{ControllerError, GenerationError};
use crate::history::{BulkDeleteReport, ClearReport, DeleteReport};
use crate::panel_state::{GenerationOutcome, PanelSnapshot};
use crate::reconcile::Reconciliation;
use crate::transport::{ConnectionStatus, TransportError};

pub type GenerationReply = oneshot::Sender<Result<GenerationOutcome, GenerationError>>;

pub enum ControllerCommand {
    // -- Queries --
    GetSnapshot {
        reply: oneshot::Sender<Arc<PanelSnapshot>>,
    },

    // -- Startup --
    /// Probe the service and load providers, considerations and orphans
    Initialize {
        reply: oneshot::Sender<Arc<PanelSnapshot>>,
    },

    // -- Generation --
    /// Start a request; the reply resolves at its terminal outcome
    Send {
        prompt: String,
        attachments: Vec<MediaAttachment>,
        reply: GenerationReply,
    },
    Cancel,

    // -- From the stream task --
    /// Pre-flight probe result; events for the request only follow a
    /// connected status
    Probed {
        request_id: u64,
        status: ConnectionStatus,
    },
    StreamEvent {
        request_id: u64,
        event: StreamEvent,
    },
    /// Failure after at least one event was decoded
    StreamFailed {
        request_id: u64,
        error: GenerationError,
    },
    /// Streaming produced nothing; the fallback call is being made
    FallbackStarted {
        request_id: u64,
    },
    FallbackResolved {
        request_id: u64,
        result: Result<FallbackResponse, GenerationError>,
    },

    // -- Sessions --
    NewChat,
    SelectSession {
        id: String,
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    Rename {
        id: String,
        title: String,
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    Delete {
        id: String,
        reply: oneshot::Sender<Result<DeleteReport, ControllerError>>,
    },
    BulkDelete {
        ids: Vec<String>,
        reply: oneshot::Sender<Result<BulkDeleteReport, ControllerError>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<ClearReport, ControllerError>>,
    },
    RefreshOrphans {
        reply: oneshot::Sender<Result<Reconciliation, TransportError>>,
    },

    // -- Settings --
    SetProvider {
        provider: String,
    },
    SetModel {
        model: String,
    },
    SetConsiderations {
        considerations: Option<String>,
    },
}
