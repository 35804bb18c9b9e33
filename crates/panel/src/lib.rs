//! Story UI generation session controller.
//!
//! Drives one story-generation conversation against the Story UI service:
//! decodes the streamed event frames, folds them through the request state
//! machine, falls back to the one-shot endpoint when streaming yields
//! nothing, and keeps a bounded local history reconciled with the stories
//! the service still holds.

pub mod attachments;
pub mod config;
pub mod controller;
pub mod controller_command;
pub mod decoder;
pub mod error;
pub mod history;
pub mod http;
pub mod logging;
pub mod panel_state;
pub mod paths;
pub mod persistence;
pub mod reconcile;
pub mod store;
pub mod summary;
pub mod transition;
pub mod transport;

pub use config::PanelConfig;
pub use controller::ControllerHandle;
pub use error::{ControllerError, GenerationError};
pub use http::StoryUiClient;
pub use panel_state::{GenerationOutcome, PanelEvent, PanelSnapshot};
pub use persistence::{MemorySessions, SessionPersistence, SqliteSessions};
pub use store::SessionStore;
pub use transport::{ArtifactService, Transport, TransportError};
