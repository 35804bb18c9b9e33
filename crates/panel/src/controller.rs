//! Controller actor - owns the panel state and processes commands sequentially.
//!
//! The actor runs as a tokio task. Callers talk to it through
//! `ControllerHandle`, which sends `ControllerCommand`s over an mpsc channel;
//! snapshot reads are lock-free through `ArcSwap`. Each generation runs in
//! its own stream task that feeds decoded events back into the same queue,
//! so every state change is applied by the actor in arrival order.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use storyui_protocol::{
    CompletionFeedback, ErrorFeedback, FallbackResponse, GenerationRequest, ImagePayload,
    MediaAttachment, Orphan, ProviderInfo, ProvidersResponse, Session, SummaryInfo, Turn,
    SCREENSHOT_VISION_MODE,
};

use crate::attachments::DEFAULT_VISION_PROMPT;
use crate::config::PanelConfig;
use crate::controller_command::{ControllerCommand, GenerationReply};
use crate::decoder::decode_stream;
use crate::error::{ControllerError, GenerationError};
use crate::history::{self, BulkDeleteReport, ClearReport, DeleteReport, DeleteTarget};
use crate::panel_state::{GenerationOutcome, PanelEvent, PanelSnapshot};
use crate::reconcile::{reconcile, Reconciliation};
use crate::store::{ConversationContext, SessionStore, StoreError};
use crate::summary::{self, RefreshHint};
use crate::transition::{transition, Effect, InFlight, Input, Outcome};
use crate::transport::{ArtifactService, ConnectionStatus, Transport, TransportError};

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 512;

/// Handle to a running controller actor (cheap to Clone).
#[derive(Clone)]
pub struct ControllerHandle {
    command_tx: mpsc::Sender<ControllerCommand>,
    snapshot: Arc<ArcSwap<PanelSnapshot>>,
    events_tx: broadcast::Sender<PanelEvent>,
}

impl ControllerHandle {
    /// Hydrate the store and spawn the actor.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        artifacts: Arc<dyn ArtifactService>,
        store: SessionStore,
        config: PanelConfig,
    ) -> ControllerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let snapshot = Arc::new(ArcSwap::from_pointee(PanelSnapshot::default()));

        let mut actor = PanelActor {
            config,
            transport,
            artifacts,
            store,
            command_tx: command_tx.downgrade(),
            snapshot: snapshot.clone(),
            events_tx: events_tx.clone(),
            in_flight: InFlight::idle(),
            next_request_id: 0,
            pending: None,
            conversation: Vec::new(),
            active_session_id: None,
            active_title: String::new(),
            loading: false,
            error: None,
            orphans: Vec::new(),
            connection: ConnectionStatus::default(),
            providers: Vec::new(),
            selected_provider: None,
            selected_model: None,
            considerations: None,
            refresh_hint_shown: false,
        };
        actor.hydrate();
        actor.publish();

        tokio::spawn(actor.run(command_rx));

        ControllerHandle {
            command_tx,
            snapshot,
            events_tx,
        }
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<PanelSnapshot> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events_tx.subscribe()
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: ControllerCommand) -> Result<(), ControllerError> {
        self.command_tx.send(cmd).await.map_err(|_| {
            warn!(
                component = "controller",
                event = "controller.channel_closed",
                "Actor channel closed, command dropped"
            );
            ControllerError::ChannelClosed
        })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
    ) -> Result<T, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)
    }

    /// Probe the service and load providers, considerations and orphans.
    pub async fn initialize(&self) -> Result<Arc<PanelSnapshot>, ControllerError> {
        self.request(|reply| ControllerCommand::Initialize { reply })
            .await
    }

    /// Run one generation to its terminal outcome.
    ///
    /// Resolves with `GenerationError::Aborted` if the request is cancelled
    /// or superseded by a newer one.
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
        attachments: Vec<MediaAttachment>,
    ) -> Result<GenerationOutcome, ControllerError> {
        let prompt = prompt.into();
        Ok(self
            .request(|reply| ControllerCommand::Send {
                prompt,
                attachments,
                reply,
            })
            .await??)
    }

    pub async fn cancel(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Cancel).await
    }

    pub async fn new_chat(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::NewChat).await
    }

    pub async fn select_session(&self, id: impl Into<String>) -> Result<(), ControllerError> {
        let id = id.into();
        self.request(|reply| ControllerCommand::SelectSession { id, reply })
            .await?
    }

    pub async fn rename(
        &self,
        id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<(), ControllerError> {
        let (id, title) = (id.into(), title.into());
        self.request(|reply| ControllerCommand::Rename { id, title, reply })
            .await?
    }

    pub async fn delete(&self, id: impl Into<String>) -> Result<DeleteReport, ControllerError> {
        let id = id.into();
        self.request(|reply| ControllerCommand::Delete { id, reply })
            .await?
    }

    pub async fn bulk_delete(&self, ids: Vec<String>) -> Result<BulkDeleteReport, ControllerError> {
        self.request(|reply| ControllerCommand::BulkDelete { ids, reply })
            .await?
    }

    pub async fn clear_all(&self) -> Result<ClearReport, ControllerError> {
        self.request(|reply| ControllerCommand::ClearAll { reply })
            .await?
    }

    pub async fn refresh_orphans(&self) -> Result<Reconciliation, ControllerError> {
        Ok(self
            .request(|reply| ControllerCommand::RefreshOrphans { reply })
            .await??)
    }

    pub async fn set_provider(&self, provider: impl Into<String>) -> Result<(), ControllerError> {
        self.send(ControllerCommand::SetProvider {
            provider: provider.into(),
        })
        .await
    }

    pub async fn set_model(&self, model: impl Into<String>) -> Result<(), ControllerError> {
        self.send(ControllerCommand::SetModel {
            model: model.into(),
        })
        .await
    }

    pub async fn set_considerations(
        &self,
        considerations: Option<String>,
    ) -> Result<(), ControllerError> {
        self.send(ControllerCommand::SetConsiderations { considerations })
            .await
    }

    /// Round-trip through the queue; every earlier command has been applied
    /// once this returns.
    pub async fn sync(&self) -> Result<Arc<PanelSnapshot>, ControllerError> {
        self.request(|reply| ControllerCommand::GetSnapshot { reply })
            .await
    }
}

/// The request currently between `Begin` and its terminal outcome
struct PendingRequest {
    request_id: u64,
    prompt: String,
    session_id: Option<String>,
    task: JoinHandle<()>,
    reply: GenerationReply,
    /// Requester turn held back until the probe reports the service reachable
    turn: Option<Turn>,
    /// Typed cause of a transport-level failure, reported instead of the
    /// generic feedback when the request finalizes as failed
    failure: Option<GenerationError>,
}

struct PanelActor {
    config: PanelConfig,
    transport: Arc<dyn Transport>,
    artifacts: Arc<dyn ArtifactService>,
    store: SessionStore,
    command_tx: mpsc::WeakSender<ControllerCommand>,
    snapshot: Arc<ArcSwap<PanelSnapshot>>,
    events_tx: broadcast::Sender<PanelEvent>,

    in_flight: InFlight,
    next_request_id: u64,
    pending: Option<PendingRequest>,

    conversation: Vec<Turn>,
    active_session_id: Option<String>,
    active_title: String,
    loading: bool,
    error: Option<String>,
    orphans: Vec<Orphan>,
    connection: ConnectionStatus,
    providers: Vec<ProviderInfo>,
    selected_provider: Option<String>,
    selected_model: Option<String>,
    considerations: Option<String>,
    refresh_hint_shown: bool,
}

impl PanelActor {
    async fn run(mut self, mut command_rx: mpsc::Receiver<ControllerCommand>) {
        while let Some(cmd) = command_rx.recv().await {
            self.handle(cmd).await;
            self.publish();
        }
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
        debug!(
            component = "controller",
            event = "controller.stopped",
            "Controller actor stopped"
        );
    }

    async fn handle(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::GetSnapshot { reply } => {
                self.publish();
                let _ = reply.send(self.snapshot.load_full());
            }
            ControllerCommand::Initialize { reply } => {
                self.initialize().await;
                self.publish();
                let _ = reply.send(self.snapshot.load_full());
            }

            ControllerCommand::Send {
                prompt,
                attachments,
                reply,
            } => self.begin_generation(prompt, attachments, reply),
            ControllerCommand::Cancel => self.cancel_in_flight(),

            ControllerCommand::Probed { request_id, status } => self.probed(request_id, status),
            ControllerCommand::StreamEvent { request_id, event } => {
                self.apply(Input::Event { request_id, event });
            }
            ControllerCommand::StreamFailed { request_id, error } => {
                self.fail(request_id, error);
            }
            ControllerCommand::FallbackStarted { request_id } => {
                if self.in_flight.is_current(request_id) {
                    let _ = self
                        .events_tx
                        .send(PanelEvent::FallbackStarted { request_id });
                }
            }
            ControllerCommand::FallbackResolved { request_id, result } => match result {
                Ok(response) => self.apply(Input::FallbackCompleted {
                    request_id,
                    completion: Box::new(completion_from_fallback(response)),
                }),
                Err(error) => self.fail(request_id, error),
            },

            ControllerCommand::NewChat => {
                self.cancel_in_flight();
                self.start_new_chat();
            }
            ControllerCommand::SelectSession { id, reply } => {
                let _ = reply.send(self.select_session(&id));
            }
            ControllerCommand::Rename { id, title, reply } => {
                let _ = reply.send(self.rename(&id, &title));
            }
            ControllerCommand::Delete { id, reply } => {
                let _ = reply.send(self.delete(id).await);
            }
            ControllerCommand::BulkDelete { ids, reply } => {
                let _ = reply.send(self.bulk_delete(ids).await);
            }
            ControllerCommand::ClearAll { reply } => {
                let _ = reply.send(self.clear_all().await);
            }
            ControllerCommand::RefreshOrphans { reply } => {
                let _ = reply.send(self.refresh_orphans().await);
            }

            ControllerCommand::SetProvider { provider } => self.set_provider(provider),
            ControllerCommand::SetModel { model } => {
                self.selected_model = Some(model).filter(|m| !m.is_empty());
            }
            ControllerCommand::SetConsiderations { considerations } => {
                self.considerations = considerations.filter(|c| !c.trim().is_empty());
            }
        }
    }

    // -- Startup --

    fn hydrate(&mut self) {
        match self.store.hydrate() {
            Ok(_) => {
                if let Some(newest) = self.store.newest().cloned() {
                    self.activate(&newest);
                }
            }
            Err(error) => {
                warn!(
                    component = "controller",
                    event = "controller.hydrate_failed",
                    error = %error,
                    "Failed to load session history"
                );
                self.error = Some(format!("Failed to load chat history: {error}"));
            }
        }
    }

    async fn initialize(&mut self) {
        let status = self.transport.probe().await;
        self.set_connection(status);
        if !self.connection.connected {
            return;
        }

        match self.artifacts.providers().await {
            Ok(response) => self.apply_providers(response),
            Err(error) => warn!(
                component = "controller",
                event = "controller.providers_failed",
                error = %error,
                "Failed to fetch providers"
            ),
        }

        match self.artifacts.considerations().await {
            Ok(response) if response.has_considerations => {
                self.considerations = response.considerations.filter(|c| !c.trim().is_empty());
            }
            Ok(_) => {}
            Err(error) => warn!(
                component = "controller",
                event = "controller.considerations_failed",
                error = %error,
                "Failed to fetch considerations"
            ),
        }

        if let Err(error) = self.refresh_orphans().await {
            warn!(
                component = "controller",
                event = "controller.orphans_failed",
                error = %error,
                "Failed to fetch remote stories"
            );
        }
    }

    fn apply_providers(&mut self, response: ProvidersResponse) {
        self.providers = response
            .providers
            .into_iter()
            .filter(|p| p.configured)
            .collect();
        if let Some(current) = response.current {
            self.selected_provider = Some(current.provider.to_lowercase());
            self.selected_model = Some(current.model).filter(|m| !m.is_empty());
        }
        info!(
            component = "controller",
            event = "controller.providers_loaded",
            configured = self.providers.len(),
            provider = ?self.selected_provider,
            model = ?self.selected_model,
            "Providers loaded"
        );
    }

    fn set_provider(&mut self, provider: String) {
        if let Some(first_model) = self
            .providers
            .iter()
            .find(|p| p.provider_type == provider)
            .and_then(|p| p.models.first())
        {
            self.selected_model = Some(first_model.clone());
        }
        self.selected_provider = Some(provider).filter(|p| !p.is_empty());
    }

    // -- Generation --

    fn begin_generation(
        &mut self,
        prompt: String,
        attachments: Vec<MediaAttachment>,
        reply: GenerationReply,
    ) {
        let prompt = match resolve_prompt(&prompt, !attachments.is_empty()) {
            Some(prompt) => prompt,
            None => {
                let _ = reply.send(Err(GenerationError::EmptyPrompt));
                return;
            }
        };

        // At most one request in flight
        self.cancel_in_flight();
        self.error = None;
        self.loading = true;

        // The requester turn joins the conversation once the probe confirms
        // the service is reachable
        let is_update = self.active_session_id.is_some() && !self.conversation.is_empty();
        let turn = Turn::requester(prompt.clone(), attachments.clone());
        let request = self.build_request(&prompt, &turn, &attachments, is_update);

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.apply(Input::Begin { request_id });

        let Some(command_tx) = self.command_tx.upgrade() else {
            self.apply(Input::Cancel { request_id });
            self.loading = false;
            let _ = reply.send(Err(GenerationError::Aborted));
            return;
        };

        info!(
            component = "controller",
            event = "controller.request_started",
            request_id,
            is_update,
            images = attachments.len(),
            session_id = ?self.active_session_id,
            "Generation started"
        );

        let task = tokio::spawn(run_generation(
            self.transport.clone(),
            request,
            request_id,
            command_tx,
        ));
        self.pending = Some(PendingRequest {
            request_id,
            prompt,
            session_id: self.active_session_id.clone(),
            task,
            reply,
            turn: Some(turn),
            failure: None,
        });
    }

    fn probed(&mut self, request_id: u64, status: ConnectionStatus) {
        self.set_connection(status);
        if !self.in_flight.is_current(request_id) {
            return;
        }

        if self.connection.connected {
            let turn = self
                .pending
                .as_mut()
                .filter(|p| p.request_id == request_id)
                .and_then(|p| p.turn.take());
            if let Some(turn) = turn {
                self.append_turn(turn);
            }
            return;
        }

        let reason = self
            .connection
            .error
            .clone()
            .unwrap_or_else(|| "Cannot connect to generation service".to_string());
        self.error = Some(reason.clone());
        self.reject(request_id, GenerationError::TransportUnreachable(reason));
    }

    /// End a request without touching the conversation.
    fn reject(&mut self, request_id: u64, error: GenerationError) {
        let Some(pending) = self.take_pending(request_id) else {
            return;
        };
        // With the pending request taken, the resulting discard is a no-op
        self.apply(Input::Cancel { request_id });
        self.loading = false;

        warn!(
            component = "controller",
            event = "controller.request_rejected",
            request_id,
            error = %error,
            "Generation refused before it started"
        );
        let _ = self.events_tx.send(PanelEvent::GenerationFinished {
            request_id,
            result: Err(error.clone()),
        });
        let _ = pending.reply.send(Err(error));
    }

    fn build_request(
        &self,
        prompt: &str,
        turn: &Turn,
        attachments: &[MediaAttachment],
        is_update: bool,
    ) -> GenerationRequest {
        let active = self.active_session_id.as_deref();
        let file_name = active.map(|id| {
            self.store
                .get(id)
                .map(|s| s.file_name.clone())
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| id.to_string())
        });

        let mut conversation = self.conversation.clone();
        conversation.push(turn.clone());

        GenerationRequest {
            prompt: prompt.to_string(),
            conversation,
            file_name,
            is_update,
            original_title: Some(self.active_title.clone()).filter(|t| !t.is_empty()),
            story_id: active.map(str::to_string),
            images: attachments.iter().map(ImagePayload::from).collect(),
            vision_mode: (!attachments.is_empty()).then(|| SCREENSHOT_VISION_MODE.to_string()),
            provider: self.selected_provider.clone(),
            model: self.selected_model.clone(),
            considerations: self.considerations.clone(),
        }
    }

    fn cancel_in_flight(&mut self) {
        if self.in_flight.is_active() {
            let request_id = self.in_flight.request_id;
            self.apply(Input::Cancel { request_id });
        }
    }

    fn fail(&mut self, request_id: u64, error: GenerationError) {
        if let Some(pending) = self
            .pending
            .as_mut()
            .filter(|p| p.request_id == request_id)
        {
            pending.failure = Some(error.clone());
        }
        self.apply(Input::Fail {
            request_id,
            error: ErrorFeedback {
                message: error.to_string(),
                details: None,
                suggestion: None,
            },
        });
    }

    fn apply(&mut self, input: Input) {
        let state = std::mem::replace(&mut self.in_flight, InFlight::idle());
        let (next, effects) = transition(state, input);
        self.in_flight = next;

        for effect in effects {
            match effect {
                Effect::Notify(state) => {
                    let _ = self.events_tx.send(PanelEvent::StreamingUpdated {
                        request_id: self.in_flight.request_id,
                        state,
                    });
                }
                Effect::Finalize {
                    request_id,
                    outcome,
                } => self.finalize(request_id, outcome),
                Effect::Discard { request_id } => self.discard(request_id),
            }
        }
    }

    fn take_pending(&mut self, request_id: u64) -> Option<PendingRequest> {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.request_id == request_id)
        {
            self.pending.take()
        } else {
            None
        }
    }

    fn finalize(&mut self, request_id: u64, outcome: Outcome) {
        let Some(pending) = self.take_pending(request_id) else {
            return;
        };

        let result = match outcome {
            Outcome::Completed {
                completion,
                via_fallback,
            } => Ok(self.record_success(&pending, *completion, via_fallback)),
            Outcome::Failed(feedback) => {
                let content =
                    summary::error_message(&feedback.message, feedback.suggestion.as_deref());
                self.append_turn(Turn::generator(content));
                self.error = Some(feedback.message.clone());
                Err(pending.failure.unwrap_or(GenerationError::Generator {
                    message: feedback.message,
                    suggestion: feedback.suggestion,
                }))
            }
        };
        self.loading = false;

        match &result {
            Ok(outcome) => info!(
                component = "controller",
                event = "controller.request_completed",
                request_id,
                via_fallback = outcome.via_fallback,
                session_id = ?outcome.session.as_ref().map(|s| s.id.as_str()),
                events = self.in_flight.events_applied,
                "Generation completed"
            ),
            Err(error) => warn!(
                component = "controller",
                event = "controller.request_failed",
                request_id,
                error = %error,
                events = self.in_flight.events_applied,
                "Generation failed"
            ),
        }

        let _ = self.events_tx.send(PanelEvent::GenerationFinished {
            request_id,
            result: result.clone().map(Box::new),
        });
        let _ = pending.reply.send(result);
    }

    fn record_success(
        &mut self,
        pending: &PendingRequest,
        completion: CompletionFeedback,
        via_fallback: bool,
    ) -> GenerationOutcome {
        let title = completion
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| Some(self.active_title.clone()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| pending.prompt.clone());

        let message = if via_fallback {
            summary::fallback_success_message(&title)
        } else {
            let is_update = completion.is_update();
            let hint = (!is_update && !self.refresh_hint_shown).then(|| {
                if self.config.is_edge_mode() {
                    RefreshHint::Cloud
                } else {
                    RefreshHint::Local
                }
            });
            self.refresh_hint_shown |= hint.is_some();
            summary::success_message(&completion, &title, is_update, hint)
        };
        self.append_turn(Turn::generator(message.clone()));

        let context = ConversationContext {
            session_id: pending.session_id.clone(),
            turns: self.conversation.clone(),
            prompt: pending.prompt.clone(),
        };
        let session = match self
            .store
            .upsert_from_completion(&context, &completion, now_millis())
        {
            Ok(session) => {
                self.active_session_id = Some(session.id.clone());
                self.active_title = session.title.clone();
                self.orphans.retain(|o| {
                    o.id != session.id
                        && (o.file_name.is_empty() || o.file_name != session.file_name)
                });
                let _ = self.events_tx.send(PanelEvent::SessionsChanged);
                Some(session)
            }
            Err(error) => {
                warn!(
                    component = "controller",
                    event = "controller.save_failed",
                    request_id = pending.request_id,
                    error = %error,
                    "Failed to record session"
                );
                self.error = Some(format!("Failed to save chat history: {error}"));
                None
            }
        };

        GenerationOutcome {
            request_id: pending.request_id,
            message,
            completion,
            via_fallback,
            session,
        }
    }

    fn discard(&mut self, request_id: u64) {
        let Some(pending) = self.take_pending(request_id) else {
            return;
        };
        pending.task.abort();
        self.loading = false;

        info!(
            component = "controller",
            event = "controller.request_cancelled",
            request_id,
            "Generation cancelled"
        );
        let _ = self.events_tx.send(PanelEvent::GenerationFinished {
            request_id,
            result: Err(GenerationError::Aborted),
        });
        let _ = pending.reply.send(Err(GenerationError::Aborted));
    }

    // -- Sessions --

    fn activate(&mut self, session: &Session) {
        self.conversation = session.conversation.clone();
        self.active_session_id = Some(session.id.clone());
        self.active_title = session.title.clone();
        self.error = None;
    }

    fn start_new_chat(&mut self) {
        self.conversation.clear();
        self.active_session_id = None;
        self.active_title.clear();
        self.error = None;
    }

    fn select_session(&mut self, id: &str) -> Result<(), ControllerError> {
        let session = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.cancel_in_flight();
        self.activate(&session);
        Ok(())
    }

    fn rename(&mut self, id: &str, title: &str) -> Result<(), ControllerError> {
        let renamed = self.store.rename(id, title)?;
        if self.active_session_id.as_deref() == Some(id) {
            self.active_title = renamed.title;
        }
        let _ = self.events_tx.send(PanelEvent::SessionsChanged);
        Ok(())
    }

    fn target_for(&self, id: &str) -> DeleteTarget {
        self.store
            .get(id)
            .map(DeleteTarget::from)
            .or_else(|| self.orphans.iter().find(|o| o.id == id).map(DeleteTarget::from))
            .unwrap_or_else(|| DeleteTarget {
                id: id.to_string(),
                file_name: String::new(),
            })
    }

    /// What the remote listing will show for `id` if its delete fails
    fn leftover_for(&self, id: &str) -> Orphan {
        self.store
            .get(id)
            .map(|s| Orphan {
                id: s.id.clone(),
                title: s.title.clone(),
                file_name: s.file_name.clone(),
            })
            .or_else(|| self.orphans.iter().find(|o| o.id == id).cloned())
            .unwrap_or_else(|| Orphan {
                id: id.to_string(),
                title: id.to_string(),
                file_name: String::new(),
            })
    }

    async fn delete(&mut self, id: String) -> Result<DeleteReport, ControllerError> {
        let target = self.target_for(&id);
        let leftover = self.leftover_for(&id);
        if self.active_session_id.as_deref() == Some(id.as_str()) {
            self.cancel_in_flight();
        }

        let report = history::delete(&mut self.store, self.artifacts.as_ref(), &target).await?;
        self.orphans.retain(|o| o.id != id);
        if report.remote.is_failed() {
            // Still listed remotely, and no session refers to it any more
            self.orphans.push(leftover);
        }
        self.after_removal(&[id]);
        Ok(report)
    }

    async fn bulk_delete(&mut self, ids: Vec<String>) -> Result<BulkDeleteReport, ControllerError> {
        let targets: Vec<DeleteTarget> = ids.iter().map(|id| self.target_for(id)).collect();
        let leftovers: Vec<Orphan> = ids.iter().map(|id| self.leftover_for(id)).collect();
        if ids
            .iter()
            .any(|id| self.active_session_id.as_deref() == Some(id.as_str()))
        {
            self.cancel_in_flight();
        }

        let report =
            history::bulk_delete(&mut self.store, self.artifacts.as_ref(), &targets).await?;
        let failed = report.failed();
        self.orphans.retain(|o| !ids.contains(&o.id));
        self.orphans.extend(
            leftovers
                .into_iter()
                .filter(|o| failed.contains(&o.id.as_str())),
        );
        self.after_removal(&ids);
        Ok(report)
    }

    async fn clear_all(&mut self) -> Result<ClearReport, ControllerError> {
        self.cancel_in_flight();
        let report = history::clear_all(&mut self.store, self.artifacts.as_ref()).await?;
        if !report.remote.is_failed() {
            self.orphans.clear();
        }
        self.start_new_chat();
        let _ = self.events_tx.send(PanelEvent::SessionsChanged);
        let _ = self.events_tx.send(PanelEvent::OrphansChanged {
            count: self.orphans.len(),
        });
        Ok(report)
    }

    /// Deleting the active session activates the newest remaining one.
    fn after_removal(&mut self, ids: &[String]) {
        let active_removed = self
            .active_session_id
            .as_ref()
            .is_some_and(|active| ids.contains(active));
        if active_removed {
            match self.store.newest().cloned() {
                Some(newest) => self.activate(&newest),
                None => self.start_new_chat(),
            }
        }
        let _ = self.events_tx.send(PanelEvent::SessionsChanged);
        let _ = self.events_tx.send(PanelEvent::OrphansChanged {
            count: self.orphans.len(),
        });
    }

    async fn refresh_orphans(&mut self) -> Result<Reconciliation, TransportError> {
        let listing = self.artifacts.list_artifacts().await?;
        let reconciliation = reconcile(self.store.sessions(), &listing);
        debug!(
            component = "controller",
            event = "controller.reconciled",
            listed = listing.len(),
            orphans = reconciliation.orphans.len(),
            detached = reconciliation.detached.len(),
            "Reconciled remote stories"
        );
        self.orphans = reconciliation.orphans.clone();
        let _ = self.events_tx.send(PanelEvent::OrphansChanged {
            count: self.orphans.len(),
        });
        Ok(reconciliation)
    }

    // -- Observability --

    fn append_turn(&mut self, turn: Turn) {
        self.conversation.push(turn.clone());
        let _ = self.events_tx.send(PanelEvent::TurnAppended(turn));
    }

    fn set_connection(&mut self, status: ConnectionStatus) {
        if self.connection != status {
            let _ = self
                .events_tx
                .send(PanelEvent::ConnectionChanged(status.clone()));
        }
        self.connection = status;
    }

    fn publish(&self) {
        let generating = self.pending.is_some();
        self.snapshot.store(Arc::new(PanelSnapshot {
            conversation: self.conversation.clone(),
            active_session_id: self.active_session_id.clone(),
            active_title: self.active_title.clone(),
            in_flight: generating.then(|| self.in_flight.snapshot.clone()),
            phase: generating.then_some(self.in_flight.phase),
            loading: self.loading,
            error: self.error.clone(),
            sessions: self.store.sessions().to_vec(),
            orphans: self.orphans.clone(),
            connection: self.connection.clone(),
            providers: self.providers.clone(),
            selected_provider: self.selected_provider.clone(),
            selected_model: self.selected_model.clone(),
            considerations: self.considerations.clone(),
        }));
    }
}

/// Stream task: probe, then decode events into the actor queue, falling back
/// to the one-shot call when nothing was decoded.
async fn run_generation(
    transport: Arc<dyn Transport>,
    request: GenerationRequest,
    request_id: u64,
    command_tx: mpsc::Sender<ControllerCommand>,
) {
    let status = transport.probe().await;
    let connected = status.connected;
    if command_tx
        .send(ControllerCommand::Probed { request_id, status })
        .await
        .is_err()
        || !connected
    {
        return;
    }

    let mut decoded: u64 = 0;
    let failure = match transport.open_stream(&request).await {
        Ok(bytes) => {
            let mut events = Box::pin(decode_stream(bytes));
            loop {
                match events.next().await {
                    Some(Ok(event)) => {
                        decoded += 1;
                        let terminal = event.is_terminal();
                        if command_tx
                            .send(ControllerCommand::StreamEvent { request_id, event })
                            .await
                            .is_err()
                            || terminal
                        {
                            return;
                        }
                    }
                    Some(Err(error)) => break error,
                    None => break TransportError::StreamTruncated,
                }
            }
        }
        Err(error) => error,
    };

    if decoded > 0 {
        let _ = command_tx
            .send(ControllerCommand::StreamFailed {
                request_id,
                error: GenerationError::after_progress(failure),
            })
            .await;
        return;
    }

    warn!(
        component = "controller",
        event = "controller.fallback",
        request_id,
        error = %failure,
        "Streaming failed before any event, retrying without streaming"
    );
    let _ = command_tx
        .send(ControllerCommand::FallbackStarted { request_id })
        .await;

    let result = match transport.generate_once(&request.to_fallback()).await {
        Ok(response) if response.success => Ok(response),
        Ok(response) => Err(GenerationError::FallbackFailed(
            response
                .error
                .unwrap_or_else(|| "Story generation failed".to_string()),
        )),
        Err(TransportError::Read(reason) | TransportError::Decode(reason)) => {
            Err(GenerationError::FallbackFailed(reason))
        }
        Err(error) => Err(GenerationError::from(error)),
    };
    let _ = command_tx
        .send(ControllerCommand::FallbackResolved { request_id, result })
        .await;
}

/// Empty prompts are only accepted when images carry the request.
fn resolve_prompt(prompt: &str, has_attachments: bool) -> Option<String> {
    let prompt = prompt.trim();
    if !prompt.is_empty() {
        Some(prompt.to_string())
    } else if has_attachments {
        Some(DEFAULT_VISION_PROMPT.to_string())
    } else {
        None
    }
}

fn completion_from_fallback(response: FallbackResponse) -> CompletionFeedback {
    CompletionFeedback {
        success: true,
        story_id: response.story_id,
        file_name: response.file_name,
        title: response.title,
        summary: SummaryInfo {
            action: "created".to_string(),
            details: String::new(),
        },
        ..Default::default()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
