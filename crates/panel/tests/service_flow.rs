use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use storyui::history::{delete_remote, DeleteTarget, RemoteOutcome};
use storyui::{
    ControllerError, ControllerHandle, GenerationError, PanelConfig, SessionPersistence,
    SessionStore, SqliteSessions, StoryUiClient,
};
use storyui_protocol::{
    FallbackResponse, GenerationRequest, RemoteArtifact, Session, StoriesListing, Turn,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const STORAGE_KEY: &str = "story-ui-chats";

#[derive(Clone, Default)]
struct MockState {
    /// When set, the streaming endpoint answers with this status and no body
    stream_status: Arc<Mutex<Option<u16>>>,
    stream_chunks: Arc<Mutex<Vec<String>>>,
    fallback: Arc<Mutex<Option<(u16, Value)>>>,
    stories: Arc<Mutex<Vec<RemoteArtifact>>>,
    /// The listing endpoint holds the request open far past the client timeout
    stall_listing: Arc<Mutex<bool>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    deletes: Arc<Mutex<Vec<String>>>,
}

async fn providers() -> Json<Value> {
    Json(json!({
        "providers": [
            {"type": "claude", "name": "Claude", "configured": true, "models": ["sonnet"]}
        ],
        "current": {"provider": "Claude", "model": "sonnet"}
    }))
}

async fn considerations() -> Json<Value> {
    Json(json!({"hasConsiderations": false}))
}

async fn generate_stream(
    State(state): State<MockState>,
    Json(request): Json<GenerationRequest>,
) -> (StatusCode, Body) {
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(request);

    if let Some(status) = *state.stream_status.lock().expect("stream status lock") {
        let status = StatusCode::from_u16(status).expect("valid status");
        return (status, Body::from("stream unavailable"));
    }

    let chunks: Vec<Result<Bytes, std::io::Error>> = state
        .stream_chunks
        .lock()
        .expect("stream chunks lock")
        .iter()
        .map(|chunk| Ok(Bytes::from(chunk.clone())))
        .collect();
    (StatusCode::OK, Body::from_stream(futures::stream::iter(chunks)))
}

async fn generate_once(State(state): State<MockState>) -> (StatusCode, Json<Value>) {
    let (status, body) = state
        .fallback
        .lock()
        .expect("fallback lock")
        .clone()
        .unwrap_or((500, json!({"success": false})));
    (StatusCode::from_u16(status).expect("valid status"), Json(body))
}

async fn list_stories(State(state): State<MockState>) -> Json<StoriesListing> {
    if *state.stall_listing.lock().expect("stall lock") {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
    Json(StoriesListing {
        stories: state.stories.lock().expect("stories lock").clone(),
    })
}

async fn delete_story(State(state): State<MockState>, Path(id): Path<String>) -> StatusCode {
    match id.as_str() {
        "gone" => StatusCode::NOT_FOUND,
        "broken" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => {
            state.deletes.lock().expect("deletes lock").push(id);
            StatusCode::OK
        }
    }
}

async fn legacy_delete(State(state): State<MockState>, Path(file_name): Path<String>) -> StatusCode {
    state
        .deletes
        .lock()
        .expect("deletes lock")
        .push(format!("legacy:{file_name}"));
    StatusCode::OK
}

async fn bulk_delete(State(state): State<MockState>, Json(body): Json<Value>) -> StatusCode {
    let ids = body["ids"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    state
        .deletes
        .lock()
        .expect("deletes lock")
        .push(format!("bulk:{}", ids.join(",")));
    StatusCode::OK
}

async fn delete_all(State(state): State<MockState>) -> StatusCode {
    state.deletes.lock().expect("deletes lock").push("all".to_owned());
    StatusCode::OK
}

async fn spawn_mock_server(state: MockState) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/mcp/providers", get(providers))
        .route("/mcp/considerations", get(considerations))
        .route("/mcp/generate-story-stream", post(generate_stream))
        .route("/mcp/generate-story", post(generate_once))
        .route("/story-ui/stories", get(list_stories).delete(delete_all))
        .route("/story-ui/stories/delete-bulk", post(bulk_delete))
        .route("/story-ui/stories/{id}", delete(delete_story))
        .route("/story-ui/delete/{file_name}", delete(legacy_delete))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let address: SocketAddr = listener.local_addr().expect("mock listener local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        server.await.expect("run mock server");
    });
    (format!("http://{address}"), shutdown_tx, handle)
}

fn frame(kind: &str, data: Value) -> String {
    format!("data: {}\n", json!({"kind": kind, "data": data}))
}

fn completion_frame(story_id: &str, title: &str) -> String {
    frame(
        "completion",
        json!({
            "success": true,
            "storyId": story_id,
            "fileName": format!("{story_id}.stories.tsx"),
            "title": title,
            "summary": {"action": "created", "details": ""},
            "componentsUsed": [{"name": "Card"}, {"name": "Button"}],
            "layoutChoices": []
        }),
    )
}

fn artifact(id: &str) -> RemoteArtifact {
    RemoteArtifact {
        id: id.to_owned(),
        title: format!("Story {id}"),
        file_name: format!("{id}.stories.tsx"),
        created_at: None,
        updated_at: None,
    }
}

fn session(id: &str, last_updated: i64) -> Session {
    Session {
        id: id.to_owned(),
        title: format!("Story {id}"),
        file_name: format!("{id}.stories.tsx"),
        conversation: vec![Turn::requester("make it", Vec::new()), Turn::generator("done")],
        last_updated,
    }
}

fn spawn_controller(base_url: &str, db_path: &std::path::Path) -> ControllerHandle {
    spawn_controller_with_timeout(base_url, db_path, Duration::from_secs(30))
}

fn spawn_controller_with_timeout(
    base_url: &str,
    db_path: &std::path::Path,
    request_timeout: Duration,
) -> ControllerHandle {
    let config = PanelConfig::new(Some(base_url), 0);
    let client =
        Arc::new(StoryUiClient::new(config.endpoints()).with_request_timeout(request_timeout));
    let persistence = SqliteSessions::open(db_path).expect("open sqlite history");
    let store = SessionStore::new(Box::new(persistence), STORAGE_KEY, config.max_sessions);
    ControllerHandle::spawn(client.clone(), client, store, config)
}

#[tokio::test]
async fn streamed_generation_is_recorded_in_sqlite() {
    let state = MockState::default();
    let intent = frame(
        "intent",
        json!({"title": "Pricing", "components": ["Card"], "approach": "grid"}),
    );
    let progress = frame(
        "progress",
        json!({"phase": "generating", "step": 2, "totalSteps": 4, "message": "Writing story"}),
    );
    let completion = completion_frame("pricing", "Pricing");
    // Frames split across chunk boundaries
    let body = format!("{intent}{progress}{completion}");
    let (head, tail) = body.split_at(intent.len() + 7);
    *state.stream_chunks.lock().unwrap() = vec![head.to_owned(), tail.to_owned()];

    let (base_url, shutdown, server) = spawn_mock_server(state.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("storyui.db");
    let handle = spawn_controller(&base_url, &db_path);

    let outcome = timeout(TEST_TIMEOUT, handle.generate("pricing table", Vec::new()))
        .await
        .expect("generation timed out")
        .expect("generation succeeds");

    assert!(!outcome.via_fallback);
    assert!(outcome
        .message
        .starts_with("[SUCCESS] **Created: \"Pricing\"**\nBuilt with `Card`, `Button`."));
    assert_eq!(outcome.session.as_ref().unwrap().file_name, "pricing.stories.tsx");

    let requests = state.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "pricing table");
    assert!(!requests[0].is_update);

    let stored = SqliteSessions::open(&db_path).unwrap().load(STORAGE_KEY).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, "pricing");
    assert_eq!(stored[0].conversation.len(), 2);

    let _ = shutdown.send(());
    let _ = server.await;
}

#[tokio::test]
async fn stream_rejection_falls_back_to_one_shot() {
    let state = MockState::default();
    *state.stream_status.lock().unwrap() = Some(500);
    *state.fallback.lock().unwrap() = Some((
        200,
        serde_json::to_value(FallbackResponse {
            success: true,
            title: Some("Hero".into()),
            file_name: Some("hero.stories.tsx".into()),
            story_id: Some("hero".into()),
            error: None,
        })
        .unwrap(),
    ));

    let (base_url, shutdown, server) = spawn_mock_server(state).await;
    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_controller(&base_url, &dir.path().join("storyui.db"));

    let outcome = timeout(TEST_TIMEOUT, handle.generate("hero banner", Vec::new()))
        .await
        .expect("generation timed out")
        .expect("fallback succeeds");

    assert!(outcome.via_fallback);
    assert_eq!(
        outcome.message,
        "[SUCCESS] **Created: \"Hero\"**\n\nStory generated successfully."
    );
    assert_eq!(handle.sync().await.unwrap().sessions[0].id, "hero");

    let _ = shutdown.send(());
    let _ = server.await;
}

#[tokio::test]
async fn fallback_error_body_is_reported() {
    let state = MockState::default();
    *state.stream_status.lock().unwrap() = Some(503);
    *state.fallback.lock().unwrap() = Some((
        500,
        json!({"success": false, "error": "Provider quota exceeded"}),
    ));

    let (base_url, shutdown, server) = spawn_mock_server(state).await;
    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_controller(&base_url, &dir.path().join("storyui.db"));

    let result = timeout(TEST_TIMEOUT, handle.generate("hero banner", Vec::new()))
        .await
        .expect("generation timed out");
    assert!(matches!(
        result,
        Err(ControllerError::Generation(GenerationError::TransportRejected { status: 500, ref body }))
            if body == "Provider quota exceeded"
    ));

    let snapshot = handle.sync().await.unwrap();
    assert_eq!(
        snapshot.conversation.last().unwrap().content,
        "Error: Generation request rejected (500): Provider quota exceeded"
    );
    assert!(snapshot.sessions.is_empty());

    let _ = shutdown.send(());
    let _ = server.await;
}

#[tokio::test]
async fn remote_delete_paths() {
    let state = MockState::default();
    let (base_url, shutdown, server) = spawn_mock_server(state.clone()).await;
    let client = StoryUiClient::new(PanelConfig::new(Some(&base_url), 0).endpoints());

    let gone = DeleteTarget {
        id: "gone".into(),
        file_name: String::new(),
    };
    assert_eq!(delete_remote(&client, &gone).await, RemoteOutcome::AlreadyGone);

    let broken = DeleteTarget {
        id: "broken".into(),
        file_name: "broken.stories.tsx".into(),
    };
    assert_eq!(delete_remote(&client, &broken).await, RemoteOutcome::Deleted);

    let plain = DeleteTarget {
        id: "card".into(),
        file_name: "card.stories.tsx".into(),
    };
    assert_eq!(delete_remote(&client, &plain).await, RemoteOutcome::Deleted);

    assert_eq!(
        *state.deletes.lock().unwrap(),
        vec!["legacy:broken.stories.tsx".to_owned(), "card".to_owned()]
    );

    let _ = shutdown.send(());
    let _ = server.await;
}

#[tokio::test]
async fn orphans_and_bulk_delete_through_controller() {
    let state = MockState::default();
    *state.stories.lock().unwrap() = vec![artifact("hero"), artifact("stray")];
    let (base_url, shutdown, server) = spawn_mock_server(state.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("storyui.db");
    SqliteSessions::open(&db_path)
        .unwrap()
        .save(STORAGE_KEY, &[session("hero", 2), session("local", 1)])
        .unwrap();
    let handle = spawn_controller(&base_url, &db_path);

    let snapshot = timeout(TEST_TIMEOUT, handle.initialize())
        .await
        .expect("initialize timed out")
        .unwrap();
    assert!(snapshot.connection.connected);
    assert_eq!(snapshot.selected_provider.as_deref(), Some("claude"));
    assert_eq!(snapshot.orphans.len(), 1);
    assert_eq!(snapshot.orphans[0].id, "stray");

    let report = handle
        .bulk_delete(vec!["hero".into(), "stray".into()])
        .await
        .unwrap();
    assert!(report.failed().is_empty());
    assert_eq!(report.removed_locally, 1);
    assert_eq!(*state.deletes.lock().unwrap(), vec!["bulk:hero,stray".to_owned()]);

    let snapshot = handle.sync().await.unwrap();
    assert!(snapshot.orphans.is_empty());
    assert_eq!(snapshot.sessions.len(), 1);
    assert_eq!(snapshot.active_session_id.as_deref(), Some("local"));

    let _ = shutdown.send(());
    let _ = server.await;
}

#[tokio::test]
async fn unreachable_service_leaves_history_untouched() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_controller(&format!("http://{address}"), &dir.path().join("storyui.db"));

    let result = timeout(TEST_TIMEOUT, handle.generate("anything", Vec::new()))
        .await
        .expect("generation timed out");
    assert!(matches!(
        result,
        Err(ControllerError::Generation(GenerationError::TransportUnreachable(_)))
    ));

    let snapshot = handle.sync().await.unwrap();
    assert!(snapshot.conversation.is_empty());
    assert!(!snapshot.connection.connected);
}

#[tokio::test]
async fn stalled_listing_times_out_without_blocking_the_controller() {
    let state = MockState::default();
    *state.stall_listing.lock().unwrap() = true;
    let (base_url, shutdown, server) = spawn_mock_server(state).await;

    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_controller_with_timeout(
        &base_url,
        &dir.path().join("storyui.db"),
        Duration::from_millis(200),
    );

    let result = timeout(TEST_TIMEOUT, handle.refresh_orphans())
        .await
        .expect("listing was never bounded");
    assert!(matches!(result, Err(ControllerError::Transport(_))));

    let snapshot = timeout(TEST_TIMEOUT, handle.sync())
        .await
        .expect("controller stopped answering")
        .unwrap();
    assert!(snapshot.orphans.is_empty());

    // The stalled handler would hold up a graceful shutdown
    drop(shutdown);
    server.abort();
}
