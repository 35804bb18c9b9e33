//! Deleting history: local removal plus best-effort remote cleanup.
//!
//! Local removal always happens. The remote side goes primary delete, then
//! the legacy file-name path; a 404 from either counts as success.

use storyui_protocol::{Orphan, Session};
use tracing::{info, warn};

use crate::store::{SessionStore, StoreError};
use crate::transport::{ArtifactService, TransportError};

/// What happened to the remote artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Deleted,
    AlreadyGone,
    Failed(String),
}

impl RemoteOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RemoteOutcome::Failed(_))
    }
}

/// Something that may have a remote artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    pub id: String,
    pub file_name: String,
}

impl From<&Session> for DeleteTarget {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            file_name: session.file_name.clone(),
        }
    }
}

impl From<&Orphan> for DeleteTarget {
    fn from(orphan: &Orphan) -> Self {
        Self {
            id: orphan.id.clone(),
            file_name: orphan.file_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub id: String,
    pub removed_locally: bool,
    pub remote: RemoteOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDeleteReport {
    pub outcomes: Vec<(String, RemoteOutcome)>,
    pub removed_locally: usize,
}

impl BulkDeleteReport {
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearReport {
    pub remote: RemoteOutcome,
    pub removed_locally: usize,
}

/// Remove one artifact remotely, primary path first.
pub async fn delete_remote(artifacts: &dyn ArtifactService, target: &DeleteTarget) -> RemoteOutcome {
    let primary = match artifacts.delete_artifact(&target.id).await {
        Ok(()) => return RemoteOutcome::Deleted,
        Err(error) if error.is_already_gone() => return RemoteOutcome::AlreadyGone,
        Err(error) => error,
    };

    let legacy_key = if target.file_name.is_empty() {
        &target.id
    } else {
        &target.file_name
    };
    match artifacts.delete_artifact_legacy(legacy_key).await {
        Ok(()) => RemoteOutcome::Deleted,
        Err(error) if error.is_already_gone() => RemoteOutcome::AlreadyGone,
        Err(error) => {
            warn!(
                component = "history",
                event = "history.remote_delete_failed",
                id = %target.id,
                primary_error = %primary,
                legacy_error = %error,
                "Remote delete failed, removing locally anyway"
            );
            RemoteOutcome::Failed(error.to_string())
        }
    }
}

/// Delete a session (or orphan) by identity.
pub async fn delete(
    store: &mut SessionStore,
    artifacts: &dyn ArtifactService,
    target: &DeleteTarget,
) -> Result<DeleteReport, StoreError> {
    let remote = delete_remote(artifacts, target).await;
    let removed_locally = store.remove(&target.id)?.is_some();

    info!(
        component = "history",
        event = "history.deleted",
        id = %target.id,
        removed_locally,
        remote = ?remote,
        "Delete processed"
    );
    Ok(DeleteReport {
        id: target.id.clone(),
        removed_locally,
        remote,
    })
}

/// Delete several artifacts. Tries the bulk endpoint first and falls back to
/// one-by-one deletes when it is unavailable. Successes are never rolled back.
pub async fn bulk_delete(
    store: &mut SessionStore,
    artifacts: &dyn ArtifactService,
    targets: &[DeleteTarget],
) -> Result<BulkDeleteReport, StoreError> {
    if targets.is_empty() {
        return Ok(BulkDeleteReport::default());
    }
    let ids: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();

    let outcomes = match artifacts.delete_artifacts(&ids).await {
        Ok(()) => ids
            .iter()
            .map(|id| (id.clone(), RemoteOutcome::Deleted))
            .collect(),
        Err(error) => {
            warn!(
                component = "history",
                event = "history.bulk_delete_degraded",
                count = ids.len(),
                error = %error,
                "Bulk delete unavailable, deleting one by one"
            );
            let mut outcomes = Vec::with_capacity(targets.len());
            for target in targets {
                outcomes.push((target.id.clone(), delete_remote(artifacts, target).await));
            }
            outcomes
        }
    };

    let removed_locally = store.remove_many(&ids)?.len();
    let report = BulkDeleteReport {
        outcomes,
        removed_locally,
    };
    info!(
        component = "history",
        event = "history.bulk_deleted",
        requested = ids.len(),
        removed_locally,
        failed = report.failed().len(),
        "Bulk delete processed"
    );
    Ok(report)
}

/// Remove every generated artifact and the whole local history.
pub async fn clear_all(
    store: &mut SessionStore,
    artifacts: &dyn ArtifactService,
) -> Result<ClearReport, StoreError> {
    let remote = match artifacts.delete_all_artifacts().await {
        Ok(()) => RemoteOutcome::Deleted,
        Err(TransportError::NotFound) => RemoteOutcome::AlreadyGone,
        Err(error) => {
            warn!(
                component = "history",
                event = "history.clear_remote_failed",
                error = %error,
                "Failed to clear remote artifacts"
            );
            RemoteOutcome::Failed(error.to_string())
        }
    };
    let removed_locally = store.clear()?;
    Ok(ClearReport {
        remote,
        removed_locally,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemorySessions, SessionPersistence};
    use crate::reconcile::reconcile;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use storyui_protocol::RemoteArtifact;

    /// Scripted artifact service; unscripted calls succeed.
    #[derive(Default)]
    struct ScriptedArtifacts {
        responses: HashMap<String, TransportError>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedArtifacts {
        fn failing(mut self, call: &str, error: TransportError) -> Self {
            self.responses.insert(call.to_string(), error);
            self
        }

        fn respond(&self, call: String) -> Result<(), TransportError> {
            let result = match self.responses.get(&call) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            };
            self.calls.lock().unwrap().push(call);
            result
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArtifactService for ScriptedArtifacts {
        async fn list_artifacts(&self) -> Result<Vec<RemoteArtifact>, TransportError> {
            Ok(Vec::new())
        }

        async fn delete_artifact(&self, id: &str) -> Result<(), TransportError> {
            self.respond(format!("primary:{id}"))
        }

        async fn delete_artifact_legacy(&self, file_name: &str) -> Result<(), TransportError> {
            self.respond(format!("legacy:{file_name}"))
        }

        async fn delete_artifacts(&self, ids: &[String]) -> Result<(), TransportError> {
            self.respond(format!("bulk:{}", ids.join(",")))
        }

        async fn delete_all_artifacts(&self) -> Result<(), TransportError> {
            self.respond("all".to_string())
        }
    }

    fn unreachable() -> TransportError {
        TransportError::ConnectionRefused("connection refused".into())
    }

    fn seeded_store(ids: &[&str]) -> SessionStore {
        let memory = MemorySessions::new();
        let sessions: Vec<Session> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Session {
                id: id.to_string(),
                title: id.to_string(),
                file_name: format!("{id}.stories.tsx"),
                conversation: Vec::new(),
                last_updated: 100 - i as i64,
            })
            .collect();
        memory.save("k", &sessions).unwrap();
        let mut store = SessionStore::new(Box::new(memory), "k", 20);
        store.hydrate().unwrap();
        store
    }

    fn target(store: &SessionStore, id: &str) -> DeleteTarget {
        DeleteTarget::from(store.get(id).unwrap())
    }

    #[tokio::test]
    async fn primary_success_skips_legacy() {
        let mut store = seeded_store(&["a", "b"]);
        let artifacts = ScriptedArtifacts::default();
        let a = target(&store, "a");

        let report = delete(&mut store, &artifacts, &a).await.unwrap();

        assert_eq!(report.remote, RemoteOutcome::Deleted);
        assert!(report.removed_locally);
        assert_eq!(artifacts.calls(), vec!["primary:a"]);
        assert!(store.get("a").is_none());
    }

    #[tokio::test]
    async fn not_found_counts_as_deleted() {
        let mut store = seeded_store(&["a"]);
        let artifacts = ScriptedArtifacts::default().failing("primary:a", TransportError::NotFound);
        let a = target(&store, "a");

        let report = delete(&mut store, &artifacts, &a).await.unwrap();
        assert_eq!(report.remote, RemoteOutcome::AlreadyGone);
        assert_eq!(artifacts.calls(), vec!["primary:a"]);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_legacy_file_name() {
        let mut store = seeded_store(&["a"]);
        let artifacts = ScriptedArtifacts::default().failing(
            "primary:a",
            TransportError::BadStatus {
                status: 500,
                body: "boom".into(),
            },
        );
        let a = target(&store, "a");

        let report = delete(&mut store, &artifacts, &a).await.unwrap();
        assert_eq!(report.remote, RemoteOutcome::Deleted);
        assert_eq!(artifacts.calls(), vec!["primary:a", "legacy:a.stories.tsx"]);
    }

    #[tokio::test]
    async fn network_failure_still_removes_locally() {
        let mut store = seeded_store(&["a", "b"]);
        let artifacts = ScriptedArtifacts::default()
            .failing("primary:a", unreachable())
            .failing("legacy:a.stories.tsx", unreachable());
        let a = target(&store, "a");

        let report = delete(&mut store, &artifacts, &a).await.unwrap();
        assert!(report.remote.is_failed());
        assert!(report.removed_locally);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failed_remote_delete_leaves_one_orphan() {
        let mut store = seeded_store(&["a", "b"]);
        let listing: Vec<RemoteArtifact> = ["a", "b"]
            .iter()
            .map(|id| RemoteArtifact {
                id: id.to_string(),
                title: id.to_string(),
                file_name: format!("{id}.stories.tsx"),
                created_at: None,
                updated_at: None,
            })
            .collect();
        assert!(reconcile(store.sessions(), &listing).orphans.is_empty());

        let artifacts = ScriptedArtifacts::default()
            .failing("primary:b", unreachable())
            .failing("legacy:b.stories.tsx", unreachable());
        let b = target(&store, "b");
        let report = delete(&mut store, &artifacts, &b).await.unwrap();
        assert!(report.remote.is_failed());

        let result = reconcile(store.sessions(), &listing);
        assert_eq!(result.orphans.len(), 1);
        assert_eq!(result.orphans[0].id, "b");
        assert_eq!(result.orphans[0].file_name, "b.stories.tsx");
        assert!(result.detached.is_empty());
    }

    #[tokio::test]
    async fn bulk_delete_uses_bulk_endpoint() {
        let mut store = seeded_store(&["a", "b", "c"]);
        let artifacts = ScriptedArtifacts::default();
        let targets = vec![target(&store, "a"), target(&store, "c")];

        let report = bulk_delete(&mut store, &artifacts, &targets).await.unwrap();
        assert_eq!(artifacts.calls(), vec!["bulk:a,c"]);
        assert_eq!(report.removed_locally, 2);
        assert!(report.failed().is_empty());
        assert_eq!(store.sessions()[0].id, "b");
    }

    #[tokio::test]
    async fn bulk_delete_degrades_and_reports_partial_failure() {
        let mut store = seeded_store(&["a", "b"]);
        let artifacts = ScriptedArtifacts::default()
            .failing("bulk:a,b,orphan", TransportError::NotFound)
            .failing("primary:b", unreachable())
            .failing("legacy:b.stories.tsx", unreachable());
        let targets = vec![
            target(&store, "a"),
            target(&store, "b"),
            DeleteTarget {
                id: "orphan".into(),
                file_name: "orphan.stories.tsx".into(),
            },
        ];

        let report = bulk_delete(&mut store, &artifacts, &targets).await.unwrap();

        assert_eq!(report.failed(), vec!["b"]);
        assert_eq!(report.removed_locally, 2);
        assert!(store.is_empty());
        assert_eq!(
            artifacts.calls(),
            vec![
                "bulk:a,b,orphan",
                "primary:a",
                "primary:b",
                "legacy:b.stories.tsx",
                "primary:orphan",
            ]
        );
    }

    #[tokio::test]
    async fn clear_all_empties_history_even_when_remote_fails() {
        let mut store = seeded_store(&["a", "b"]);
        let artifacts = ScriptedArtifacts::default().failing("all", unreachable());

        let report = clear_all(&mut store, &artifacts).await.unwrap();
        assert!(report.remote.is_failed());
        assert_eq!(report.removed_locally, 2);
        assert!(store.is_empty());
    }
}
