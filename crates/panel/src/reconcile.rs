//! Pure reconciliation of local history against the remote artifact listing.

use storyui_protocol::{Orphan, RemoteArtifact, Session};

/// Result of comparing local sessions with the remote listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Remote artifacts no local session refers to, in listing order
    pub orphans: Vec<Orphan>,
    /// Local sessions whose artifact is missing from the listing
    pub detached: Vec<String>,
}

/// A remote artifact belongs to a session when their identities match, or
/// when both carry the same non-empty file name.
pub fn reconcile(sessions: &[Session], listing: &[RemoteArtifact]) -> Reconciliation {
    let orphans = listing
        .iter()
        .filter(|artifact| !sessions.iter().any(|s| matches(s, artifact)))
        .map(Orphan::from)
        .collect();

    let detached = sessions
        .iter()
        .filter(|s| !listing.iter().any(|artifact| matches(s, artifact)))
        .map(|s| s.id.clone())
        .collect();

    Reconciliation { orphans, detached }
}

fn matches(session: &Session, artifact: &RemoteArtifact) -> bool {
    session.id == artifact.id
        || (!artifact.file_name.is_empty() && artifact.file_name == session.file_name)
}
