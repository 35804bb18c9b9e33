//! Session store - the bounded, persisted history of conversations.
//!
//! Sessions are kept newest-first by `last_updated`. Every mutation builds
//! the next list, persists it, and only then swaps it in, so a failed write
//! leaves the in-memory history untouched.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info};

use storyui_protocol::{CompletionFeedback, Session, Turn};

use crate::persistence::{PersistError, SessionPersistence};

pub const UNTITLED: &str = "Untitled Story";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("title must not be empty")]
    EmptyTitle,

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// What the controller knows about the conversation a completion belongs to
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    /// Active session, if the request continued one
    pub session_id: Option<String>,
    /// Full conversation including the final generator turn
    pub turns: Vec<Turn>,
    /// The requester's prompt, used as a title of last resort
    pub prompt: String,
}

pub struct SessionStore {
    persistence: Box<dyn SessionPersistence>,
    storage_key: String,
    max_sessions: usize,
    sessions: Vec<Session>,
}

impl SessionStore {
    pub fn new(
        persistence: Box<dyn SessionPersistence>,
        storage_key: impl Into<String>,
        max_sessions: usize,
    ) -> Self {
        Self {
            persistence,
            storage_key: storage_key.into(),
            max_sessions: max_sessions.max(1),
            sessions: Vec::new(),
        }
    }

    /// Load persisted history, newest first, capped at the maximum.
    pub fn hydrate(&mut self) -> Result<&[Session], StoreError> {
        let mut loaded = self.persistence.load(&self.storage_key)?;
        sort_newest_first(&mut loaded);
        let mut seen = HashSet::new();
        loaded.retain(|s| seen.insert(s.id.clone()));
        loaded.truncate(self.max_sessions);

        info!(
            component = "store",
            event = "store.hydrated",
            storage_key = %self.storage_key,
            sessions = loaded.len(),
            "Session history loaded"
        );
        self.sessions = loaded;
        Ok(&self.sessions)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn newest(&self) -> Option<&Session> {
        self.sessions.first()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Record a successful generation.
    ///
    /// Continuing an existing session updates its artifact name, turns and
    /// timestamp in place. Otherwise a new session is created with identity
    /// `storyId`, then `fileName`, then the timestamp; any stored session
    /// with that identity is replaced.
    pub fn upsert_from_completion(
        &mut self,
        context: &ConversationContext,
        completion: &CompletionFeedback,
        now_ms: i64,
    ) -> Result<Session, StoreError> {
        let mut next = self.sessions.clone();

        let existing = context
            .session_id
            .as_deref()
            .and_then(|id| next.iter().position(|s| s.id == id));

        let session = match existing {
            Some(index) => {
                // The title stays as the user last saw (or renamed) it
                let session = &mut next[index];
                session.file_name = non_empty(completion.file_name.as_deref())
                    .or_else(|| non_empty(Some(session.file_name.as_str())))
                    .unwrap_or(session.id.as_str())
                    .to_string();
                session.conversation = context.turns.clone();
                session.last_updated = now_ms;
                session.clone()
            }
            None => {
                let id = non_empty(completion.story_id.as_deref())
                    .or_else(|| non_empty(completion.file_name.as_deref()))
                    .map(str::to_string)
                    .unwrap_or_else(|| now_ms.to_string());
                let title = non_empty(completion.title.as_deref())
                    .or_else(|| non_empty(Some(context.prompt.as_str())))
                    .unwrap_or(UNTITLED)
                    .to_string();
                let file_name = non_empty(completion.file_name.as_deref())
                    .unwrap_or_default()
                    .to_string();

                let session = Session {
                    id,
                    title,
                    file_name,
                    conversation: context.turns.clone(),
                    last_updated: now_ms,
                };
                next.retain(|s| s.id != session.id);
                next.insert(0, session.clone());
                session
            }
        };

        sort_newest_first(&mut next);
        let evicted = evict_overflow(&mut next, self.max_sessions);
        self.commit(next)?;

        debug!(
            component = "store",
            event = "store.upserted",
            session_id = %session.id,
            created = existing.is_none(),
            evicted = evicted.len(),
            "Session recorded"
        );
        Ok(session)
    }

    /// Rename a session locally. Does not touch its timestamp.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<Session, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::EmptyTitle);
        }

        let mut next = self.sessions.clone();
        let session = next
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        session.title = title.to_string();
        let renamed = session.clone();

        self.commit(next)?;
        Ok(renamed)
    }

    /// Remove a session. Removing an unknown id is not an error.
    pub fn remove(&mut self, id: &str) -> Result<Option<Session>, StoreError> {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        let mut next = self.sessions.clone();
        let removed = next.remove(index);
        self.commit(next)?;
        Ok(Some(removed))
    }

    pub fn remove_many(&mut self, ids: &[String]) -> Result<Vec<Session>, StoreError> {
        let (removed, kept): (Vec<Session>, Vec<Session>) = self
            .sessions
            .iter()
            .cloned()
            .partition(|s| ids.iter().any(|id| *id == s.id));
        if removed.is_empty() {
            return Ok(removed);
        }
        self.commit(kept)?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<usize, StoreError> {
        let count = self.sessions.len();
        self.commit(Vec::new())?;
        Ok(count)
    }

    fn commit(&mut self, next: Vec<Session>) -> Result<(), StoreError> {
        self.persistence.save(&self.storage_key, &next)?;
        self.sessions = next;
        Ok(())
    }
}

fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
}

/// Drop the least-recently-updated sessions beyond `max`. Expects newest-first order.
fn evict_overflow(sessions: &mut Vec<Session>, max: usize) -> Vec<Session> {
    if sessions.len() <= max {
        return Vec::new();
    }
    sessions.split_off(max)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySessions;

    const KEY: &str = "story-ui-chats";

    fn store_with(memory: &MemorySessions, max: usize) -> SessionStore {
        SessionStore::new(Box::new(memory.clone()), KEY, max)
    }

    fn session(id: &str, last_updated: i64) -> Session {
        Session {
            id: id.to_string(),
            title: format!("Story {id}"),
            file_name: format!("{id}.stories.tsx"),
            conversation: Vec::new(),
            last_updated,
        }
    }

    fn completion(story_id: Option<&str>, file_name: Option<&str>, title: Option<&str>) -> CompletionFeedback {
        CompletionFeedback {
            success: true,
            story_id: story_id.map(str::to_string),
            file_name: file_name.map(str::to_string),
            title: title.map(str::to_string),
            ..Default::default()
        }
    }

    fn context(session_id: Option<&str>, prompt: &str) -> ConversationContext {
        ConversationContext {
            session_id: session_id.map(str::to_string),
            turns: vec![
                Turn::requester(prompt, Vec::new()),
                Turn::generator("done"),
            ],
            prompt: prompt.to_string(),
        }
    }

    #[test]
    fn hydrate_sorts_newest_first_and_caps() {
        let memory = MemorySessions::new();
        memory
            .save(KEY, &[session("a", 1), session("c", 3), session("b", 2)])
            .unwrap();

        let mut store = store_with(&memory, 2);
        let ids: Vec<_> = store.hydrate().unwrap().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(store.newest().unwrap().id, "c");
    }

    #[test]
    fn new_session_identity_prefers_story_id_then_file_name_then_timestamp() {
        let mut store = store_with(&MemorySessions::new(), 20);

        let a = store
            .upsert_from_completion(&context(None, "card"), &completion(Some("s1"), Some("f1.tsx"), None), 10)
            .unwrap();
        assert_eq!(a.id, "s1");
        assert_eq!(a.title, "card");

        let b = store
            .upsert_from_completion(&context(None, "x"), &completion(None, Some("f2.tsx"), Some("Two")), 11)
            .unwrap();
        assert_eq!(b.id, "f2.tsx");
        assert_eq!(b.title, "Two");

        let c = store
            .upsert_from_completion(&context(None, "  "), &completion(None, None, None), 12)
            .unwrap();
        assert_eq!(c.id, "12");
        assert_eq!(c.file_name, "");
        assert_eq!(c.title, UNTITLED);
    }

    #[test]
    fn existing_session_updates_in_place() {
        let memory = MemorySessions::new();
        memory.save(KEY, &[session("a", 1), session("b", 2)]).unwrap();
        let mut store = store_with(&memory, 20);
        store.hydrate().unwrap();

        let updated = store
            .upsert_from_completion(
                &context(Some("a"), "make it blue"),
                &completion(Some("other-id"), None, Some("Blue Card")),
                50,
            )
            .unwrap();

        assert_eq!(updated.id, "a");
        assert_eq!(updated.title, "Story a");
        assert_eq!(updated.file_name, "a.stories.tsx");
        assert_eq!(updated.conversation.len(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.newest().unwrap().id, "a");
        assert_eq!(memory.load(KEY).unwrap()[0].last_updated, 50);
    }

    #[test]
    fn new_session_replaces_same_identity() {
        let memory = MemorySessions::new();
        memory.save(KEY, &[session("s1", 1), session("b", 2)]).unwrap();
        let mut store = store_with(&memory, 20);
        store.hydrate().unwrap();

        store
            .upsert_from_completion(&context(None, "again"), &completion(Some("s1"), None, Some("Again")), 9)
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("s1").unwrap().title, "Again");
    }

    #[test]
    fn full_store_evicts_least_recently_updated() {
        let memory = MemorySessions::new();
        let seeded: Vec<_> = (0..3).map(|i| session(&format!("s{i}"), 100 + i)).collect();
        memory.save(KEY, &seeded).unwrap();
        let mut store = store_with(&memory, 3);
        store.hydrate().unwrap();

        store
            .upsert_from_completion(&context(None, "new"), &completion(Some("fresh"), None, None), 500)
            .unwrap();

        let ids: Vec<_> = store.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "s2", "s1"]);
    }

    #[test]
    fn rename_rejects_blank_titles() {
        let memory = MemorySessions::new();
        memory.save(KEY, &[session("a", 1)]).unwrap();
        let mut store = store_with(&memory, 20);
        store.hydrate().unwrap();

        assert!(matches!(store.rename("a", "   "), Err(StoreError::EmptyTitle)));
        assert!(matches!(store.rename("zz", "T"), Err(StoreError::NotFound(_))));

        let renamed = store.rename("a", "  Hero Banner ").unwrap();
        assert_eq!(renamed.title, "Hero Banner");
        assert_eq!(renamed.last_updated, 1);
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let memory = MemorySessions::new();
        memory.save(KEY, &[session("a", 1)]).unwrap();
        let mut store = store_with(&memory, 20);
        store.hydrate().unwrap();

        memory.reject_writes(true);
        assert!(store.remove("a").is_err());
        assert!(store
            .upsert_from_completion(&context(None, "p"), &completion(Some("b"), None, None), 5)
            .is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().title, "Story a");
    }

    #[test]
    fn remove_many_and_clear() {
        let memory = MemorySessions::new();
        memory
            .save(KEY, &[session("a", 3), session("b", 2), session("c", 1)])
            .unwrap();
        let mut store = store_with(&memory, 20);
        store.hydrate().unwrap();

        assert_eq!(store.remove("missing").unwrap(), None);
        let removed = store.remove_many(&["a".into(), "c".into(), "nope".into()]).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.sessions()[0].id, "b");

        assert_eq!(store.clear().unwrap(), 1);
        assert!(memory.load(KEY).unwrap().is_empty());
    }
}
