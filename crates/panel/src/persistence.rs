//! Persistence layer - session history in SQLite
//!
//! The history is stored as one JSON document per storage key, so the whole
//! bounded list is replaced in a single statement and readers never observe
//! a partial write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

use storyui_protocol::Session;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Storage backend for the session history
pub trait SessionPersistence: Send {
    fn load(&self, key: &str) -> Result<Vec<Session>, PersistError>;
    fn save(&self, key: &str, sessions: &[Session]) -> Result<(), PersistError>;
}

/// SQLite-backed history (`local_state` table)
pub struct SqliteSessions {
    db_path: PathBuf,
}

impl SqliteSessions {
    /// Open (and create if needed) the database at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = connect(&db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS local_state (
                storage_key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )?;

        info!(
            component = "persistence",
            event = "persistence.opened",
            db_path = %db_path.display(),
            "Session history database ready"
        );
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl SessionPersistence for SqliteSessions {
    fn load(&self, key: &str) -> Result<Vec<Session>, PersistError> {
        let conn = connect(&self.db_path)?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM local_state WHERE storage_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(stored.map(|raw| decode_history(key, &raw)).unwrap_or_default())
    }

    fn save(&self, key: &str, sessions: &[Session]) -> Result<(), PersistError> {
        let value = serde_json::to_string(sessions)?;
        let conn = connect(&self.db_path)?;
        conn.execute(
            "INSERT INTO local_state (storage_key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(storage_key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, now_millis()],
        )?;
        debug!(
            component = "persistence",
            event = "persistence.saved",
            storage_key = %key,
            sessions = sessions.len(),
            "Persisted session history"
        );
        Ok(())
    }
}

/// In-memory history, for tests and ephemeral runs
#[derive(Clone, Default)]
pub struct MemorySessions {
    documents: Arc<Mutex<HashMap<String, String>>>,
    reject_writes: Arc<Mutex<bool>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document, bypassing serialization
    pub fn insert_raw(&self, key: &str, raw: &str) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(key.to_string(), raw.to_string());
        }
    }

    /// Make subsequent saves fail
    pub fn reject_writes(&self, reject: bool) {
        if let Ok(mut flag) = self.reject_writes.lock() {
            *flag = reject;
        }
    }
}

impl SessionPersistence for MemorySessions {
    fn load(&self, key: &str) -> Result<Vec<Session>, PersistError> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| PersistError::Unavailable("memory store poisoned".into()))?;
        Ok(documents
            .get(key)
            .map(|raw| decode_history(key, raw))
            .unwrap_or_default())
    }

    fn save(&self, key: &str, sessions: &[Session]) -> Result<(), PersistError> {
        let rejected = self
            .reject_writes
            .lock()
            .map(|flag| *flag)
            .unwrap_or(true);
        if rejected {
            return Err(PersistError::Unavailable("writes rejected".into()));
        }
        let value = serde_json::to_string(sessions)?;
        self.documents
            .lock()
            .map_err(|_| PersistError::Unavailable("memory store poisoned".into()))?
            .insert(key.to_string(), value);
        Ok(())
    }
}

fn connect(db_path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(db_path)?;

    // Set up connection for concurrent access
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Corrupt history is logged and treated as empty rather than failing startup.
fn decode_history(key: &str, raw: &str) -> Vec<Session> {
    match serde_json::from_str(raw) {
        Ok(sessions) => sessions,
        Err(error) => {
            warn!(
                component = "persistence",
                event = "persistence.corrupt_history",
                storage_key = %key,
                error = %error,
                "Failed to load session history, starting empty"
            );
            Vec::new()
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
