//! Where Story UI keeps its local files.
//!
//! Resolved once at startup from: `--data-dir` > `STORYUI_DATA_DIR` env > `~/.storyui`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const DATA_DIR_ENV: &str = "STORYUI_DATA_DIR";

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Initialize the global data directory and return it.
///
/// Panics when no explicit path or env override is given and the home
/// directory cannot be determined.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = match explicit {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            Some(env_val) => PathBuf::from(env_val),
            None => dirs::home_dir()
                .expect("HOME directory not found")
                .join(".storyui"),
        },
    };

    let mut guard = DATA_DIR.write().expect("DATA_DIR lock poisoned");
    *guard = Some(dir.clone());
    dir
}

/// Current data directory. Panics if `init_data_dir` hasn't been called.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .expect("DATA_DIR lock poisoned")
        .clone()
        .expect("data_dir() called before init_data_dir()")
}

/// SQLite database holding the session history
pub fn db_path() -> PathBuf {
    data_dir().join("storyui.db")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(log_dir())
}

#[cfg(test)]
pub fn reset_data_dir() {
    let mut guard = DATA_DIR.write().expect("DATA_DIR lock poisoned");
    *guard = None;
}
