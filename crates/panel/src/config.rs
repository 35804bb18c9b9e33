//! Controller configuration and endpoint layout.
//!
//! Base URL priority: explicit value (`--base-url` / `STORY_UI_EDGE_URL`) >
//! `http://localhost:<port>` with the port from `--port` / `STORY_UI_PORT`.

use reqwest::Url;

pub const DEFAULT_PORT: u16 = 4001;
pub const DEFAULT_STORAGE_KEY: &str = "story-ui-chats";
pub const MAX_RECENT_SESSIONS: usize = 20;

/// Resolved configuration for one controller instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    pub base_url: String,
    pub storage_key: String,
    pub max_sessions: usize,
}

impl PanelConfig {
    pub fn new(base_url: Option<&str>, port: u16) -> Self {
        let base_url = match base_url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{port}"),
        };
        Self {
            base_url,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            max_sessions: MAX_RECENT_SESSIONS,
        }
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            base: self.base_url.clone(),
        }
    }

    /// True when talking to a hosted deployment rather than a local server.
    pub fn is_edge_mode(&self) -> bool {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(|host| !is_local_host(host)))
            .unwrap_or(false)
    }

    /// Short human label for the connection target.
    pub fn connection_label(&self) -> String {
        let Ok(url) = Url::parse(&self.base_url) else {
            return self.base_url.clone();
        };
        let host = url.host_str().unwrap_or_default();
        if is_local_host(host) {
            format!("localhost:{}", url.port_or_known_default().unwrap_or(DEFAULT_PORT))
        } else {
            format!("Cloud ({host})")
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self::new(None, DEFAULT_PORT)
    }
}

pub fn is_local_host(host: &str) -> bool {
    host == "localhost"
        || host == "127.0.0.1"
        || host.starts_with("192.168.")
        || host.starts_with("10.")
}

/// URL layout of the generation service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn generate_stream(&self) -> String {
        format!("{}/mcp/generate-story-stream", self.base)
    }

    pub fn generate(&self) -> String {
        format!("{}/mcp/generate-story", self.base)
    }

    pub fn providers(&self) -> String {
        format!("{}/mcp/providers", self.base)
    }

    pub fn considerations(&self) -> String {
        format!("{}/mcp/considerations", self.base)
    }

    pub fn stories(&self) -> String {
        format!("{}/story-ui/stories", self.base)
    }

    pub fn story(&self, id: &str) -> String {
        format!("{}/story-ui/stories/{}", self.base, urlencoding::encode(id))
    }

    pub fn legacy_delete(&self, file_name: &str) -> String {
        format!("{}/story-ui/delete/{}", self.base, urlencoding::encode(file_name))
    }

    pub fn bulk_delete(&self) -> String {
        format!("{}/story-ui/stories/delete-bulk", self.base)
    }
}
