//! Conversation text for terminal outcomes.

use std::fmt::Write as _;

use storyui_protocol::CompletionFeedback;

const MAX_LISTED_COMPONENTS: usize = 5;
const GENERIC_TIP: &str = "review the generated code";

/// One-time hint appended to the first newly created story
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshHint {
    /// Hosted deployment, the story was saved remotely
    Cloud,
    /// Local server, Storybook may need a reload
    Local,
}

impl RefreshHint {
    fn text(self) -> &'static str {
        match self {
            RefreshHint::Cloud => "_Story saved to cloud._",
            RefreshHint::Local => {
                "_Might need to refresh Storybook (Cmd/Ctrl + R) to see new stories._"
            }
        }
    }
}

/// Summarize a streamed completion as a generator turn.
pub fn success_message(
    completion: &CompletionFeedback,
    title: &str,
    is_update: bool,
    hint: Option<RefreshHint>,
) -> String {
    let marker = if completion.success {
        "[SUCCESS]"
    } else {
        "[ERROR]"
    };
    let verb = if is_update { "Updated" } else { "Created" };
    let mut message = format!("{marker} **{verb}: \"{title}\"**");

    if !completion.components_used.is_empty() {
        let names = completion
            .components_used
            .iter()
            .take(MAX_LISTED_COMPONENTS)
            .map(|c| format!("`{}`", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let more = if completion.components_used.len() > MAX_LISTED_COMPONENTS {
            "..."
        } else {
            ""
        };
        let _ = write!(message, "\nBuilt with {names}{more}.");
    }

    if let Some(layout) = completion.layout_choices.first() {
        let _ = write!(message, "\n\n**Layout:** {} - {}.", layout.pattern, layout.reason);
    }

    if completion
        .validation
        .as_ref()
        .is_some_and(|v| v.auto_fix_applied)
    {
        message.push_str(
            "\n\n[WRENCH] **Auto-fixed:** Minor syntax issues were automatically corrected.",
        );
    }

    if let Some(tip) = completion
        .suggestions
        .first()
        .filter(|tip| !tip.to_lowercase().contains(GENERIC_TIP))
    {
        let _ = write!(message, "\n\n[TIP] **Tip:** {tip}");
    }

    if let Some(hint) = hint.filter(|_| !is_update) {
        let _ = write!(message, "\n\n{}", hint.text());
    }

    if let Some(ms) = completion
        .metrics
        .as_ref()
        .map(|m| m.total_time_ms)
        .filter(|ms| *ms > 0)
    {
        let _ = write!(message, "\n\n_{:.1}s_", ms as f64 / 1000.0);
    }

    message
}

/// Generator turn for a successful non-streaming generation
pub fn fallback_success_message(title: &str) -> String {
    format!("[SUCCESS] **Created: \"{title}\"**\n\nStory generated successfully.")
}

/// Generator turn for a failed request
pub fn error_message(message: &str, suggestion: Option<&str>) -> String {
    match suggestion.map(str::trim).filter(|s| !s.is_empty()) {
        Some(suggestion) => format!("Error: {message}\n\n{suggestion}"),
        None => format!("Error: {message}"),
    }
}

/// Short age label for a history entry, e.g. `5m ago`.
pub fn relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let minutes = now_ms.saturating_sub(timestamp_ms).max(0) / 60_000;
    let hours = minutes / 60;
    let days = hours / 24;

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        chrono::DateTime::from_timestamp_millis(timestamp_ms)
            .map(|at| at.format("%b %-d, %Y").to_string())
            .unwrap_or_default()
    }
}
