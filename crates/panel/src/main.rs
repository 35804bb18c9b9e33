//! Story UI CLI
//!
//! Generate Storybook stories from the terminal and manage the local
//! generation history.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use console::{style, Term};
use tokio::sync::broadcast;
use tracing::info;

use storyui::attachments::attach_files;
use storyui::config::{DEFAULT_PORT, DEFAULT_STORAGE_KEY, MAX_RECENT_SESSIONS};
use storyui::history::RemoteOutcome;
use storyui::summary::relative_time;
use storyui::{
    logging, paths, ControllerHandle, PanelConfig, PanelEvent, SessionStore, SqliteSessions,
    StoryUiClient,
};
use storyui_protocol::{Role, StreamingState};

#[derive(Parser)]
#[command(name = "storyui", version)]
#[command(about = "Story UI - generate Storybook stories from the terminal", long_about = None)]
struct Cli {
    /// Generation service URL (overrides --port)
    #[arg(long, global = true, env = "STORY_UI_EDGE_URL")]
    base_url: Option<String>,

    /// Port of a local generation service
    #[arg(long, global = true, env = "STORY_UI_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Data directory [default: ~/.storyui]
    #[arg(long, global = true, env = "STORYUI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true, default_value = DEFAULT_STORAGE_KEY)]
    storage_key: String,

    /// Number of sessions kept in the local history
    #[arg(long, global = true, default_value_t = MAX_RECENT_SESSIONS)]
    max_sessions: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ImageArgs {
    /// Screenshot or mockup to build from (repeatable)
    #[arg(short, long = "image")]
    files: Vec<PathBuf>,

    /// Pasted image as a `data:image/...;base64,` URI (repeatable)
    #[arg(long = "image-data", value_name = "DATA_URI")]
    data_uris: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a story, or refine one from the history
    Generate {
        /// What to build
        prompt: Vec<String>,

        #[command(flatten)]
        images: ImageArgs,

        /// Continue the session with this id
        #[arg(short, long, conflicts_with = "resume")]
        session: Option<String>,

        /// Continue the most recent session
        #[arg(short = 'c', long = "continue")]
        resume: bool,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,
    },
    /// List the local session history
    List,
    /// Print the conversation of one session
    Show { id: String },
    /// Stories on the service that the local history does not know about
    Orphans,
    Rename { id: String, title: String },
    /// Delete stories locally and on the service
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete every story and the whole local history
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
    /// Model providers configured on the service
    Providers,
    /// Connection and history status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = paths::init_data_dir(cli.data_dir.as_deref());
    paths::ensure_dirs()?;
    let logging = logging::init_logging(&paths::log_dir())?;

    let config = PanelConfig::new(cli.base_url.as_deref(), cli.port)
        .with_storage_key(cli.storage_key)
        .with_max_sessions(cli.max_sessions);
    info!(
        component = "cli",
        event = "cli.started",
        run_id = %logging.run_id,
        data_dir = %data_dir.display(),
        base_url = %config.base_url,
        "Story UI CLI started"
    );

    let client = Arc::new(StoryUiClient::new(config.endpoints()));
    let persistence = SqliteSessions::open(paths::db_path())
        .with_context(|| format!("failed to open {}", paths::db_path().display()))?;
    let store = SessionStore::new(
        Box::new(persistence),
        config.storage_key.clone(),
        config.max_sessions,
    );
    let handle = ControllerHandle::spawn(client.clone(), client, store, config.clone());

    match cli.command {
        Commands::Generate {
            prompt,
            images,
            session,
            resume,
            provider,
            model,
        } => {
            generate(
                &handle,
                prompt.join(" "),
                images,
                session,
                resume,
                provider,
                model,
            )
            .await
        }
        Commands::List => list(&handle),
        Commands::Show { id } => show(&handle, &id),
        Commands::Orphans => orphans(&handle).await,
        Commands::Rename { id, title } => {
            handle.rename(&id, &title).await?;
            println!("{} Renamed {} to \"{}\"", style("✓").green(), id, title.trim());
            Ok(())
        }
        Commands::Delete { ids } => delete(&handle, ids).await,
        Commands::Clear { yes } => clear(&handle, yes).await,
        Commands::Providers => providers(&handle).await,
        Commands::Status => status(&handle, &config, &data_dir).await,
    }
}

async fn generate(
    handle: &ControllerHandle,
    prompt: String,
    images: ImageArgs,
    session: Option<String>,
    resume: bool,
    provider: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let snapshot = handle.initialize().await?;
    if !snapshot.connection.connected {
        bail!(
            "{}",
            snapshot
                .connection
                .error
                .as_deref()
                .unwrap_or("Cannot connect to generation service")
        );
    }

    match session {
        Some(id) => handle.select_session(id).await?,
        None if resume => {}
        None => handle.new_chat().await?,
    }
    if let Some(provider) = provider {
        handle.set_provider(provider).await?;
    }
    if let Some(model) = model {
        handle.set_model(model).await?;
    }

    let mut attached = attach_files(0, &images.files);
    attached.add_data_uris(&images.data_uris);
    if let Some(errors) = attached.error_text() {
        eprintln!("{}", style(errors).yellow());
    }

    let printer = tokio::spawn(render_progress(handle.subscribe()));
    let result = tokio::select! {
        result = handle.generate(prompt, attached.images) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(result) = result else {
        handle.cancel().await?;
        handle.sync().await?;
        printer.abort();
        eprintln!("{}", style("Cancelled").yellow());
        return Ok(());
    };
    let _ = printer.await;

    let outcome = result?;
    println!();
    println!("{}", outcome.message);
    if let Some(session) = outcome.session {
        println!();
        println!("{} {}", style("session").dim(), session.id);
    }
    Ok(())
}

async fn render_progress(mut events: broadcast::Receiver<PanelEvent>) {
    let mut last = StreamingState::default();
    loop {
        match events.recv().await {
            Ok(PanelEvent::StreamingUpdated { state, .. }) => {
                print_changes(&last, &state);
                last = *state;
            }
            Ok(PanelEvent::FallbackStarted { .. }) => {
                let _ = Term::stderr().write_line(&format!(
                    "{}",
                    style("Streaming unavailable, retrying without live progress").yellow()
                ));
            }
            Ok(PanelEvent::GenerationFinished { .. }) | Err(broadcast::error::RecvError::Closed) => {
                break
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
}

fn print_changes(last: &StreamingState, state: &StreamingState) {
    let term = Term::stderr();
    if let Some(intent) = state.intent.as_ref().filter(|i| last.intent.as_ref() != Some(*i)) {
        let _ = term.write_line(&format!(
            "{} {} ({})",
            style("plan").cyan(),
            intent.title,
            intent.components.join(", ")
        ));
    }
    if let Some(progress) = state
        .progress
        .as_ref()
        .filter(|p| last.progress.as_ref() != Some(*p))
    {
        let _ = term.write_line(&format!(
            "{} {}",
            style(format!("[{}/{}]", progress.step, progress.total_steps)).dim(),
            progress.message
        ));
    }
    if let Some(validation) = state
        .validation
        .as_ref()
        .filter(|v| last.validation.as_ref() != Some(*v) && !v.is_valid)
    {
        let _ = term.write_line(&format!(
            "{} {}",
            style("validation").yellow(),
            validation.errors.join("; ")
        ));
    }
    if let Some(retry) = state.retry.as_ref().filter(|r| last.retry.as_ref() != Some(*r)) {
        let _ = term.write_line(&format!(
            "{} attempt {}/{}: {}",
            style("retry").yellow(),
            retry.attempt,
            retry.max_attempts,
            retry.reason
        ));
    }
}

fn list(handle: &ControllerHandle) -> Result<()> {
    let snapshot = handle.snapshot();
    if snapshot.sessions.is_empty() {
        println!("{}", style("No stories yet").dim());
        return Ok(());
    }

    let now = now_millis();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Title", "Turns", "Updated"]);
    for session in &snapshot.sessions {
        table.add_row(vec![
            session.id.clone(),
            session.title.clone(),
            session.conversation.len().to_string(),
            relative_time(session.last_updated, now),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn show(handle: &ControllerHandle, id: &str) -> Result<()> {
    let snapshot = handle.snapshot();
    let session = snapshot
        .sessions
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| anyhow!("no session with id {id}"))?;

    println!("{}", style(&session.title).bold());
    for turn in &session.conversation {
        let label = match turn.role {
            Role::Requester => style("you").cyan(),
            Role::Generator => style("story-ui").green(),
        };
        println!();
        println!("{label}");
        println!("{}", turn.content);
    }
    Ok(())
}

async fn orphans(handle: &ControllerHandle) -> Result<()> {
    let reconciliation = handle.refresh_orphans().await?;
    if reconciliation.orphans.is_empty() {
        println!("{}", style("Every story on the service is in the history").dim());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_header(vec!["ID", "Title", "File"]);
    for orphan in &reconciliation.orphans {
        table.add_row(vec![
            orphan.id.clone(),
            orphan.title.clone(),
            orphan.file_name.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn delete(handle: &ControllerHandle, ids: Vec<String>) -> Result<()> {
    // Orphans are only deletable once they are known
    let _ = handle.refresh_orphans().await;

    if let [id] = ids.as_slice() {
        let report = handle.delete(id.clone()).await?;
        print_remote(&report.id, &report.remote);
        return Ok(());
    }

    let report = handle.bulk_delete(ids).await?;
    for (id, outcome) in &report.outcomes {
        print_remote(id, outcome);
    }
    let failed = report.failed();
    if !failed.is_empty() {
        bail!("{} of {} deletes failed on the service", failed.len(), report.outcomes.len());
    }
    Ok(())
}

fn print_remote(id: &str, outcome: &RemoteOutcome) {
    match outcome {
        RemoteOutcome::Deleted => println!("{} {id}", style("deleted").green()),
        RemoteOutcome::AlreadyGone => println!("{} {id}", style("already gone").dim()),
        RemoteOutcome::Failed(reason) => {
            eprintln!("{} {id}: {reason}", style("failed").red())
        }
    }
}

async fn clear(handle: &ControllerHandle, yes: bool) -> Result<()> {
    if !yes {
        let count = handle.snapshot().sessions.len();
        let term = Term::stderr();
        write!(
            &term,
            "Delete all stories and {count} local session(s)? [y/N] "
        )?;
        let answer = term.read_line()?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            return Ok(());
        }
    }

    let report = handle.clear_all().await?;
    if let RemoteOutcome::Failed(reason) = &report.remote {
        eprintln!("{} {reason}", style("service delete failed:").red());
    }
    println!("Removed {} local session(s)", report.removed_locally);
    Ok(())
}

async fn providers(handle: &ControllerHandle) -> Result<()> {
    let snapshot = handle.initialize().await?;
    if !snapshot.connection.connected {
        bail!("Cannot connect to generation service");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["", "Provider", "Name", "Models"]);
    for provider in &snapshot.providers {
        let selected = snapshot.selected_provider.as_deref() == Some(provider.provider_type.as_str());
        let models = provider
            .models
            .iter()
            .map(|m| {
                if selected && snapshot.selected_model.as_deref() == Some(m.as_str()) {
                    format!("{m} *")
                } else {
                    m.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            if selected { "*" } else { "" }.to_string(),
            provider.provider_type.clone(),
            provider.name.clone(),
            models,
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn status(
    handle: &ControllerHandle,
    config: &PanelConfig,
    data_dir: &std::path::Path,
) -> Result<()> {
    let snapshot = handle.initialize().await?;
    let connection = if snapshot.connection.connected {
        style("connected".to_string()).green()
    } else {
        style(format!(
            "offline ({})",
            snapshot.connection.error.as_deref().unwrap_or("unknown")
        ))
        .red()
    };

    println!("{:<10} {} {}", "service", config.connection_label(), connection);
    println!("{:<10} {}", "history", snapshot.sessions.len());
    println!("{:<10} {}", "orphans", snapshot.orphans.len());
    println!("{:<10} {}", "data", data_dir.display());
    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
