use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::actions::{help_text, Action};
use crate::cache::{resolve_cache_path, SessionCache};
use crate::config::{config_path, Config};
use crate::session::{
    group_by_project, resolve_transcript_root, sort_newest_first, Scanner, SessionRecord,
};
use crate::tmux::{shell_quote, SessionController, TmuxClient};

/// Program that owns the transcripts
const CLAUDE_BIN: &str = "claude";

/// Shell command that resumes session `id`
pub fn launch_command(id: &str) -> String {
    format!("{} --resume {}", CLAUDE_BIN, shell_quote(id))
}

/// Main application state
pub struct App {
    config: Config,
    scanner: Scanner,
    cache: Arc<SessionCache>,
}

impl App {
    pub fn new(config: Config, scanner: Scanner, cache: Arc<SessionCache>) -> Self {
        Self {
            config,
            scanner,
            cache,
        }
    }

    /// Wire up the scanner and cache at their default locations
    pub fn from_config(config: Config) -> Result<Self> {
        let root = resolve_transcript_root(&config)?;
        let scanner = Scanner::new(root, config.scan.workers);
        let cache = Arc::new(SessionCache::open(resolve_cache_path()?));
        Ok(Self::new(config, scanner, cache))
    }

    /// Run one action, writing user-facing output to `out`
    pub async fn handle_action(&self, action: Action, out: &mut impl Write) -> Result<()> {
        match action {
            Action::List { show_all } => {
                for record in self.visible_sessions(show_all).await? {
                    writeln!(out, "{}", format_list_line(&record))?;
                }
            }
            Action::Projects { show_all } => {
                let sessions = self.visible_sessions(show_all).await?;
                for group in group_by_project(&sessions) {
                    writeln!(
                        out,
                        "{}\t{}\t{}",
                        group.project_name,
                        group.project_path,
                        group.sessions.len()
                    )?;
                }
            }
            Action::Resume { id } => {
                let record = self.find_session(&id).await?;
                self.resume(&record).await?;
            }
            Action::Delete { id } => {
                let record = self.find_session(&id).await?;
                std::fs::remove_file(&record.file_path).with_context(|| {
                    format!("Failed to delete {}", record.file_path.display())
                })?;
                tracing::info!(id = %record.id, "deleted session transcript");
                writeln!(out, "Deleted session {}", record.id)?;
            }
            Action::ClearCache => {
                self.cache.clear()?;
                writeln!(out, "Cache cleared.")?;
            }
            Action::Help => {
                let path = config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|e| format!("({})", e));
                write!(out, "{}", help_text(&path))?;
            }
        }
        Ok(())
    }

    /// Scan transcripts through the cache and persist it, newest first
    pub async fn load_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions = self
            .scanner
            .scan_cached(&self.cache)
            .await
            .with_context(|| format!("Failed to scan {}", self.scanner.root().display()))?;

        // The cache is rebuildable, so a failed save only costs the next scan
        if let Err(e) = self.cache.save() {
            tracing::warn!(
                path = %self.cache.path().display(),
                error = %e,
                "failed to save session cache"
            );
        }

        sort_newest_first(&mut sessions);
        Ok(sessions)
    }

    /// Sessions to show; empty ones only with `show_all`
    pub async fn visible_sessions(&self, show_all: bool) -> Result<Vec<SessionRecord>> {
        let mut sessions = self.load_sessions().await?;
        if !show_all {
            sessions.retain(|s| !s.is_empty());
        }
        Ok(sessions)
    }

    pub async fn find_session(&self, id: &str) -> Result<SessionRecord> {
        let sessions = self.load_sessions().await?;
        if sessions.is_empty() {
            bail!("no sessions found in {}", self.scanner.root().display());
        }
        match sessions.into_iter().find(|s| s.id == id) {
            Some(record) => Ok(record),
            None => bail!("session not found: {}", id),
        }
    }

    /// Resume in the project's tmux session, or in the foreground when tmux is
    /// not available
    pub async fn resume(&self, record: &SessionRecord) -> Result<()> {
        let client = match TmuxClient::connect().await {
            Ok(client) => client,
            Err(e) => {
                tracing::info!(reason = %e, "tmux unavailable, resuming in the foreground");
                return run_in_foreground(record);
            }
        };

        let controller = SessionController::new(client, self.config.tmux.windows.clone());
        let project_dir = Path::new(&record.project_path);
        let outcome = controller
            .open(project_dir, &launch_command(&record.id))
            .await
            .with_context(|| format!("Failed to open tmux session for {}", record.id))?;
        tracing::debug!(id = %record.id, ?outcome, "session resumed in tmux");
        Ok(())
    }
}

/// Run Claude attached to this terminal, from the session's project directory
fn run_in_foreground(record: &SessionRecord) -> Result<()> {
    let mut command = Command::new(CLAUDE_BIN);
    command
        .args(["--resume", &record.id])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let project_dir = Path::new(&record.project_path);
    if project_dir.is_dir() {
        command.current_dir(project_dir);
    } else if !record.project_path.is_empty() {
        tracing::warn!(dir = %project_dir.display(), "project directory is gone, staying here");
    }

    let status = command
        .status()
        .with_context(|| format!("Failed to run {}", CLAUDE_BIN))?;
    if !status.success() {
        tracing::warn!(%status, "claude exited unsuccessfully");
    }
    Ok(())
}

/// `id|YYYY-MM-DD HH:MM|project|summary`, local time
pub fn format_list_line(record: &SessionRecord) -> String {
    let modified: DateTime<Local> = record.mod_time.into();
    format!(
        "{}|{}|{}|{}",
        record.id,
        modified.format("%Y-%m-%d %H:%M"),
        record.project_path,
        record.summary.replace('\n', " ")
    )
}
