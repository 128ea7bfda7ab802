mod client;
mod controller;

pub use client::TmuxClient;
pub use controller::SessionController;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Window that hosts the resumed Claude session
pub const CLAUDE_WINDOW: &str = "claude";

/// Session name used when the project directory has no usable final component
pub const FALLBACK_SESSION_NAME: &str = "claude";

/// Environment variable tmux exports into every pane
pub const TMUX_ENV: &str = "TMUX";

/// Sessions tmux names on its own, e.g. "0" or "12"
static RE_NUMERIC_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

/// A tmux session as seen from the outside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxSession {
    pub name: String,
    pub window_count: usize,
}

impl TmuxSession {
    #[cfg(test)]
    pub fn new(name: &str, window_count: usize) -> Self {
        Self {
            name: name.to_string(),
            window_count,
        }
    }

    /// Whether this session is an auto-named scratch session that can be
    /// taken over instead of being left behind
    pub fn is_disposable(&self) -> bool {
        RE_NUMERIC_NAME.is_match(&self.name) && self.window_count <= 2
    }
}

/// A window inside a tmux session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxWindow {
    pub index: u32,
    pub name: String,
}

/// The tmux operations the session controller converges with.
///
/// Every call is a blocking round-trip to the tmux server; failures are
/// returned as-is and never retried.
#[allow(async_fn_in_trait)]
pub trait Multiplexer {
    async fn has_session(&self, name: &str) -> Result<bool>;

    /// The session the invoking client is attached to
    async fn current_session(&self) -> Result<TmuxSession>;

    async fn new_session(&self, name: &str, dir: &Path) -> Result<()>;

    async fn rename_session(&self, from: &str, to: &str) -> Result<()>;

    /// Windows ordered by index
    async fn list_windows(&self, session: &str) -> Result<Vec<TmuxWindow>>;

    async fn rename_window(&self, target: &str, name: &str) -> Result<()>;

    /// Add a detached window and return its index
    async fn new_window(&self, session: &str, name: &str, dir: &Path) -> Result<u32>;

    async fn select_window(&self, target: &str) -> Result<()>;

    async fn switch_client(&self, session: &str) -> Result<()>;

    /// Kill whatever runs in the target pane and start `command` in its place
    async fn respawn_pane(&self, target: &str, dir: &Path, command: &str) -> Result<()>;
}

/// `session:window` target string
pub fn window_target(session: &str, window: &str) -> String {
    format!("{}:{}", session, window)
}

/// Session name for a project directory: its final path component.
///
/// tmux rewrites `.` and `:` in session names, so they are replaced up front to
/// keep later lookups exact.
pub fn session_name_for(project_dir: &Path) -> String {
    let name = project_dir
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.is_empty() || name == "." {
        return FALLBACK_SESSION_NAME.to_string();
    }
    name.replace(['.', ':'], "_")
}

/// Quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap `command` so the pane drops back to the user's shell once it exits
pub fn keep_shell_alive(command: &str) -> String {
    format!("sh -c {}", shell_quote(&format!("{}; exec \"$SHELL\"", command)))
}

/// Whether this process runs inside a tmux pane
pub fn inside_tmux() -> bool {
    std::env::var_os(TMUX_ENV).is_some_and(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_name_from_project() {
        assert_eq!(session_name_for(Path::new("/home/u/widgets")), "widgets");
        assert_eq!(session_name_for(Path::new("/home/u/widgets/")), "widgets");
        assert_eq!(session_name_for(Path::new("/")), FALLBACK_SESSION_NAME);
        assert_eq!(session_name_for(Path::new(".")), FALLBACK_SESSION_NAME);
        assert_eq!(session_name_for(Path::new("")), FALLBACK_SESSION_NAME);
        assert_eq!(session_name_for(Path::new("/srv/my.app")), "my_app");
    }

    #[test]
    fn test_disposable_sessions() {
        assert!(TmuxSession::new("7", 2).is_disposable());
        assert!(TmuxSession::new("12", 1).is_disposable());
        assert!(!TmuxSession::new("7", 3).is_disposable());
        assert!(!TmuxSession::new("dev", 1).is_disposable());
        assert!(!TmuxSession::new("7a", 1).is_disposable());
        assert!(!TmuxSession::new("", 1).is_disposable());
    }

    #[test]
    fn test_keep_shell_alive_quotes() {
        assert_eq!(
            keep_shell_alive("npm test"),
            r#"sh -c 'npm test; exec "$SHELL"'"#
        );
        assert_eq!(
            keep_shell_alive("echo 'hi'"),
            r#"sh -c 'echo '\''hi'\''; exec "$SHELL"'"#
        );
    }

    #[test]
    fn test_window_target() {
        assert_eq!(window_target("widgets", CLAUDE_WINDOW), "widgets:claude");
    }
}
