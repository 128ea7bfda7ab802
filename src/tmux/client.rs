use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{inside_tmux, Multiplexer, TmuxSession, TmuxWindow};

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    /// Client for the tmux server this process runs under.
    ///
    /// Fails when not running inside tmux or when the server does not answer.
    pub async fn connect() -> Result<Self> {
        if !inside_tmux() {
            bail!("not running inside tmux");
        }
        let client = Self::new();
        client
            .run(["display-message", "-p", "#{session_name}"])
            .await
            .context("tmux server is not reachable")?;
        Ok(client)
    }

    /// Run a tmux command and return its stdout
    async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let command = args
            .first()
            .map(|a| a.to_string_lossy().to_string())
            .unwrap_or_default();

        let output = Command::new(&self.tmux_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to execute tmux {}", command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux {} failed: {}", command, stderr.trim());
        }

        tracing::debug!(command = %command, "tmux command succeeded");
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Exact-match session target, so "web" never resolves to "web2"
fn exact(session: &str) -> String {
    format!("={}", session)
}

/// `-c <dir>`, or nothing when the directory is unknown
fn start_dir(dir: &Path) -> Vec<&OsStr> {
    if dir.as_os_str().is_empty() {
        Vec::new()
    } else {
        vec![OsStr::new("-c"), dir.as_os_str()]
    }
}

impl Multiplexer for TmuxClient {
    async fn has_session(&self, name: &str) -> Result<bool> {
        let status = Command::new(&self.tmux_path)
            .args(["has-session", "-t", &exact(name)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("Failed to execute tmux has-session")?;
        Ok(status.success())
    }

    async fn current_session(&self) -> Result<TmuxSession> {
        // Format: session_name|session_windows
        let stdout = self
            .run(["display-message", "-p", "#{session_name}|#{session_windows}"])
            .await?;
        parse_session_line(stdout.trim())
            .with_context(|| format!("Unexpected display-message output: {}", stdout.trim()))
    }

    async fn new_session(&self, name: &str, dir: &Path) -> Result<()> {
        let mut args = vec![
            OsStr::new("new-session"),
            OsStr::new("-d"),
            OsStr::new("-s"),
            OsStr::new(name),
        ];
        args.extend(start_dir(dir));
        self.run(args).await?;
        Ok(())
    }

    async fn rename_session(&self, from: &str, to: &str) -> Result<()> {
        self.run(["rename-session", "-t", &exact(from), to]).await?;
        Ok(())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<TmuxWindow>> {
        // Format: window_index|window_name
        let stdout = self
            .run([
                "list-windows",
                "-t",
                &exact(session),
                "-F",
                "#{window_index}|#{window_name}",
            ])
            .await?;

        let mut windows: Vec<TmuxWindow> = stdout.lines().filter_map(parse_window_line).collect();
        windows.sort_by_key(|w| w.index);
        Ok(windows)
    }

    async fn rename_window(&self, target: &str, name: &str) -> Result<()> {
        self.run(["rename-window", "-t", target, name]).await?;
        Ok(())
    }

    async fn new_window(&self, session: &str, name: &str, dir: &Path) -> Result<u32> {
        let target = format!("{}:", exact(session));
        let mut args = vec![
            OsStr::new("new-window"),
            OsStr::new("-d"),
            OsStr::new("-P"),
            OsStr::new("-F"),
            OsStr::new("#{window_index}"),
            OsStr::new("-t"),
            OsStr::new(&target),
            OsStr::new("-n"),
            OsStr::new(name),
        ];
        args.extend(start_dir(dir));
        let stdout = self.run(args).await?;
        stdout
            .trim()
            .parse()
            .with_context(|| format!("Unexpected new-window output: {}", stdout.trim()))
    }

    async fn select_window(&self, target: &str) -> Result<()> {
        self.run(["select-window", "-t", target]).await?;
        Ok(())
    }

    async fn switch_client(&self, session: &str) -> Result<()> {
        self.run(["switch-client", "-t", &exact(session)]).await?;
        Ok(())
    }

    async fn respawn_pane(&self, target: &str, dir: &Path, command: &str) -> Result<()> {
        let mut args = vec![
            OsStr::new("respawn-pane"),
            OsStr::new("-k"),
            OsStr::new("-t"),
            OsStr::new(target),
        ];
        args.extend(start_dir(dir));
        args.push(OsStr::new(command));
        self.run(args).await?;
        Ok(())
    }
}

fn parse_session_line(line: &str) -> Option<TmuxSession> {
    let (name, windows) = line.rsplit_once('|')?;
    let window_count = windows.trim().parse().ok()?;
    Some(TmuxSession {
        name: name.to_string(),
        window_count,
    })
}

fn parse_window_line(line: &str) -> Option<TmuxWindow> {
    let (index, name) = line.split_once('|')?;
    let index = index.trim().parse().ok()?;
    Some(TmuxWindow {
        index,
        name: name.to_string(),
    })
}
