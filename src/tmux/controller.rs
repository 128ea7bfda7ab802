use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

use super::{
    keep_shell_alive, session_name_for, window_target, Multiplexer, TmuxSession, CLAUDE_WINDOW,
};
use crate::config::WindowSpec;

/// How the controller reached the target session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new session was created
    Created,
    /// The attached numeric session was renamed and reused
    Repurposed { from: String },
    /// The session already existed; `healed` windows were added to it
    Reused { healed: usize },
}

/// Converges tmux to one session per project and runs a command in its
/// claude window.
pub struct SessionController<M> {
    mux: M,
    windows: Vec<WindowSpec>,
}

impl<M: Multiplexer> SessionController<M> {
    pub fn new(mux: M, windows: Vec<WindowSpec>) -> Self {
        Self { mux, windows }
    }

    #[cfg(test)]
    pub fn mux(&self) -> &M {
        &self.mux
    }

    /// Make sure the project's session exists with every configured window,
    /// then replace whatever runs in its claude window with `command`.
    pub async fn open(&self, project_dir: &Path, command: &str) -> Result<Outcome> {
        let name = session_name_for(project_dir);

        if self.mux.has_session(&name).await? {
            let healed = self.heal(&name, project_dir).await?;
            self.launch(&name, project_dir, command, true).await?;
            tracing::info!(session = %name, healed, "reused tmux session");
            return Ok(Outcome::Reused { healed });
        }

        if let Some(current) = self.disposable_current_session().await {
            self.repurpose(&current, &name, project_dir).await?;
            // Already attached to it, no switch needed
            self.launch(&name, project_dir, command, false).await?;
            tracing::info!(session = %name, from = %current.name, "repurposed tmux session");
            return Ok(Outcome::Repurposed { from: current.name });
        }

        self.create(&name, project_dir).await?;
        self.launch(&name, project_dir, command, true).await?;
        tracing::info!(session = %name, dir = %project_dir.display(), "created tmux session");
        Ok(Outcome::Created)
    }

    /// Add any missing window, claude window included. Returns how many were added.
    pub async fn heal(&self, session: &str, project_dir: &Path) -> Result<usize> {
        let mut present: HashSet<String> = self
            .mux
            .list_windows(session)
            .await?
            .into_iter()
            .map(|w| w.name)
            .collect();

        let claude = WindowSpec::new(CLAUDE_WINDOW);
        let mut added = 0;
        for spec in std::iter::once(&claude).chain(self.windows.iter()) {
            if present.contains(&spec.name) {
                continue;
            }
            self.create_window(session, spec, project_dir).await?;
            present.insert(spec.name.clone());
            added += 1;
        }

        Ok(added)
    }

    /// The attached session, if it is safe to take over. Lookup failures only
    /// mean there is nothing to take over.
    async fn disposable_current_session(&self) -> Option<TmuxSession> {
        match self.mux.current_session().await {
            Ok(current) if current.is_disposable() => Some(current),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "could not inspect current tmux session");
                None
            }
        }
    }

    async fn create(&self, name: &str, project_dir: &Path) -> Result<()> {
        self.mux.new_session(name, project_dir).await?;
        self.rename_first_window(name).await?;
        self.heal(name, project_dir).await?;
        Ok(())
    }

    async fn repurpose(&self, current: &TmuxSession, name: &str, project_dir: &Path) -> Result<()> {
        // tmux cannot move an existing session's start directory, so windows
        // already open here keep theirs. Only the windows created below and the
        // respawned claude pane start in `project_dir`.
        self.mux.rename_session(&current.name, name).await?;

        let windows = self.mux.list_windows(name).await?;
        if !windows.iter().any(|w| w.name == CLAUDE_WINDOW) {
            self.rename_first_window(name).await?;
        }
        self.heal(name, project_dir).await?;
        Ok(())
    }

    async fn rename_first_window(&self, session: &str) -> Result<()> {
        let first = self
            .mux
            .list_windows(session)
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("tmux session {} has no windows", session))?;
        let target = window_target(session, &first.index.to_string());
        self.mux.rename_window(&target, CLAUDE_WINDOW).await
    }

    async fn create_window(
        &self,
        session: &str,
        spec: &WindowSpec,
        project_dir: &Path,
    ) -> Result<()> {
        let index = self.mux.new_window(session, &spec.name, project_dir).await?;
        if let Some(command) = spec.command.as_deref().filter(|c| !c.trim().is_empty()) {
            // By index: tmux reads a numeric window name as an index
            let target = window_target(session, &index.to_string());
            self.mux
                .respawn_pane(&target, project_dir, &keep_shell_alive(command))
                .await?;
        }
        Ok(())
    }

    async fn launch(
        &self,
        session: &str,
        project_dir: &Path,
        command: &str,
        switch: bool,
    ) -> Result<()> {
        let target = window_target(session, CLAUDE_WINDOW);
        self.mux.select_window(&target).await?;
        if switch {
            self.mux.switch_client(session).await?;
        }
        self.mux
            .respawn_pane(&target, project_dir, &keep_shell_alive(command))
            .await
    }
}
