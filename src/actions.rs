use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing {0}")]
    MissingArgument(&'static str),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

/// What the user asked for on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print sessions, newest first
    List { show_all: bool },
    /// Print projects with their session counts
    Projects { show_all: bool },
    /// Resume a session, inside tmux when possible
    Resume { id: String },
    /// Delete a session's transcript
    Delete { id: String },
    /// Remove the session cache
    ClearCache,
    /// Print usage
    Help,
}

impl Action {
    /// Parse the arguments that follow the program name
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, ActionError> {
        let mut show_all = false;
        let mut positional = Vec::new();
        for arg in args {
            match arg.as_ref() {
                "-a" | "--all" => show_all = true,
                "-h" | "--help" => return Ok(Action::Help),
                other => positional.push(other.to_string()),
            }
        }

        let mut positional = positional.into_iter();
        let action = match positional.next().as_deref() {
            None | Some("list") => Action::List { show_all },
            Some("projects") => Action::Projects { show_all },
            Some("resume") => Action::Resume {
                id: positional
                    .next()
                    .ok_or(ActionError::MissingArgument("session id"))?,
            },
            Some("delete") => Action::Delete {
                id: positional
                    .next()
                    .ok_or(ActionError::MissingArgument("session id"))?,
            },
            Some("clear-cache") => Action::ClearCache,
            Some("help") => Action::Help,
            Some(other) => return Err(ActionError::UnknownCommand(other.to_string())),
        };

        if let Some(extra) = positional.next() {
            return Err(ActionError::UnexpectedArgument(extra));
        }
        Ok(action)
    }
}

/// Usage text; `config_path` is shown so users know where to put windows
pub fn help_text(config_path: &str) -> String {
    format!(
        "{name} - find and resume Claude Code sessions\n\n\
USAGE:\n  \
{name} [list] [-a|--all]     Print sessions: id|modified|project|summary\n  \
{name} projects [-a|--all]   Print projects: name<TAB>path<TAB>sessions\n  \
{name} resume <session-id>   Resume a session (in a per-project tmux session when inside tmux)\n  \
{name} delete <session-id>   Delete a session transcript\n  \
{name} clear-cache           Remove the session cache\n  \
{name} help | -h | --help\n\n\
FLAGS:\n  \
-a, --all   Include sessions without any messages\n\n\
TMUX:\n  \
Inside tmux, resuming creates (or reuses) a session named after the project with a\n  \
'claude' window plus the configured windows, then starts Claude in the claude window.\n\n\
CONFIG: {config_path}\n  \
tmux:\n    \
windows:\n      \
- name: logs\n      \
- name: tests\n        \
command: npm test -- --watch\n  \
scan:\n    \
workers: 8\n\n\
ENV:\n  \
CLAUDE_PROJECTS_DIR   Override the transcript directory (default: ~/.claude/projects)\n  \
RUST_LOG              Log filter, e.g. debug\n",
        name = env!("CARGO_PKG_NAME"),
        config_path = config_path,
    )
}
