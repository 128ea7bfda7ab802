mod parser;
mod scanner;

pub use scanner::{resolve_transcript_root, Scanner};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File extension carried by every transcript
pub const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// Name prefix of sub-agent transcripts, which are never listed
pub const RESERVED_PREFIX: &str = "agent-";

/// Metadata extracted from one transcript file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// File name without the extension
    pub id: String,
    /// Directory the session ran in, empty if the transcript never said
    pub project_path: String,
    /// One-line description shown to the user
    pub summary: String,
    /// Modification time of the backing file when it was parsed
    pub mod_time: SystemTime,
    /// Absolute path of the backing file
    pub file_path: PathBuf,
    /// First non-empty branch seen, empty if none
    pub git_branch: String,
    pub user_message_count: usize,
    pub assistant_message_count: usize,
}

impl SessionRecord {
    /// Empty record for a transcript that has not been read yet
    pub fn new(file_path: &Path, mod_time: SystemTime) -> Self {
        Self {
            id: session_id_for(file_path),
            project_path: String::new(),
            summary: String::new(),
            mod_time,
            file_path: file_path.to_path_buf(),
            git_branch: String::new(),
            user_message_count: 0,
            assistant_message_count: 0,
        }
    }

    /// Whether the transcript recorded any conversation at all
    pub fn is_empty(&self) -> bool {
        self.user_message_count == 0 && self.assistant_message_count == 0
    }
}

/// Derive the record id from a transcript path
pub fn session_id_for(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let suffix = format!(".{}", TRANSCRIPT_EXTENSION);
    name.strip_suffix(&suffix)
        .map(str::to_string)
        .unwrap_or(name)
}

/// Label used for sessions without a recorded working directory
pub const NO_PROJECT: &str = "(no project)";

/// Sessions that ran in the same directory
#[derive(Debug, Clone)]
pub struct ProjectGroup {
    pub project_path: String,
    pub project_name: String,
    /// Newest first
    pub sessions: Vec<SessionRecord>,
}

impl ProjectGroup {
    pub fn latest(&self) -> Option<SystemTime> {
        self.sessions.first().map(|s| s.mod_time)
    }
}

/// Sort records newest first
pub fn sort_newest_first(records: &mut [SessionRecord]) {
    records.sort_by(|a, b| b.mod_time.cmp(&a.mod_time));
}

/// Group records by project path, most recently active project first
pub fn group_by_project(records: &[SessionRecord]) -> Vec<ProjectGroup> {
    let mut groups: Vec<ProjectGroup> = Vec::new();

    for record in records {
        let path = if record.project_path.is_empty() {
            NO_PROJECT.to_string()
        } else {
            record.project_path.clone()
        };

        match groups.iter_mut().find(|g| g.project_path == path) {
            Some(group) => group.sessions.push(record.clone()),
            None => {
                let name = Path::new(&path)
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| NO_PROJECT.to_string());
                groups.push(ProjectGroup {
                    project_path: path,
                    project_name: name,
                    sessions: vec![record.clone()],
                });
            }
        }
    }

    for group in &mut groups {
        sort_newest_first(&mut group.sessions);
    }
    groups.sort_by(|a, b| b.latest().cmp(&a.latest()));

    groups
}
