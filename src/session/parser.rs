use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

use super::SessionRecord;

/// Summary used when a transcript has neither a summary line nor a user message
pub const NO_SUMMARY: &str = "(no summary)";

/// Longest summary derived from a user message, marker included
const MAX_SUMMARY_CHARS: usize = 60;
const ELLIPSIS: &str = "...";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to open transcript {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("failed to read transcript {path}: {source}")]
    Read { path: String, source: io::Error },
}

/// Turns one transcript file into a [`SessionRecord`]
pub trait TranscriptParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<SessionRecord, ParseError>;
}

/// Parser for Claude Code's line-delimited JSON transcripts
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlParser;

impl TranscriptParser for JsonlParser {
    fn parse(&self, path: &Path) -> Result<SessionRecord, ParseError> {
        let file = File::open(path).map_err(|source| ParseError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let read_err = |source| ParseError::Read {
            path: path.display().to_string(),
            source,
        };
        let mod_time = file.metadata().and_then(|m| m.modified()).map_err(read_err)?;

        let mut builder = RecordBuilder::new(SessionRecord::new(path, mod_time));
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let bytes = reader.read_until(b'\n', &mut buf).map_err(read_err)?;
            if bytes == 0 {
                break;
            }
            // Lines are independent, so one bad line never poisons the rest
            match serde_json::from_slice::<TranscriptLine>(&buf) {
                Ok(line) => builder.apply(line),
                Err(e) => {
                    tracing::trace!(path = %path.display(), error = %e, "skipping malformed line")
                }
            }
        }

        Ok(builder.finish())
    }
}

/// The fields of a transcript line this parser cares about
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TranscriptLine {
    #[serde(rename = "type")]
    kind: Option<String>,
    cwd: Option<String>,
    summary: Option<String>,
    message: Option<MessageBody>,
    #[serde(rename = "gitBranch")]
    git_branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessageBody {
    content: Value,
}

impl MessageBody {
    /// Plain text of the message, joining text blocks when content is structured
    fn text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter(|block| block.get("type").and_then(|v| v.as_str()) == Some("text"))
                .filter_map(|block| block.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

struct RecordBuilder {
    record: SessionRecord,
    explicit_summary: Option<String>,
    first_user_message: Option<String>,
}

impl RecordBuilder {
    fn new(record: SessionRecord) -> Self {
        Self {
            record,
            explicit_summary: None,
            first_user_message: None,
        }
    }

    fn apply(&mut self, line: TranscriptLine) {
        match line.kind.as_deref() {
            Some("user") => {
                self.record.user_message_count += 1;
                if self.record.project_path.is_empty() {
                    if let Some(cwd) = line.cwd.filter(|c| !c.is_empty()) {
                        self.record.project_path = cwd;
                    }
                }
                if self.first_user_message.is_none() {
                    let text = line.message.as_ref().map(MessageBody::text).unwrap_or_default();
                    if !text.is_empty() {
                        self.first_user_message = Some(text);
                    }
                }
            }
            Some("assistant") => self.record.assistant_message_count += 1,
            Some("summary") => {
                if let Some(summary) = line.summary.filter(|s| !s.is_empty()) {
                    self.explicit_summary = Some(summary);
                }
            }
            _ => {}
        }

        if self.record.git_branch.is_empty() {
            if let Some(branch) = line.git_branch.filter(|b| !b.is_empty()) {
                self.record.git_branch = branch;
            }
        }
    }

    fn finish(mut self) -> SessionRecord {
        self.record.summary = match (self.explicit_summary, self.first_user_message) {
            (Some(summary), _) => summary,
            (None, Some(message)) => truncate(&message, MAX_SUMMARY_CHARS),
            (None, None) => NO_SUMMARY.to_string(),
        };
        self.record
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with an ellipsis
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
