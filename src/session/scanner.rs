use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use walkdir::WalkDir;

use super::parser::{JsonlParser, TranscriptParser};
use super::{SessionRecord, RESERVED_PREFIX, TRANSCRIPT_EXTENSION};
use crate::cache::SessionCache;
use crate::config::Config;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("scan worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// Directory holding Claude Code transcripts.
///
/// `CLAUDE_PROJECTS_DIR` wins over the configured directory, which wins over
/// `~/.claude/projects`.
pub fn resolve_transcript_root(config: &Config) -> Result<PathBuf, ScanError> {
    if let Some(dir) = std::env::var_os("CLAUDE_PROJECTS_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = &config.projects_dir {
        return Ok(dir.clone());
    }
    let home = dirs::home_dir().ok_or(ScanError::HomeDirNotFound)?;
    Ok(home.join(".claude").join("projects"))
}

/// A transcript found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub mod_time: SystemTime,
}

/// Finds transcripts and parses them on a bounded pool of blocking workers
#[derive(Clone)]
pub struct Scanner {
    root: PathBuf,
    workers: usize,
    parser: Arc<dyn TranscriptParser>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            root: root.into(),
            workers: workers.max(1),
            parser: Arc::new(JsonlParser),
        }
    }

    /// Replace the transcript parser
    #[cfg(test)]
    pub fn with_parser(mut self, parser: Arc<dyn TranscriptParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the root, serving unchanged files from `cache` and parsing the rest.
    ///
    /// Returns once every worker has finished. Files that cannot be parsed are
    /// left out, and cache entries for files no longer on disk are pruned.
    pub async fn scan_cached(
        &self,
        cache: &Arc<SessionCache>,
    ) -> Result<Vec<SessionRecord>, ScanError> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || discover(&root)).await?;
        let valid_paths: HashSet<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

        let mut records = Vec::with_capacity(files.len());
        let mut misses = Vec::new();
        for file in files {
            match cache.get(&file.path, file.mod_time) {
                Some(record) => records.push(record),
                None => misses.push(file),
            }
        }
        let hits = records.len();
        let miss_count = misses.len();

        records.extend(self.parse_all(misses, cache).await?);
        let pruned = cache.prune(&valid_paths);

        tracing::debug!(
            root = %self.root.display(),
            hits,
            misses = miss_count,
            pruned,
            records = records.len(),
            "scan finished"
        );
        Ok(records)
    }

    async fn parse_all(
        &self,
        files: Vec<DiscoveredFile>,
        cache: &Arc<SessionCache>,
    ) -> Result<Vec<SessionRecord>, ScanError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let worker_count = self.workers.min(files.len());
        let queue = Arc::new(Mutex::new(files.into_iter()));
        let (tx, mut rx) = mpsc::channel::<SessionRecord>(worker_count * 2);

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let parser = Arc::clone(&self.parser);
            let cache = Arc::clone(cache);
            workers.spawn_blocking(move || loop {
                let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                let Some(file) = next else {
                    break;
                };
                match parser.parse(&file.path) {
                    Ok(record) => {
                        cache.set(&file.path, file.mod_time, record.clone());
                        if tx.blocking_send(record).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "dropping transcript"),
                }
            });
        }
        drop(tx);

        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }
        while let Some(result) = workers.join_next().await {
            result?;
        }

        Ok(records)
    }
}

fn is_transcript_name(name: &str) -> bool {
    let suffix = format!(".{}", TRANSCRIPT_EXTENSION);
    name.ends_with(&suffix) && !name.starts_with(RESERVED_PREFIX)
}

/// Every transcript under `root` with its current mtime, found recursively.
/// Entries that cannot be read or stat'ed are skipped.
fn discover(root: &Path) -> Vec<DiscoveredFile> {
    if !root.exists() {
        tracing::warn!(root = %root.display(), "transcript directory does not exist");
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_transcript_name(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let mod_time = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(mod_time)) => mod_time,
            Ok(Err(e)) => {
                tracing::debug!(
                    path = %entry.path().display(),
                    error = %e,
                    "skipping file without mtime"
                );
                continue;
            }
            Err(e) => {
                tracing::debug!(
                    path = %entry.path().display(),
                    error = %e,
                    "skipping unstatable file"
                );
                continue;
            }
        };
        files.push(DiscoveredFile {
            path: entry.into_path(),
            mod_time,
        });
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::parser::{ParseError, NO_SUMMARY};
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Counts calls and refuses files whose name contains "broken"
    #[derive(Default)]
    struct CountingParser {
        calls: AtomicUsize,
    }

    impl TranscriptParser for CountingParser {
        fn parse(&self, path: &Path) -> Result<SessionRecord, ParseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("broken") {
                return Err(ParseError::Read {
                    path: path.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, "boom"),
                });
            }
            JsonlParser.parse(path)
        }
    }

    /// Records the most parses ever running at once
    #[derive(Default)]
    struct SlowParser {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TranscriptParser for SlowParser {
        fn parse(&self, path: &Path) -> Result<SessionRecord, ParseError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            let result = JsonlParser.parse(path);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    struct Fixture {
        root: TempDir,
        cache_dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
                cache_dir: TempDir::new().unwrap(),
            }
        }

        fn write(&self, rel: &str, lines: &[&str]) -> PathBuf {
            let path = self.root.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            let mut file = File::create(&path).unwrap();
            for line in lines {
                writeln!(file, "{}", line).unwrap();
            }
            path
        }

        fn cache(&self) -> Arc<SessionCache> {
            Arc::new(SessionCache::open(self.cache_dir.path().join("c.json")))
        }

        fn scanner(&self, parser: &Arc<CountingParser>) -> Scanner {
            let parser: Arc<dyn TranscriptParser> = Arc::clone(parser) as Arc<dyn TranscriptParser>;
            Scanner::new(self.root.path(), 4).with_parser(parser)
        }
    }

    const USER: &str = r#"{"type":"user","cwd":"/home/u/widgets","message":{"content":"hello"}}"#;
    const ASSISTANT: &str = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#;

    fn sorted(mut records: Vec<SessionRecord>) -> Vec<SessionRecord> {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    #[test]
    fn test_discover_filters_names() {
        let fx = Fixture::new();
        fx.write("-home-u-widgets/one.jsonl", &[USER]);
        fx.write("-home-u-widgets/deep/two.jsonl", &[USER]);
        fx.write("-home-u-widgets/agent-side.jsonl", &[USER]);
        fx.write("-home-u-widgets/notes.txt", &[USER]);
        fs::create_dir_all(fx.root.path().join("dir.jsonl")).unwrap();

        let mut names: Vec<String> = discover(fx.root.path())
            .into_iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["one.jsonl", "two.jsonl"]);
    }

    #[test]
    fn test_discover_missing_root_is_empty() {
        let fx = Fixture::new();
        assert!(discover(&fx.root.path().join("nope")).is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_files_are_served_from_cache() {
        let fx = Fixture::new();
        fx.write("p/a.jsonl", &[USER, ASSISTANT]);
        fx.write("p/b.jsonl", &[USER]);
        let parser = Arc::new(CountingParser::default());
        let scanner = fx.scanner(&parser);
        let cache = fx.cache();

        let first = sorted(scanner.scan_cached(&cache).await.unwrap());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);

        let second = sorted(scanner.scan_cached(&cache).await.unwrap());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cache_survives_save_and_reload() {
        let fx = Fixture::new();
        fx.write("p/a.jsonl", &[USER]);
        let parser = Arc::new(CountingParser::default());
        let scanner = fx.scanner(&parser);

        let cache = fx.cache();
        let first = scanner.scan_cached(&cache).await.unwrap();
        cache.save().unwrap();

        let reloaded = fx.cache();
        let second = scanner.scan_cached(&reloaded).await.unwrap();
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_deleted_files_are_pruned() {
        let fx = Fixture::new();
        let keep = fx.write("p/keep.jsonl", &[USER]);
        let gone = fx.write("p/gone.jsonl", &[USER]);
        let parser = Arc::new(CountingParser::default());
        let scanner = fx.scanner(&parser);
        let cache = fx.cache();

        scanner.scan_cached(&cache).await.unwrap();
        let gone_mtime = fs::metadata(&gone).unwrap().modified().unwrap();
        fs::remove_file(&gone).unwrap();

        let records = scanner.scan_cached(&cache).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "keep");
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&gone, gone_mtime).is_none());
        let keep_mtime = fs::metadata(&keep).unwrap().modified().unwrap();
        assert!(cache.get(&keep, keep_mtime).is_some());
    }

    #[tokio::test]
    async fn test_changed_mtime_is_reparsed() {
        let fx = Fixture::new();
        let path = fx.write("p/a.jsonl", &[USER]);
        let parser = Arc::new(CountingParser::default());
        let scanner = fx.scanner(&parser);
        let cache = fx.cache();

        scanner.scan_cached(&cache).await.unwrap();

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, r#"{{"type":"summary","summary":"Updated"}}"#).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
        drop(file);

        let records = scanner.scan_cached(&cache).await.unwrap();
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        assert_eq!(records[0].summary, "Updated");
    }

    // Same-tick rewrites are indistinguishable by mtime alone, so the stale
    // record is served until the mtime moves.
    #[tokio::test]
    async fn test_rewrite_with_identical_mtime_serves_stale_record() {
        let fx = Fixture::new();
        let path = fx.write("p/a.jsonl", &[USER]);
        let original_mtime = fs::metadata(&path).unwrap().modified().unwrap();
        let parser = Arc::new(CountingParser::default());
        let scanner = fx.scanner(&parser);
        let cache = fx.cache();

        let before = scanner.scan_cached(&cache).await.unwrap();

        fx.write("p/a.jsonl", &[r#"{"type":"summary","summary":"Rewritten"}"#]);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(original_mtime)
            .unwrap();

        let after = scanner.scan_cached(&cache).await.unwrap();
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(before, after);
        assert_eq!(after[0].summary, "hello");
    }

    #[tokio::test]
    async fn test_failed_parse_is_dropped_and_not_cached() {
        let fx = Fixture::new();
        fx.write("p/good.jsonl", &[USER]);
        let broken = fx.write("p/broken.jsonl", &[USER]);
        let parser = Arc::new(CountingParser::default());
        let scanner = fx.scanner(&parser);
        let cache = fx.cache();

        let records = scanner.scan_cached(&cache).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "good");

        let mtime = fs::metadata(&broken).unwrap().modified().unwrap();
        assert!(cache.get(&broken, mtime).is_none());

        // Retried on every scan
        scanner.scan_cached(&cache).await.unwrap();
        assert_eq!(parser.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parse_concurrency_is_bounded_by_workers() {
        let fx = Fixture::new();
        for i in 0..40 {
            fx.write(&format!("p/s{}.jsonl", i), &[USER]);
        }

        for workers in [1, 3] {
            let parser = Arc::new(SlowParser::default());
            let scanner = Scanner::new(fx.root.path(), workers)
                .with_parser(Arc::clone(&parser) as Arc<dyn TranscriptParser>);
            let cache = fx.cache();

            let records = scanner.scan_cached(&cache).await.unwrap();
            assert_eq!(records.len(), 40);

            let max = parser.max_in_flight.load(Ordering::SeqCst);
            assert!(max <= workers, "{} parses at once with {} workers", max, workers);
            if workers > 1 {
                assert!(max > 1, "misses were parsed one at a time");
            }
        }
    }

    #[tokio::test]
    async fn test_single_worker_drains_queue() {
        let fx = Fixture::new();
        for i in 0..25 {
            fx.write(&format!("p{}/s{}.jsonl", i % 3, i), &[USER]);
        }
        let scanner = Scanner::new(fx.root.path(), 1);
        let cache = fx.cache();

        let records = scanner.scan_cached(&cache).await.unwrap();
        assert_eq!(records.len(), 25);
        assert_eq!(cache.len(), 25);
    }

    #[tokio::test]
    async fn test_fresh_scan_of_three_transcripts() {
        let fx = Fixture::new();
        let long = format!(
            r#"{{"type":"user","cwd":"/home/u/widgets","message":{{"content":"{}"}}}}"#,
            "a".repeat(80)
        );
        fx.write("p/one.jsonl", &[USER, ASSISTANT, USER]);
        fx.write("p/two.jsonl", &[&long, USER]);
        fx.write(
            "p/three.jsonl",
            &[
                r#"{"type":"user","message":{"content":""}}"#,
                r#"{"type":"user"}"#,
                ASSISTANT,
                ASSISTANT,
            ],
        );
        let scanner = Scanner::new(fx.root.path(), 8);
        let cache = fx.cache();

        let records = sorted(scanner.scan_cached(&cache).await.unwrap());
        assert_eq!(records.len(), 3);

        let by_id = |id: &str| records.iter().find(|r| r.id == id).unwrap();
        let one = by_id("one");
        assert_eq!(one.summary, "hello");
        assert_eq!((one.user_message_count, one.assistant_message_count), (2, 1));

        let two = by_id("two");
        assert_eq!(two.summary, format!("{}...", "a".repeat(57)));
        assert_eq!((two.user_message_count, two.assistant_message_count), (2, 0));

        let three = by_id("three");
        assert_eq!(three.summary, NO_SUMMARY);
        assert_eq!(three.project_path, "");
        assert_eq!((three.user_message_count, three.assistant_message_count), (2, 2));

        assert!(records.iter().all(|r| r.git_branch.is_empty()));
    }
}
