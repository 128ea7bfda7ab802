use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;
use thiserror::Error;

use crate::session::SessionRecord;

const CACHE_FILE_NAME: &str = "sessions.json";
const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("failed to read session cache: {0}")]
    Read(#[source] io::Error),

    #[error("failed to parse session cache: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported session cache version {0}")]
    Version(u32),

    #[error("failed to write session cache: {0}")]
    Write(#[source] io::Error),

    #[error("failed to remove session cache: {0}")]
    Remove(#[source] io::Error),
}

/// Default location of the cache file
pub fn resolve_cache_path() -> Result<PathBuf, CacheError> {
    let home = dirs::home_dir().ok_or(CacheError::HomeDirNotFound)?;
    Ok(home
        .join(".cache")
        .join(env!("CARGO_PKG_NAME"))
        .join(CACHE_FILE_NAME))
}

/// A parsed record together with the file mtime it was parsed at
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub mod_time: SystemTime,
    pub record: SessionRecord,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<CacheFileEntry>,
}

#[derive(Serialize, Deserialize)]
struct CacheFileEntry {
    file_path: PathBuf,
    mod_time: SystemTime,
    record: SessionRecord,
}

/// Persistent mtime-keyed store of parsed transcripts.
///
/// Lookups may run concurrently from scanner workers; writes are serialized
/// behind the same lock.
#[derive(Debug)]
pub struct SessionCache {
    path: PathBuf,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl SessionCache {
    /// Load the cache stored at `path`.
    ///
    /// A missing or unreadable file yields an empty cache; it is rebuilt on the
    /// next [`save`](Self::save).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(CacheError::Read(e)) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding session cache");
                HashMap::new()
            }
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "session cache loaded");

        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached record for `path`, only if it was parsed at exactly `mod_time`
    pub fn get(&self, path: &Path, mod_time: SystemTime) -> Option<SessionRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(path)
            .filter(|entry| entry.mod_time == mod_time)
            .map(|entry| entry.record.clone())
    }

    pub fn set(&self, path: &Path, mod_time: SystemTime, record: SessionRecord) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(path.to_path_buf(), CacheEntry { mod_time, record });
    }

    /// Drop every entry whose path is not in `valid_paths`
    pub fn prune(&self, valid_paths: &HashSet<PathBuf>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|path, _| valid_paths.contains(path));
        before - entries.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Persist the whole map, replacing the file atomically
    pub fn save(&self) -> Result<(), CacheError> {
        let text = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let file = CacheFile {
                version: CACHE_FORMAT_VERSION,
                entries: entries
                    .iter()
                    .map(|(file_path, entry)| CacheFileEntry {
                        file_path: file_path.clone(),
                        mod_time: entry.mod_time,
                        record: entry.record.clone(),
                    })
                    .collect(),
            };
            serde_json::to_string(&file)?
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(CacheError::Write)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(CacheError::Write)?;
        fs::rename(&tmp, &self.path).map_err(CacheError::Write)?;
        Ok(())
    }

    /// Forget every entry and delete the cache file. A missing file is fine.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Remove(e)),
        }
    }
}

fn load_entries(path: &Path) -> Result<HashMap<PathBuf, CacheEntry>, CacheError> {
    let raw = fs::read_to_string(path).map_err(CacheError::Read)?;
    let file: CacheFile = serde_json::from_str(&raw)?;
    if file.version != CACHE_FORMAT_VERSION {
        return Err(CacheError::Version(file.version));
    }
    Ok(file
        .entries
        .into_iter()
        .map(|e| {
            let entry = CacheEntry {
                mod_time: e.mod_time,
                record: e.record,
            };
            (e.file_path, entry)
        })
        .collect())
}
