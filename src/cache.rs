//! On-disk cache of analysis results.
//!
//! One JSON file per [`Fingerprint`] under the cache directory. Each save
//! replaces the whole record through a temp file renamed into place, so a
//! reader sees either the old record or the new one.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::result::AnalysisResult;
use crate::state::{self, RepoChanges, RepoState};
use crate::walk::SourceWalker;

/// Errors from writing or removing cache records.
///
/// Read failures are not errors: they are logged and reported as a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Whether a run covered one file or the whole tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    SingleFile,
    EntireProject,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::SingleFile => "single_file",
            AnalysisMode::EntireProject => "entire_project",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one cache entry: (root, optional target file, mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub root: PathBuf,
    pub file: Option<PathBuf>,
    pub mode: AnalysisMode,
}

impl Fingerprint {
    pub fn single_file(root: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file: Some(file.into()),
            mode: AnalysisMode::SingleFile,
        }
    }

    pub fn entire_project(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file: None,
            mode: AnalysisMode::EntireProject,
        }
    }

    /// Single-file fingerprint when `file` is given, whole-project otherwise.
    pub fn new(root: impl Into<PathBuf>, file: Option<PathBuf>) -> Self {
        match file {
            Some(file) => Self::single_file(root, file),
            None => Self::entire_project(root),
        }
    }

    /// Hex SHA-256 over the fingerprint components.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.root.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        if let Some(file) = &self.file {
            hasher.update(file.to_string_lossy().as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(self.mode.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Readable stem plus a short digest prefix, e.g. `pkg_core_py_single_file_1a2b3c4d`.
    pub fn key(&self) -> String {
        let stem = match &self.file {
            Some(file) => state::relative_key(&self.root, file),
            None => self
                .root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "root".to_string()),
        };
        let stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let digest = self.digest();
        format!("{}_{}_{}", stem, self.mode, &digest[..8])
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.key())
    }
}

/// Counts stored alongside the results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub total_results: usize,
    pub error_count: usize,
    pub reused_count: usize,
}

impl CacheMetadata {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        Self {
            total_results: results.len(),
            error_count: results.iter().filter(|r| r.is_error()).count(),
            reused_count: results.iter().filter(|r| r.from_cache).count(),
        }
    }
}

/// One persisted analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub analysis_mode: AnalysisMode,
    pub root_directory: PathBuf,
    pub file_path: Option<PathBuf>,
    pub repo_hash: String,
    /// Absent in records written before drift detection existed.
    #[serde(default)]
    pub repo_state: Option<RepoState>,
    #[serde(default)]
    pub metadata: CacheMetadata,
    #[serde(default)]
    pub results: Vec<AnalysisResult>,
}

impl CacheEntry {
    pub fn new(fingerprint: &Fingerprint, results: Vec<AnalysisResult>, repo_state: RepoState) -> Self {
        Self {
            timestamp: Utc::now(),
            analysis_mode: fingerprint.mode,
            root_directory: fingerprint.root.clone(),
            file_path: fingerprint.file.clone(),
            repo_hash: state::compute_repo_hash(&repo_state),
            repo_state: Some(repo_state),
            metadata: CacheMetadata::from_results(&results),
            results,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            root: self.root_directory.clone(),
            file: self.file_path.clone(),
            mode: self.analysis_mode,
        }
    }

    /// Cached result for a definition, if one exists without an error.
    pub fn reusable_result(
        &self,
        name: &str,
        file: &Path,
        start_line: usize,
    ) -> Option<&AnalysisResult> {
        self.results
            .iter()
            .find(|r| r.is_for(name, file, start_line) && !r.is_error())
    }
}

/// Listing view of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub timestamp: DateTime<Utc>,
    pub analysis_mode: AnalysisMode,
    pub root_directory: PathBuf,
    pub file_path: Option<PathBuf>,
    pub result_count: usize,
    pub error_count: usize,
    pub has_repo_state: bool,
}

/// Drift between a cached analysis and the current tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
    pub has_changes: bool,
    #[serde(flatten)]
    pub changes: RepoChanges,
    pub cached_timestamp: DateTime<Utc>,
}

/// File-backed cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(fingerprint.file_name())
    }

    /// Build and write an entry, replacing any prior record for `fingerprint`.
    pub fn save(
        &self,
        fingerprint: &Fingerprint,
        results: Vec<AnalysisResult>,
        repo_state: RepoState,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(fingerprint, results, repo_state);
        self.save_entry(&entry)?;
        Ok(entry)
    }

    /// Write a fully-formed entry at its fingerprint's path.
    pub fn save_entry(&self, entry: &CacheEntry) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(&entry.fingerprint());
        let json = serde_json::to_vec_pretty(entry)?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        tmp.write_all(&json)
            .and_then(|_| tmp.flush())
            .map_err(|source| CacheError::Io {
                path: tmp.path().to_path_buf(),
                source,
            })?;
        tmp.persist(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        debug!(path = %path.display(), results = entry.results.len(), "saved cache entry");
        Ok(path)
    }

    /// Load the entry for `fingerprint`. Missing or corrupt records are a miss.
    pub fn load(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        read_entry(&self.path_for(fingerprint))
    }

    pub fn exists(&self, fingerprint: &Fingerprint) -> bool {
        self.path_for(fingerprint).is_file()
    }

    /// Remove the entry for `fingerprint`. Returns whether one existed.
    pub fn delete(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        let path = self.path_for(fingerprint);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Every readable entry, keyed by fingerprint key.
    pub fn list_all(&self) -> BTreeMap<String, CacheSummary> {
        let mut summaries = BTreeMap::new();
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "cache directory not readable");
                return summaries;
            }
        };

        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(cached) = read_entry(&path) else {
                continue;
            };
            summaries.insert(
                cached.fingerprint().key(),
                CacheSummary {
                    timestamp: cached.timestamp,
                    analysis_mode: cached.analysis_mode,
                    root_directory: cached.root_directory.clone(),
                    file_path: cached.file_path.clone(),
                    result_count: cached.results.len(),
                    error_count: cached.metadata.error_count,
                    has_repo_state: cached.repo_state.as_ref().is_some_and(|s| !s.is_empty()),
                },
            );
        }
        summaries
    }

    /// Compare the cached repository state with the tree `walker` sees now.
    ///
    /// Returns `None` when there is no entry or it carries no repository state.
    pub fn detect_repo_changes(
        &self,
        fingerprint: &Fingerprint,
        walker: &SourceWalker,
    ) -> Option<ChangeReport> {
        let entry = self.load(fingerprint)?;
        let cached = entry.repo_state.filter(|s| !s.is_empty())?;
        let current = state::compute_repo_state(walker);
        let changes = state::detect_changes(&cached, &current);

        Some(ChangeReport {
            has_changes: !changes.is_empty(),
            changes,
            cached_timestamp: entry.timestamp,
        })
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable cache entry");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache entry, ignoring");
            None
        }
    }
}
