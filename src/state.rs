//! Repository state snapshots and drift detection.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::walk::SourceWalker;

const CHUNK_SIZE: usize = 4096;

/// Root-relative path (with `/` separators) → hex SHA-256 of the file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoState {
    files: BTreeMap<String, String>,
}

impl RepoState {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Difference between two [`RepoState`]s. Each list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl RepoChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Hex SHA-256 of a file, read in fixed-size chunks.
///
/// Returns an empty string if the file cannot be read.
pub fn compute_file_hash(path: &Path) -> String {
    match hash_reader(path) {
        Ok(digest) => digest,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot hash file");
            String::new()
        }
    }
}

fn hash_reader(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash every file the walker yields. Unreadable files are left out.
pub fn compute_repo_state(walker: &SourceWalker) -> RepoState {
    let root = walker.root();
    let files = walker
        .files()
        .filter_map(|path| {
            let digest = compute_file_hash(&path);
            if digest.is_empty() {
                return None;
            }
            Some((relative_key(root, &path), digest))
        })
        .collect();
    RepoState { files }
}

/// Single digest over a whole state, independent of insertion order.
pub fn compute_repo_hash(state: &RepoState) -> String {
    let mut hasher = Sha256::new();
    // BTreeMap iterates in sorted key order.
    for (path, digest) in &state.files {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Added, removed and modified paths going from `old` to `new`.
pub fn detect_changes(old: &RepoState, new: &RepoState) -> RepoChanges {
    let mut changes = RepoChanges::default();

    for (path, digest) in &new.files {
        match old.files.get(path) {
            None => changes.added.push(path.clone()),
            Some(previous) if previous != digest => changes.modified.push(path.clone()),
            Some(_) => {}
        }
    }
    changes.removed = old
        .files
        .keys()
        .filter(|path| !new.files.contains_key(*path))
        .cloned()
        .collect();

    changes
}

pub fn has_changes(old: &RepoState, new: &RepoState) -> bool {
    !detect_changes(old, new).is_empty()
}

/// Root-relative key with `/` separators.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
