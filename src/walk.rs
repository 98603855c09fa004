//! Source file discovery.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Default name of the on-disk cache directory.
pub const DEFAULT_CACHE_DIR_NAME: &str = ".codewise_cache";

/// Directories never descended into.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".venv",
    "venv",
    "node_modules",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "site-packages",
];

/// File-name prefix marking test modules.
const TEST_FILE_PREFIX: &str = "test_";

/// Enumerates analyzable Python files under a root.
///
/// Traversal is lexicographic by file name and restarts on every call to
/// [`SourceWalker::files`]. Unreadable entries are logged and skipped.
#[derive(Debug, Clone)]
pub struct SourceWalker {
    root: PathBuf,
    cache_dir_name: String,
    excluded: GlobSet,
}

impl SourceWalker {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache_dir_name: DEFAULT_CACHE_DIR_NAME.to_string(),
            excluded: GlobSet::empty(),
        }
    }

    /// Also skip directories with this name (the cache directory).
    pub fn with_cache_dir_name(mut self, name: impl Into<String>) -> Self {
        self.cache_dir_name = name.into();
        self
    }

    /// Exclude root-relative paths matching any of `patterns`.
    ///
    /// Invalid patterns are logged and ignored.
    pub fn with_excluded_paths(mut self, patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => warn!(pattern = %pattern, error = %e, "ignoring invalid exclude glob"),
            }
        }
        self.excluded = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "failed to build exclude globs");
            GlobSet::empty()
        });
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the root, yielding source file paths.
    pub fn files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| !self.is_excluded_dir(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(move |path| self.is_source_file(path))
    }

    /// Whether `path` would be yielded by [`files`](Self::files), ignoring directory exclusion.
    pub fn is_source_file(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !name.ends_with(".py") || name.starts_with(TEST_FILE_PREFIX) {
            return false;
        }
        !self.is_glob_excluded(path)
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        EXCLUDED_DIRS.contains(&name.as_ref())
            || name == self.cache_dir_name
            || self.is_glob_excluded(entry.path())
    }

    fn is_glob_excluded(&self, path: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.excluded.is_match(relative)
    }
}
