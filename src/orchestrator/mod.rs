//! Batch analysis driver.
//!
//! A batch runs on one spawned tokio task:
//!
//! 1. Setup (blocking, on `spawn_blocking`): walk the root, snapshot the
//!    repository state, parse files and collect sampled usages.
//! 2. Look up a cache entry for the run's [`Fingerprint`]. If its
//!    repository state matches the snapshot, earlier non-error results are
//!    reused.
//! 3. Review each definition in discovery order, one reviewer call at a
//!    time, streaming [`AnalysisEvent`]s over a bounded channel.
//! 4. On completion, save the results with the snapshot from step 1.
//!
//! Cancellation is cooperative. The token is checked at the top of every
//! iteration, right before the reviewer call and right after it. A call in
//! flight when cancellation arrives runs to completion and its result is
//! discarded. Cancelled batches are not written to the cache.

mod cancel;
mod events;
mod improve;
mod state;

pub use cancel::CancellationToken;
pub use events::AnalysisEvent;
pub use improve::{extract_code, improve_definition, ImproveError, ImprovePhase, ImprovementReport};
pub use state::BatchState;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analysis::{ParseFailure, UsageCollector, UsageMap, UsageSampler};
use crate::cache::{CacheEntry, CacheStore, ChangeReport, Fingerprint};
use crate::config::Config;
use crate::result::AnalysisResult;
use crate::reviewer::Reviewer;
use crate::state::{compute_repo_state, detect_changes, RepoState};
use crate::walk::SourceWalker;

/// Setup-level failures. Per-definition failures never surface here.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("root directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("target file not found: {0}")]
    TargetNotFound(PathBuf),
    #[error("no Python source files under {0}")]
    NoSourceFiles(PathBuf),
    #[error("no function or method definitions found")]
    NoDefinitions,
    #[error("an analysis batch is already running")]
    AlreadyRunning,
    #[error("analysis setup failed: {0}")]
    Setup(String),
    #[error("analysis worker failed: {0}")]
    Worker(String),
}

/// What to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub root: PathBuf,
    /// Single-file target, absolute or relative to `root`.
    pub target: Option<PathBuf>,
}

impl AnalysisRequest {
    pub fn entire_project(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            target: None,
        }
    }

    pub fn single_file(root: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            target: Some(target.into()),
        }
    }
}

/// Final state and results of a batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub state: BatchState,
    /// Results in discovery order; shorter than `total` when cancelled.
    pub results: Vec<AnalysisResult>,
    /// Number of definitions the batch set out to review.
    pub total: usize,
    pub parse_failures: Vec<ParseFailure>,
    /// Drift reported for an existing cache entry, if any.
    pub drift: Option<ChangeReport>,
    pub cache_path: Option<PathBuf>,
}

impl BatchOutcome {
    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }

    pub fn reused_count(&self) -> usize {
        self.results.iter().filter(|r| r.from_cache).count()
    }
}

/// Handle to a running batch.
pub struct AnalysisHandle {
    pub events: mpsc::Receiver<AnalysisEvent>,
    join: JoinHandle<Result<BatchOutcome, AnalysisError>>,
    token: CancellationToken,
    state: Arc<Mutex<BatchState>>,
}

impl AnalysisHandle {
    /// Ask the batch to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn next_event(&mut self) -> Option<AnalysisEvent> {
        self.events.recv().await
    }

    /// Wait for the batch to finish, discarding unread events.
    ///
    /// A worker that panicked or was aborted leaves the batch `Failed`.
    pub async fn join(self) -> Result<BatchOutcome, AnalysisError> {
        drop(self.events);
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "analysis worker did not finish");
                *lock(&self.state) = BatchState::Failed;
                Err(AnalysisError::Worker(e.to_string()))
            }
        }
    }
}

/// Drives analysis batches against one reviewer.
pub struct Orchestrator {
    reviewer: Arc<dyn Reviewer>,
    config: Config,
    state: Arc<Mutex<BatchState>>,
    token: CancellationToken,
}

impl Orchestrator {
    pub fn new(reviewer: Arc<dyn Reviewer>, config: Config) -> Self {
        Self {
            reviewer,
            config,
            state: Arc::new(Mutex::new(BatchState::Idle)),
            token: CancellationToken::new(),
        }
    }

    /// Use an existing token, e.g. one shared with a signal handler.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> BatchState {
        *lock(&self.state)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a batch on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: AnalysisRequest) -> Result<AnalysisHandle, AnalysisError> {
        {
            let mut state = lock(&self.state);
            if !state.can_transition_to(BatchState::Running) {
                return Err(AnalysisError::AlreadyRunning);
            }
            *state = BatchState::Running;
        }
        self.token.reset();

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let worker = Worker {
            reviewer: Arc::clone(&self.reviewer),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            token: self.token.clone(),
            events: tx,
        };
        let join = tokio::spawn(worker.run(request));

        Ok(AnalysisHandle {
            events: rx,
            join,
            token: self.token.clone(),
            state: Arc::clone(&self.state),
        })
    }

    /// Start a batch and wait for it, ignoring events.
    pub async fn run(&self, request: AnalysisRequest) -> Result<BatchOutcome, AnalysisError> {
        self.start(request)?.join().await
    }
}

fn lock(state: &Mutex<BatchState>) -> std::sync::MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Setup output handed from the blocking phase to the review loop.
struct Prepared {
    root: PathBuf,
    target: Option<PathBuf>,
    usages: UsageMap,
    repo_state: RepoState,
}

struct Worker {
    reviewer: Arc<dyn Reviewer>,
    config: Config,
    state: Arc<Mutex<BatchState>>,
    token: CancellationToken,
    events: mpsc::Sender<AnalysisEvent>,
}

impl Worker {
    async fn run(self, request: AnalysisRequest) -> Result<BatchOutcome, AnalysisError> {
        self.emit(AnalysisEvent::StateChanged(BatchState::Running))
            .await;

        match self.execute(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "analysis batch failed");
                self.transition(BatchState::Failed).await;
                self.emit(AnalysisEvent::Failed(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, request: AnalysisRequest) -> Result<BatchOutcome, AnalysisError> {
        let prepared = self.prepare(request).await?;
        let Prepared {
            root,
            target,
            usages,
            repo_state,
        } = prepared;

        let total = usages.len();
        let fingerprint = Fingerprint::new(root.clone(), target);
        let store = CacheStore::new(self.config.cache_dir_for(&root));

        let (cached, drift) = self.cached_entry(&store, &fingerprint, &repo_state);
        if let Some(report) = &drift {
            self.emit(AnalysisEvent::CacheDrift(report.clone())).await;
        }

        self.emit(AnalysisEvent::Started {
            total,
            parse_failures: usages.failures.len(),
            reusing_cache: cached.is_some(),
        })
        .await;

        let mut results: Vec<AnalysisResult> = Vec::with_capacity(total);
        let mut cancelled = false;

        for (i, usage) in usages.iter().enumerate() {
            if self.token.is_cancelled() {
                cancelled = true;
                break;
            }

            let definition = &usage.definition;
            let name = definition.qualified_name();

            let reused = cached
                .as_ref()
                .and_then(|entry| {
                    entry.reusable_result(&name, &definition.file, definition.span.start_line)
                });
            if let Some(previous) = reused {
                let mut result = previous.clone();
                result.from_cache = true;
                self.record(&mut results, result, i, total, "Reused cached result")
                    .await;
                continue;
            }

            if self.token.is_cancelled() {
                cancelled = true;
                break;
            }

            debug!(definition = %name, "requesting critique");
            let examples: Vec<String> = usage.call_sites.iter().map(|s| s.context.clone()).collect();
            let reply = self.reviewer.critique(&definition.text, &examples).await;

            if self.token.is_cancelled() {
                info!(definition = %name, "cancelled during review, discarding result");
                cancelled = true;
                break;
            }

            let result = match reply {
                Ok(raw) => AnalysisResult::from_response(definition, raw),
                Err(e) => {
                    warn!(definition = %name, error = %e, "review failed");
                    self.emit(AnalysisEvent::UnitError {
                        definition: name.clone(),
                        file: definition.file.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    AnalysisResult::from_error(definition, e.to_string())
                }
            };
            self.record(&mut results, result, i, total, "Reviewed").await;
        }

        if cancelled {
            self.transition(BatchState::Cancelling).await;
            self.transition(BatchState::Cancelled).await;
            self.emit(AnalysisEvent::Cancelled {
                completed: results.len(),
                total,
            })
            .await;
            info!(completed = results.len(), total, "analysis cancelled");

            return Ok(BatchOutcome {
                state: BatchState::Cancelled,
                results,
                total,
                parse_failures: usages.failures,
                drift,
                cache_path: None,
            });
        }

        let cache_path = if self.config.use_cache {
            match store.save(&fingerprint, results.clone(), repo_state) {
                Ok(_) => Some(store.path_for(&fingerprint)),
                Err(e) => {
                    warn!(error = %e, "failed to save cache entry");
                    None
                }
            }
        } else {
            None
        };

        let errors = results.iter().filter(|r| r.is_error()).count();
        self.transition(BatchState::Completed).await;
        self.emit(AnalysisEvent::Finished {
            completed: results.len(),
            errors,
        })
        .await;
        info!(completed = results.len(), errors, "analysis completed");

        Ok(BatchOutcome {
            state: BatchState::Completed,
            results,
            total,
            parse_failures: usages.failures,
            drift,
            cache_path,
        })
    }

    /// Validate the request and run the blocking analysis phase.
    async fn prepare(&self, request: AnalysisRequest) -> Result<Prepared, AnalysisError> {
        if !request.root.is_dir() {
            return Err(AnalysisError::RootNotFound(request.root));
        }
        let root = request
            .root
            .canonicalize()
            .map_err(|_| AnalysisError::RootNotFound(request.root.clone()))?;

        let target = match request.target {
            Some(target) => {
                let joined = if target.is_absolute() {
                    target.clone()
                } else {
                    root.join(&target)
                };
                if !joined.is_file() {
                    return Err(AnalysisError::TargetNotFound(target));
                }
                Some(
                    joined
                        .canonicalize()
                        .map_err(|_| AnalysisError::TargetNotFound(target))?,
                )
            }
            None => None,
        };

        let walker = SourceWalker::new(&root)
            .with_cache_dir_name(self.config.cache_dir_name())
            .with_excluded_paths(&self.config.excluded_paths);
        let mut sampler = UsageSampler::new(self.config.usage_cap);
        if let Some(seed) = self.config.sample_seed {
            sampler = sampler.with_seed(seed);
        }

        let blocking_target = target.clone();
        let blocking_root = root.clone();
        let (files_found, usages, repo_state) = tokio::task::spawn_blocking(move || {
            let files: Vec<PathBuf> = walker.files().collect();
            let repo_state = compute_repo_state(&walker);
            let collector = UsageCollector::new(sampler).map_err(|e| AnalysisError::Setup(e.to_string()))?;
            let usages = collector.collect(&blocking_root, &files, blocking_target.as_deref());
            Ok::<_, AnalysisError>((files.len(), usages, repo_state))
        })
        .await
        .map_err(|e| AnalysisError::Worker(e.to_string()))??;

        if target.is_none() && files_found == 0 {
            return Err(AnalysisError::NoSourceFiles(root));
        }
        if usages.is_empty() {
            return Err(AnalysisError::NoDefinitions);
        }

        info!(
            root = %root.display(),
            files = files_found,
            definitions = usages.len(),
            "analysis prepared"
        );

        Ok(Prepared {
            root,
            target,
            usages,
            repo_state,
        })
    }

    /// Cache entry usable for this run, plus a drift report when one exists but is stale.
    fn cached_entry(
        &self,
        store: &CacheStore,
        fingerprint: &Fingerprint,
        current: &RepoState,
    ) -> (Option<CacheEntry>, Option<ChangeReport>) {
        if !self.config.use_cache {
            return (None, None);
        }
        let Some(entry) = store.load(fingerprint) else {
            debug!(key = %fingerprint.key(), "cache miss");
            return (None, None);
        };

        let cached_state = match &entry.repo_state {
            Some(state) if !state.is_empty() => state,
            _ => {
                debug!(key = %fingerprint.key(), "cache entry has no repository state, not reusing");
                return (None, None);
            }
        };

        let changes = detect_changes(cached_state, current);
        if changes.is_empty() {
            debug!(key = %fingerprint.key(), "cache hit");
            (Some(entry), None)
        } else {
            info!(changed = changes.total(), "source changed since cached analysis");
            let report = ChangeReport {
                has_changes: true,
                changes,
                cached_timestamp: entry.timestamp,
            };
            (None, Some(report))
        }
    }

    async fn record(
        &self,
        results: &mut Vec<AnalysisResult>,
        result: AnalysisResult,
        index: usize,
        total: usize,
        message: &str,
    ) {
        let definition = result.definition_name.clone();
        results.push(result.clone());
        self.emit(AnalysisEvent::Result(result)).await;
        self.emit(AnalysisEvent::Progress {
            current: index + 1,
            total,
            definition,
            message: message.to_string(),
        })
        .await;
    }

    async fn transition(&self, next: BatchState) {
        let changed = {
            let mut state = lock(&self.state);
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                let current = *state;
                warn!(from = %current, to = %next, "ignoring invalid state transition");
                false
            }
        };
        if changed {
            self.emit(AnalysisEvent::StateChanged(next)).await;
        }
    }

    /// Send an event. A consumer that went away is not an error.
    async fn emit(&self, event: AnalysisEvent) {
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reviewer::ReviewerError;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedReviewer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reviewer for FixedReviewer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn critique(&self, _: &str, _: &[String]) -> Result<String, ReviewerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"overall_score": 7, "overall_feedback": "ok"}"#.to_string())
        }

        async fn improve(&self, definition: &str, _: &str) -> Result<String, ReviewerError> {
            Ok(definition.to_string())
        }

        async fn recritique(&self, _: &str, _: &str, _: &str) -> Result<String, ReviewerError> {
            Ok("{}".to_string())
        }
    }

    fn config(temp: &TempDir) -> Config {
        Config {
            cache_dir: temp.path().join("cache"),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_missing_root() {
        let temp = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(FixedReviewer {
                calls: AtomicUsize::new(0),
            }),
            config(&temp),
        );

        let err = orchestrator
            .run(AnalysisRequest::entire_project(temp.path().join("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RootNotFound(_)));
        assert_eq!(orchestrator.state(), BatchState::Failed);
    }

    #[tokio::test]
    async fn test_runs_and_restarts() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.py"), "def foo():\n    pass\n").unwrap();

        let reviewer = Arc::new(FixedReviewer {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(reviewer.clone(), config(&temp));

        let first = orchestrator
            .run(AnalysisRequest::entire_project(&src))
            .await
            .unwrap();
        assert_eq!(first.state, BatchState::Completed);
        assert_eq!(first.results.len(), 1);
        assert_eq!(first.results[0].score(), 7);
        assert!(first.cache_path.is_some());

        let second = orchestrator
            .run(AnalysisRequest::entire_project(&src))
            .await
            .unwrap();
        assert_eq!(second.reused_count(), 1);
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.state(), BatchState::Completed);
    }
}
