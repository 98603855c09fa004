//! Integration tests for batch orchestration with scripted reviewers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codewise::config::Config;
use codewise::orchestrator::{
    AnalysisError, AnalysisEvent, AnalysisRequest, BatchState, CancellationToken, Orchestrator,
};
use codewise::reviewer::{Criterion, Reviewer, ReviewerError};
use tempfile::TempDir;

const GOOD_RESPONSE: &str = r#"Here is my review:
```json
{"overall_score": 8, "overall_feedback": "Solid.", "criteria_scores": {"naming": 9}}
```"#;

/// Reviewer driven by a per-call script.
struct ScriptedReviewer {
    calls: AtomicUsize,
    /// Cancel this token during the given (1-based) call.
    cancel_on: Option<(usize, CancellationToken)>,
    /// Fail the given (1-based) call.
    fail_on: Option<usize>,
    /// Panic on the given (1-based) call.
    panic_on: Option<usize>,
    /// Reply with the call number as the overall score instead of `reply`.
    numbered: bool,
    reply: String,
    delay: Duration,
}

impl ScriptedReviewer {
    fn new(reply: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            cancel_on: None,
            fail_on: None,
            panic_on: None,
            numbered: false,
            reply: reply.to_string(),
            delay: Duration::ZERO,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn critique(&self, _: &str, _: &[String]) -> Result<String, ReviewerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((at, token)) = &self.cancel_on {
            if *at == n {
                token.cancel();
            }
        }
        if self.fail_on == Some(n) {
            return Err(ReviewerError::RateLimited);
        }
        if self.panic_on == Some(n) {
            panic!("reviewer exploded on call {}", n);
        }
        if self.numbered {
            return Ok(format!(r#"{{"overall_score": {}}}"#, n));
        }
        Ok(self.reply.clone())
    }

    async fn improve(&self, definition: &str, _: &str) -> Result<String, ReviewerError> {
        Ok(format!("```python\n{}\n```", definition))
    }

    async fn recritique(&self, _: &str, _: &str, _: &str) -> Result<String, ReviewerError> {
        Ok(self.reply.clone())
    }
}

fn five_definitions() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    fs::create_dir(&root).unwrap();
    fs::write(
        root.join("funcs.py"),
        "def one():\n    return 1\n\n\
         def two():\n    return one() + 1\n\n\
         def three():\n    return two() + 1\n\n\
         def four():\n    return three() + 1\n\n\
         def five():\n    return four() + 1\n",
    )
    .unwrap();
    let root = root.canonicalize().unwrap();
    (temp, root)
}

fn config(temp: &TempDir) -> Config {
    Config {
        cache_dir: temp.path().join("cache"),
        sample_seed: Some(7),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_cancel_mid_batch_keeps_completed_results() {
    let (temp, root) = five_definitions();
    let token = CancellationToken::new();
    let reviewer = Arc::new(ScriptedReviewer {
        cancel_on: Some((3, token.clone())),
        ..ScriptedReviewer::new(GOOD_RESPONSE)
    });
    let orchestrator = Orchestrator::new(reviewer.clone(), config(&temp)).with_token(token);

    let outcome = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();

    assert_eq!(outcome.state, BatchState::Cancelled);
    assert_eq!(outcome.total, 5);
    let names: Vec<_> = outcome
        .results
        .iter()
        .map(|r| r.definition_name.as_str())
        .collect();
    assert_eq!(names, vec!["one", "two"]);
    assert_eq!(reviewer.calls(), 3);
    assert!(outcome.cache_path.is_none());
    assert_eq!(orchestrator.state(), BatchState::Cancelled);

    let cache_dir = temp.path().join("cache");
    let cached_files = fs::read_dir(&cache_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(cached_files, 0);
}

#[tokio::test]
async fn test_events_stream_in_order() {
    let (temp, root) = five_definitions();
    let orchestrator = Orchestrator::new(Arc::new(ScriptedReviewer::new(GOOD_RESPONSE)), config(&temp));

    let mut handle = orchestrator
        .start(AnalysisRequest::entire_project(&root))
        .unwrap();

    let mut states = Vec::new();
    let mut progress = Vec::new();
    let mut started_total = None;
    while let Some(event) = handle.next_event().await {
        match event {
            AnalysisEvent::StateChanged(state) => states.push(state),
            AnalysisEvent::Started { total, .. } => started_total = Some(total),
            AnalysisEvent::Progress { current, total, .. } => progress.push((current, total)),
            _ => {}
        }
    }
    let outcome = handle.join().await.unwrap();

    assert_eq!(states, vec![BatchState::Running, BatchState::Completed]);
    assert_eq!(started_total, Some(5));
    assert_eq!(progress, (1..=5).map(|i| (i, 5)).collect::<Vec<_>>());
    assert_eq!(outcome.results.len(), 5);
    assert!(outcome.results.iter().all(|r| r.score() == 8));
}

#[tokio::test]
async fn test_reviewer_error_does_not_stop_batch() {
    let (temp, root) = five_definitions();
    let reviewer = Arc::new(ScriptedReviewer {
        fail_on: Some(2),
        ..ScriptedReviewer::new(GOOD_RESPONSE)
    });
    let orchestrator = Orchestrator::new(reviewer, config(&temp));

    let outcome = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();

    assert_eq!(outcome.state, BatchState::Completed);
    assert_eq!(outcome.results.len(), 5);
    assert_eq!(outcome.error_count(), 1);

    let failed = &outcome.results[1];
    assert_eq!(failed.definition_name, "two");
    assert!(failed.is_error());
    assert_eq!(failed.score(), 0);
}

#[tokio::test]
async fn test_malformed_response_scores_zero() {
    let (temp, root) = five_definitions();
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedReviewer::new("I cannot review this, sorry.")),
        config(&temp),
    );

    let outcome = orchestrator
        .run(AnalysisRequest::single_file(&root, "funcs.py"))
        .await
        .unwrap();

    assert_eq!(outcome.state, BatchState::Completed);
    let response = &outcome.results[0].structured_response;
    assert_eq!(response.overall_score, 0);
    assert_eq!(response.criteria_scores.len(), Criterion::ALL.len());
    for criterion in Criterion::ALL {
        assert_eq!(response.score(criterion), 0);
    }
    assert!(!response.overall_feedback.is_empty());
}

#[tokio::test]
async fn test_rerun_reuses_cache_until_source_changes() {
    let (temp, root) = five_definitions();
    let reviewer = Arc::new(ScriptedReviewer::new(GOOD_RESPONSE));
    let orchestrator = Orchestrator::new(reviewer.clone(), config(&temp));
    let request = AnalysisRequest::entire_project(&root);

    let first = orchestrator.run(request.clone()).await.unwrap();
    assert!(first.cache_path.as_deref().map(Path::exists).unwrap_or(false));
    assert_eq!(reviewer.calls(), 5);

    let second = orchestrator.run(request.clone()).await.unwrap();
    assert_eq!(second.reused_count(), 5);
    assert!(second.drift.is_none());
    assert_eq!(reviewer.calls(), 5);

    fs::write(root.join("extra.py"), "def six():\n    return 6\n").unwrap();

    let third = orchestrator.run(request).await.unwrap();
    let drift = third.drift.as_ref().expect("drift is reported");
    assert!(drift.has_changes);
    assert_eq!(drift.changes.added, vec!["extra.py".to_string()]);
    assert_eq!(third.reused_count(), 0);
    assert_eq!(third.results.len(), 6);
    assert_eq!(reviewer.calls(), 11);
}

#[tokio::test]
async fn test_no_cache_config_skips_store() {
    let (temp, root) = five_definitions();
    let reviewer = Arc::new(ScriptedReviewer::new(GOOD_RESPONSE));
    let config = Config {
        use_cache: false,
        ..config(&temp)
    };
    let orchestrator = Orchestrator::new(reviewer.clone(), config);

    let first = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();
    assert!(first.cache_path.is_none());

    orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();
    assert_eq!(reviewer.calls(), 10);
}

#[tokio::test]
async fn test_setup_failures() {
    let (temp, root) = five_definitions();
    let orchestrator = Orchestrator::new(Arc::new(ScriptedReviewer::new(GOOD_RESPONSE)), config(&temp));

    let err = orchestrator
        .run(AnalysisRequest::single_file(&root, "missing.py"))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::TargetNotFound(_)));
    assert_eq!(orchestrator.state(), BatchState::Failed);

    let empty = temp.path().join("empty");
    fs::create_dir(&empty).unwrap();
    let err = orchestrator
        .run(AnalysisRequest::entire_project(&empty))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::NoSourceFiles(_)));

    let no_defs = temp.path().join("nodefs");
    fs::create_dir(&no_defs).unwrap();
    fs::write(no_defs.join("consts.py"), "X = 1\n").unwrap();
    let err = orchestrator
        .run(AnalysisRequest::entire_project(&no_defs))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::NoDefinitions));

    // A failed batch does not block the next one.
    let outcome = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();
    assert_eq!(outcome.state, BatchState::Completed);
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() {
    let (temp, root) = five_definitions();
    let reviewer = Arc::new(ScriptedReviewer {
        delay: Duration::from_millis(50),
        ..ScriptedReviewer::new(GOOD_RESPONSE)
    });
    let orchestrator = Orchestrator::new(reviewer, config(&temp));

    let handle = orchestrator
        .start(AnalysisRequest::entire_project(&root))
        .unwrap();
    let second = orchestrator.start(AnalysisRequest::entire_project(&root));
    assert!(matches!(second, Err(AnalysisError::AlreadyRunning)));

    handle.cancel();
    let outcome = handle.join().await.unwrap();
    assert_eq!(outcome.state, BatchState::Cancelled);
    assert!(outcome.results.len() < 5);
}

#[tokio::test]
async fn test_new_batch_after_cancel_runs_to_completion() {
    let (temp, root) = five_definitions();
    let token = CancellationToken::new();
    let reviewer = Arc::new(ScriptedReviewer {
        cancel_on: Some((3, token.clone())),
        ..ScriptedReviewer::new(GOOD_RESPONSE)
    });
    let orchestrator = Orchestrator::new(reviewer.clone(), config(&temp)).with_token(token.clone());

    let first = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();
    assert_eq!(first.state, BatchState::Cancelled);
    assert!(token.is_cancelled());

    // Calls 4..=8 never hit the cancel trigger.
    let second = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();
    assert_eq!(second.state, BatchState::Completed);
    assert_eq!(second.results.len(), 5);
    assert!(!token.is_cancelled());
    assert_eq!(orchestrator.state(), BatchState::Completed);
}

#[tokio::test]
async fn test_cached_results_keep_same_named_definitions_apart() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    fs::create_dir(&root).unwrap();
    fs::write(
        root.join("cfg.py"),
        concat!(
            "class Cfg:\n",
            "    @property\n",
            "    def name(self):\n",
            "        return self._name\n",
            "\n",
            "    @name.setter\n",
            "    def name(self, value):\n",
            "        self._name = value\n",
        ),
    )
    .unwrap();
    let root = root.canonicalize().unwrap();

    let reviewer = Arc::new(ScriptedReviewer {
        numbered: true,
        ..ScriptedReviewer::new(GOOD_RESPONSE)
    });
    let orchestrator = Orchestrator::new(reviewer.clone(), config(&temp));
    let request = AnalysisRequest::entire_project(&root);

    let scores = |outcome: &codewise::BatchOutcome| -> Vec<(usize, u8)> {
        outcome
            .results
            .iter()
            .map(|r| (r.start_line, r.score()))
            .collect()
    };

    let first = orchestrator.run(request.clone()).await.unwrap();
    assert_eq!(first.results.len(), 2);
    assert!(first.results.iter().all(|r| r.definition_name == "Cfg.name"));
    assert_ne!(first.results[0].start_line, first.results[1].start_line);
    assert_eq!(
        first.results.iter().map(|r| r.score()).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let second = orchestrator.run(request).await.unwrap();
    assert_eq!(second.reused_count(), 2);
    assert_eq!(scores(&second), scores(&first));
    assert_eq!(reviewer.calls(), 2);
}

#[tokio::test]
async fn test_panicking_reviewer_fails_batch_and_allows_restart() {
    let (temp, root) = five_definitions();
    let reviewer = Arc::new(ScriptedReviewer {
        panic_on: Some(1),
        ..ScriptedReviewer::new(GOOD_RESPONSE)
    });
    let orchestrator = Orchestrator::new(reviewer.clone(), config(&temp));

    let err = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Worker(_)));
    assert_eq!(orchestrator.state(), BatchState::Failed);

    let outcome = orchestrator
        .run(AnalysisRequest::entire_project(&root))
        .await
        .unwrap();
    assert_eq!(outcome.state, BatchState::Completed);
    assert_eq!(outcome.results.len(), 5);
}
