//! Command-line interface for codewise.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::{UsageCollector, UsageSampler};
use crate::cache::{CacheStore, Fingerprint};
use crate::config::Config;
use crate::orchestrator::{
    improve_definition, AnalysisEvent, AnalysisRequest, BatchState, CancellationToken,
    Orchestrator,
};
use crate::report;
use crate::reviewer::{HttpReviewer, Reviewer};
use crate::walk::SourceWalker;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// LLM-assisted review of Python functions and methods.
///
/// Codewise finds every function and method under a root, samples real call
/// sites for each, and asks a reviewer model to score it against sixteen
/// quality criteria. Results are cached per project and reused until the
/// source changes.
#[derive(Parser)]
#[command(name = "codewise")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Review definitions in a project or a single file
    #[command(visible_alias = "review")]
    Analyze(AnalyzeArgs),
    /// Inspect or clear cached analyses
    #[command(subcommand)]
    Cache(CacheCommands),
    /// Critique, improve and re-critique one method
    Improve(ImproveArgs),
}

/// Arguments for the analyze command.
#[derive(Parser)]
pub struct AnalyzeArgs {
    /// Project root to analyze
    pub root: PathBuf,

    /// Only review definitions in this file (relative to ROOT or absolute)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output format: pretty or json
    #[arg(long, default_value = "pretty")]
    pub format: String,

    /// Neither read nor write the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached analyses
    List(CacheListArgs),
    /// Report source changes since a cached analysis
    Status(CacheTargetArgs),
    /// Delete a cached analysis
    Clear(CacheTargetArgs),
}

/// Arguments for `cache list`.
#[derive(Parser)]
pub struct CacheListArgs {
    /// Project root whose cache directory is listed
    #[arg(default_value = ".")]
    pub root: PathBuf,

    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for `cache status` and `cache clear`.
#[derive(Parser)]
pub struct CacheTargetArgs {
    pub root: PathBuf,

    /// Single-file analysis to address instead of the whole project
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the improve command.
#[derive(Parser)]
pub struct ImproveArgs {
    pub root: PathBuf,

    /// File containing the method
    #[arg(short, long)]
    pub file: PathBuf,

    /// Function or `Class.method` name
    #[arg(short, long)]
    pub method: String,

    /// Output format: pretty or json
    #[arg(long, default_value = "pretty")]
    pub format: String,

    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

fn validate_format(format: &str) -> bool {
    if format != "pretty" && format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            format
        );
        return false;
    }
    true
}

fn load_config(path: Option<&Path>) -> Option<Config> {
    match Config::load(path) {
        Ok(c) => Some(c),
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            None
        }
    }
}

fn resolve_root(root: &Path) -> Option<PathBuf> {
    match root.canonicalize() {
        Ok(p) if p.is_dir() => Some(p),
        Ok(p) => {
            eprintln!("Error: {} is not a directory", p.display());
            None
        }
        Err(e) => {
            eprintln!("Error: cannot access path {:?}: {}", root, e);
            None
        }
    }
}

/// Resolve a file argument against the root, the way the orchestrator does.
fn resolve_file(root: &Path, file: &Path) -> Option<PathBuf> {
    let joined = if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    };
    match joined.canonicalize() {
        Ok(p) if p.is_file() => Some(p),
        _ => {
            eprintln!("Error: file not found: {}", file.display());
            None
        }
    }
}

fn build_reviewer(config: &Config) -> Option<Arc<dyn Reviewer>> {
    match HttpReviewer::new(config.reviewer.clone()) {
        Ok(r) => Some(Arc::new(r)),
        Err(e) => {
            eprintln!("Error: cannot create reviewer client: {}", e);
            None
        }
    }
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg} [{elapsed_precise}]")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

const CANCELLING_MESSAGE: &str = "cancelling after current review...";

/// Stop the batch at its next checkpoint and say so while the current review finishes.
fn request_cancel(token: &CancellationToken, bar: &ProgressBar) {
    token.cancel();
    bar.set_message(CANCELLING_MESSAGE);
}

/// Run the analyze command.
pub fn run_analyze(args: &AnalyzeArgs) -> anyhow::Result<i32> {
    if !validate_format(&args.format) {
        return Ok(EXIT_ERROR);
    }
    let Some(mut config) = load_config(args.config.as_deref()) else {
        return Ok(EXIT_ERROR);
    };
    if args.no_cache {
        config.use_cache = false;
    }
    let Some(root) = resolve_root(&args.root) else {
        return Ok(EXIT_ERROR);
    };
    let target = match &args.file {
        Some(file) => match resolve_file(&root, file) {
            Some(p) => Some(p),
            None => return Ok(EXIT_ERROR),
        },
        None => None,
    };
    let Some(reviewer) = build_reviewer(&config) else {
        return Ok(EXIT_ERROR);
    };

    let json = args.format == "json";
    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(async {
        let orchestrator = Orchestrator::new(reviewer, config);
        let request = AnalysisRequest {
            root: root.clone(),
            target: target.clone(),
        };
        let mut handle = orchestrator.start(request)?;

        let bar = progress_bar(json);

        let token = handle.token().clone();
        let interrupted_bar = bar.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                request_cancel(&token, &interrupted_bar);
            }
        });

        while let Some(event) = handle.next_event().await {
            match event {
                AnalysisEvent::Started { total, .. } => bar.set_length(total as u64),
                AnalysisEvent::Progress {
                    current,
                    definition,
                    ..
                } => {
                    bar.set_position(current as u64);
                    bar.set_message(definition);
                }
                AnalysisEvent::UnitError {
                    definition, error, ..
                } => bar.println(format!("  failed: {}: {}", definition, error)),
                _ => {}
            }
        }
        bar.finish_and_clear();

        handle.join().await
    });

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    if json {
        report::write_json(&root, target.as_deref(), &outcome)?;
    } else {
        report::write_pretty(&root, target.as_deref(), &outcome);
    }

    Ok(match outcome.state {
        BatchState::Completed => EXIT_SUCCESS,
        _ => EXIT_FAILED,
    })
}

/// Run `cache list`.
pub fn run_cache_list(args: &CacheListArgs) -> anyhow::Result<i32> {
    let Some(config) = load_config(args.config.as_deref()) else {
        return Ok(EXIT_ERROR);
    };
    let Some(root) = resolve_root(&args.root) else {
        return Ok(EXIT_ERROR);
    };

    let store = CacheStore::new(config.cache_dir_for(&root));
    report::write_cache_list(store.dir(), &store.list_all());
    Ok(EXIT_SUCCESS)
}

fn cache_target(args: &CacheTargetArgs) -> Option<(Config, PathBuf, Fingerprint)> {
    let config = load_config(args.config.as_deref())?;
    let root = resolve_root(&args.root)?;
    let file = match &args.file {
        Some(file) => Some(resolve_file(&root, file)?),
        None => None,
    };
    let fingerprint = Fingerprint::new(root.clone(), file);
    Some((config, root, fingerprint))
}

/// Run `cache status`.
pub fn run_cache_status(args: &CacheTargetArgs) -> anyhow::Result<i32> {
    let Some((config, root, fingerprint)) = cache_target(args) else {
        return Ok(EXIT_ERROR);
    };
    let store = CacheStore::new(config.cache_dir_for(&root));

    if !store.exists(&fingerprint) {
        println!("No cached analysis for {}", fingerprint.key());
        return Ok(EXIT_FAILED);
    }

    let walker = SourceWalker::new(&root)
        .with_cache_dir_name(config.cache_dir_name())
        .with_excluded_paths(&config.excluded_paths);
    match store.detect_repo_changes(&fingerprint, &walker) {
        Some(report) => {
            report::write_drift(&report);
            Ok(if report.has_changes {
                EXIT_FAILED
            } else {
                EXIT_SUCCESS
            })
        }
        None => {
            println!("Cached analysis has no repository state; change status unknown");
            Ok(EXIT_FAILED)
        }
    }
}

/// Run `cache clear`.
pub fn run_cache_clear(args: &CacheTargetArgs) -> anyhow::Result<i32> {
    let Some((config, root, fingerprint)) = cache_target(args) else {
        return Ok(EXIT_ERROR);
    };
    let store = CacheStore::new(config.cache_dir_for(&root));

    if store.delete(&fingerprint)? {
        println!("Removed {}", store.path_for(&fingerprint).display());
    } else {
        println!("No cached analysis for {}", fingerprint.key());
    }
    Ok(EXIT_SUCCESS)
}

/// Run the improve command.
pub fn run_improve(args: &ImproveArgs) -> anyhow::Result<i32> {
    if !validate_format(&args.format) {
        return Ok(EXIT_ERROR);
    }
    let Some(config) = load_config(args.config.as_deref()) else {
        return Ok(EXIT_ERROR);
    };
    let Some(root) = resolve_root(&args.root) else {
        return Ok(EXIT_ERROR);
    };
    let Some(file) = resolve_file(&root, &args.file) else {
        return Ok(EXIT_ERROR);
    };
    let Some(reviewer) = build_reviewer(&config) else {
        return Ok(EXIT_ERROR);
    };

    let walker = SourceWalker::new(&root)
        .with_cache_dir_name(config.cache_dir_name())
        .with_excluded_paths(&config.excluded_paths);
    let files: Vec<PathBuf> = walker.files().collect();
    let mut sampler = UsageSampler::new(config.usage_cap);
    if let Some(seed) = config.sample_seed {
        sampler = sampler.with_seed(seed);
    }
    let usages = UsageCollector::new(sampler)?.collect(&root, &files, Some(file.as_path()));

    let Some(usage) = usages.find(&args.method, Some(file.as_path())) else {
        eprintln!(
            "Error: no definition named {:?} in {}",
            args.method,
            args.file.display()
        );
        return Ok(EXIT_ERROR);
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let improvement = match runtime.block_on(improve_definition(reviewer.as_ref(), usage)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_FAILED);
        }
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&improvement)?);
    } else {
        report::write_improvement(&improvement);
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::parse_from([
            "codewise", "analyze", "proj", "--file", "a.py", "--format", "json", "--no-cache",
        ]);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.root, PathBuf::from("proj"));
                assert_eq!(args.file, Some(PathBuf::from("a.py")));
                assert_eq!(args.format, "json");
                assert!(args.no_cache);
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_parse_cache_subcommands() {
        let cli = Cli::parse_from(["codewise", "cache", "list"]);
        assert!(matches!(
            cli.command,
            Commands::Cache(CacheCommands::List(ref a)) if a.root == PathBuf::from(".")
        ));

        let cli = Cli::parse_from(["codewise", "cache", "status", "proj", "-f", "a.py"]);
        assert!(matches!(
            cli.command,
            Commands::Cache(CacheCommands::Status(ref a)) if a.file.is_some()
        ));
    }

    #[test]
    fn test_request_cancel_reports_immediately() {
        let token = CancellationToken::new();
        let bar = ProgressBar::hidden();
        bar.set_message("funcs.one");

        request_cancel(&token, &bar);

        assert!(token.is_cancelled());
        assert_eq!(bar.message(), CANCELLING_MESSAGE);
    }

    #[test]
    fn test_invalid_format_is_usage_error() {
        let args = AnalyzeArgs {
            root: PathBuf::from("."),
            file: None,
            format: "sarif".to_string(),
            no_cache: false,
            config: None,
        };
        assert_eq!(run_analyze(&args).unwrap(), EXIT_ERROR);
    }
}
