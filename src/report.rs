//! Output formatting for codewise results.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: structured output for programmatic consumption

use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::cache::{CacheSummary, ChangeReport};
use crate::orchestrator::{BatchOutcome, ImprovementReport};
use crate::result::AnalysisResult;
use crate::reviewer::{Criterion, StructuredResponse};

// =============================================================================
// JSON Format
// =============================================================================

/// Top-level JSON report for one batch.
#[derive(Serialize)]
pub struct JsonReport<'a> {
    pub version: &'static str,
    pub root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub state: String,
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub reused: usize,
    pub average_score: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parse_failures: Vec<JsonParseFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<&'a ChangeReport>,
    pub results: &'a [AnalysisResult],
}

#[derive(Serialize)]
pub struct JsonParseFailure {
    pub file: String,
    pub message: String,
}

/// Build the JSON report for a batch.
pub fn json_report<'a>(root: &Path, file: Option<&Path>, outcome: &'a BatchOutcome) -> JsonReport<'a> {
    JsonReport {
        version: env!("CARGO_PKG_VERSION"),
        root: root.display().to_string(),
        file: file.map(|f| f.display().to_string()),
        state: outcome.state.to_string(),
        total: outcome.total,
        completed: outcome.results.len(),
        errors: outcome.error_count(),
        reused: outcome.reused_count(),
        average_score: average_score(&outcome.results),
        parse_failures: outcome
            .parse_failures
            .iter()
            .map(|f| JsonParseFailure {
                file: make_relative_path(&f.path, root),
                message: f.message.clone(),
            })
            .collect(),
        drift: outcome.drift.as_ref(),
        results: &outcome.results,
    }
}

/// Write a batch in JSON format.
pub fn write_json(root: &Path, file: Option<&Path>, outcome: &BatchOutcome) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&json_report(root, file, outcome))?;
    println!("{}", json);
    Ok(())
}

/// Mean overall score over results without errors.
pub fn average_score(results: &[AnalysisResult]) -> Option<f64> {
    let scores: Vec<f64> = results
        .iter()
        .filter(|r| !r.is_error())
        .map(|r| r.score() as f64)
        .collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

// =============================================================================
// Plain text
// =============================================================================

/// Render a structured response as plain text.
pub fn format_structured_response(response: &StructuredResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Overall Score: {}/10", response.overall_score);
    let _ = writeln!(out, "Feedback: {}", response.overall_feedback);
    out.push('\n');

    out.push_str("=== Criteria Scores ===\n");
    for criterion in Criterion::ALL {
        let _ = writeln!(out, "{}: {}/10", criterion.label(), response.score(criterion));
    }
    out.push('\n');

    out.push_str("=== Detailed Feedback ===\n");
    for criterion in Criterion::ALL {
        if let Some(feedback) = response.feedback(criterion) {
            let _ = writeln!(out, "{}: {}", criterion.label(), feedback);
        }
    }

    if !response.strengths.is_empty() {
        out.push_str("\n=== Strengths ===\n");
        for strength in &response.strengths {
            let _ = writeln!(out, "• {}", strength);
        }
    }

    if !response.suggestions.is_empty() {
        out.push_str("\n=== Improvement Suggestions ===\n");
        for suggestion in &response.suggestions {
            let _ = writeln!(out, "• {}", suggestion);
        }
    }

    out
}

// =============================================================================
// Pretty Format
// =============================================================================

fn write_header(label: &str, value: &str) {
    println!();
    print!("  ");
    print!("{}", "codewise".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();
    print!("  {}", format!("{:<10}", label).dimmed());
    println!("{}", value);
}

/// Write a batch in pretty (human-readable) format.
pub fn write_pretty(root: &Path, file: Option<&Path>, outcome: &BatchOutcome) {
    write_header("Root:", &root.display().to_string());
    if let Some(file) = file {
        print!("  {}", format!("{:<10}", "File:").dimmed());
        println!("{}", make_relative_path(file, root));
    }
    println!();

    if let Some(drift) = &outcome.drift {
        write_drift(drift);
        println!();
    }

    for result in &outcome.results {
        write_result(result, root);
    }

    if !outcome.parse_failures.is_empty() {
        println!(
            "  {} ({}):",
            "Skipped files".yellow(),
            outcome.parse_failures.len()
        );
        for failure in &outcome.parse_failures {
            println!(
                "    {}  {}",
                make_relative_path(&failure.path, root).blue(),
                failure.message.dimmed()
            );
        }
        println!();
    }

    write_summary(outcome);
    println!();
}

fn write_result(result: &AnalysisResult, root: &Path) {
    print!("  ");
    if result.is_error() {
        print!("{}", "ERROR".red());
    } else {
        write_colored_score(result.score());
    }
    print!("  {}", result.definition_name.bold());
    print!("  {}", make_relative_path(&result.file_path, root).blue());
    if result.start_line > 0 {
        print!("{}", format!(":{}", result.start_line).dimmed());
    }
    if result.from_cache {
        print!("  {}", "(cached)".dimmed());
    }
    println!();

    match &result.error {
        Some(error) => println!("         {}", error.red()),
        None => {
            let feedback = result.structured_response.overall_feedback.trim();
            if !feedback.is_empty() {
                println!("         {}", feedback);
            }
            for suggestion in result.structured_response.suggestions.iter().take(3) {
                println!("         {} {}", "→".dimmed(), suggestion);
            }
        }
    }
    println!();
}

fn write_colored_score(score: u8) {
    let text = format!("{:>2}/10", score);
    match score {
        9..=10 => print!("{}", text.green().bold()),
        7..=8 => print!("{}", text.green()),
        5..=6 => print!("{}", text.yellow()),
        3..=4 => print!("{}", text.yellow().bold()),
        _ => print!("{}", text.red()),
    }
}

fn write_summary(outcome: &BatchOutcome) {
    let state = outcome.state.to_string().to_uppercase();
    match outcome.state {
        crate::orchestrator::BatchState::Completed => print!("  {}", state.green()),
        crate::orchestrator::BatchState::Cancelled => print!("  {}", state.yellow()),
        _ => print!("  {}", state.red()),
    }
    print!("  {}/{} reviewed", outcome.results.len(), outcome.total);

    let errors = outcome.error_count();
    if errors > 0 {
        print!("  {}", format!("{} failed", errors).red());
    }
    let reused = outcome.reused_count();
    if reused > 0 {
        print!("  {}", format!("{} from cache", reused).dimmed());
    }
    if let Some(avg) = average_score(&outcome.results) {
        print!("  Average: {:.1}/10", avg);
    }
    println!();
}

/// Write a drift report.
pub fn write_drift(report: &ChangeReport) {
    let when = report.cached_timestamp.format("%Y-%m-%d %H:%M:%S UTC");
    if !report.has_changes {
        println!(
            "  {} since cached analysis ({})",
            "No changes".green(),
            when
        );
        return;
    }

    println!(
        "  {} since cached analysis ({}):",
        "Source changed".yellow(),
        when
    );
    for (label, paths) in [
        ("added", &report.changes.added),
        ("removed", &report.changes.removed),
        ("modified", &report.changes.modified),
    ] {
        for path in paths {
            println!("    {:<9}{}", label.dimmed(), path);
        }
    }
}

/// Write the cache listing.
pub fn write_cache_list(dir: &Path, entries: &BTreeMap<String, CacheSummary>) {
    write_header("Cache:", &dir.display().to_string());
    println!();

    if entries.is_empty() {
        println!("  {}", "No cached analyses".dimmed());
        println!();
        return;
    }

    for (key, summary) in entries {
        println!("  {}", key.bold());
        print!("    {}", summary.analysis_mode.to_string().dimmed());
        print!("  {}", summary.root_directory.display().to_string().blue());
        if let Some(file) = &summary.file_path {
            print!("  {}", make_relative_path(file, &summary.root_directory));
        }
        println!();
        print!(
            "    {} results",
            summary.result_count
        );
        if summary.error_count > 0 {
            print!(" ({} failed)", summary.error_count);
        }
        print!(
            "  {}",
            summary
                .timestamp
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
                .dimmed()
        );
        if !summary.has_repo_state {
            print!("  {}", "(no repository state)".yellow());
        }
        println!();
    }
    println!();
}

/// Write an improvement report.
pub fn write_improvement(report: &ImprovementReport) {
    write_header("Method:", &report.definition_name);
    println!();

    println!("  {}", "Original review".bold());
    for line in format_structured_response(&report.critique).lines() {
        println!("    {}", line);
    }
    println!();

    println!("  {}", "Improved code".bold());
    for line in report.improved_code.lines() {
        println!("    {}", line);
    }
    println!();

    println!("  {}", "Review of improved code".bold());
    for line in format_structured_response(&report.recritique).lines() {
        println!("    {}", line);
    }
    println!();

    let delta = report.score_delta();
    let text = format!("{:+}", delta);
    print!("  Score change: ");
    if delta > 0 {
        println!("{}", text.green());
    } else if delta < 0 {
        println!("{}", text.red());
    } else {
        println!("{}", text.dimmed());
    }
    println!();
}

/// Make a path relative to a base path for display.
fn make_relative_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}
