//! Critique → improve → re-critique for a single definition.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::analysis::MethodUsage;
use crate::reviewer::{Reviewer, ReviewerError, StructuredResponse};

/// Stage of the improvement flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovePhase {
    Critique,
    Improve,
    Recritique,
}

#[derive(Error, Debug)]
#[error("{phase:?} failed: {source}")]
pub struct ImproveError {
    pub phase: ImprovePhase,
    #[source]
    pub source: ReviewerError,
}

/// Everything produced while improving one definition.
#[derive(Debug, Clone, Serialize)]
pub struct ImprovementReport {
    pub definition_name: String,
    pub original_code: String,
    pub critique: StructuredResponse,
    pub improved_code: String,
    pub recritique: StructuredResponse,
}

impl ImprovementReport {
    /// Change in overall score from the first review to the second.
    pub fn score_delta(&self) -> i16 {
        self.recritique.overall_score as i16 - self.critique.overall_score as i16
    }
}

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:python|py)?[ \t]*\r?\n([\s\S]*?)```").expect("valid code block regex")
});

/// First fenced code block in `text`, or the whole text if there is none.
pub fn extract_code(text: &str) -> String {
    CODE_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim()
        .to_string()
}

/// Run the three review phases for `usage`.
pub async fn improve_definition(
    reviewer: &dyn Reviewer,
    usage: &MethodUsage,
) -> Result<ImprovementReport, ImproveError> {
    let definition = &usage.definition;
    let name = definition.qualified_name();
    let examples: Vec<String> = usage.call_sites.iter().map(|s| s.context.clone()).collect();

    info!(definition = %name, "critiquing");
    let raw_critique = reviewer
        .critique(&definition.text, &examples)
        .await
        .map_err(|source| ImproveError {
            phase: ImprovePhase::Critique,
            source,
        })?;

    info!(definition = %name, "improving");
    let raw_improved = reviewer
        .improve(&definition.text, &raw_critique)
        .await
        .map_err(|source| ImproveError {
            phase: ImprovePhase::Improve,
            source,
        })?;
    let improved_code = extract_code(&raw_improved);
    if improved_code.is_empty() {
        warn!(definition = %name, "reviewer returned no improved code");
    }

    info!(definition = %name, "re-critiquing");
    let raw_recritique = reviewer
        .recritique(&definition.text, &improved_code, &raw_critique)
        .await
        .map_err(|source| ImproveError {
            phase: ImprovePhase::Recritique,
            source,
        })?;

    Ok(ImprovementReport {
        definition_name: name,
        original_code: definition.text.clone(),
        critique: StructuredResponse::parse_or_default(&raw_critique),
        improved_code,
        recritique: StructuredResponse::parse_or_default(&raw_recritique),
    })
}
