//! Structured reviewer responses.
//!
//! Reviewers answer in free text that is expected to contain one JSON
//! object. Parsing tries a fenced code block first, then the outermost brace
//! span, then the whole text. Anything that still fails becomes the default
//! all-zero response with the error in `overall_feedback`.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Highest score a reviewer can give.
pub const MAX_SCORE: u8 = 10;

/// A named review dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Criterion {
    SeparationOfConcerns,
    Documentation,
    LogicClarity,
    Understandability,
    Efficiency,
    ErrorHandling,
    Testability,
    Reusability,
    CodeConsistency,
    DependencyManagement,
    SecurityAwareness,
    SideEffects,
    Scalability,
    ResourceManagement,
    Encapsulation,
    Readability,
}

impl Criterion {
    /// Every criterion, in prompt order.
    pub const ALL: [Criterion; 16] = [
        Criterion::SeparationOfConcerns,
        Criterion::Documentation,
        Criterion::LogicClarity,
        Criterion::Understandability,
        Criterion::Efficiency,
        Criterion::ErrorHandling,
        Criterion::Testability,
        Criterion::Reusability,
        Criterion::CodeConsistency,
        Criterion::DependencyManagement,
        Criterion::SecurityAwareness,
        Criterion::SideEffects,
        Criterion::Scalability,
        Criterion::ResourceManagement,
        Criterion::Encapsulation,
        Criterion::Readability,
    ];

    /// JSON key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::SeparationOfConcerns => "separation_of_concerns",
            Criterion::Documentation => "documentation",
            Criterion::LogicClarity => "logic_clarity",
            Criterion::Understandability => "understandability",
            Criterion::Efficiency => "efficiency",
            Criterion::ErrorHandling => "error_handling",
            Criterion::Testability => "testability",
            Criterion::Reusability => "reusability",
            Criterion::CodeConsistency => "code_consistency",
            Criterion::DependencyManagement => "dependency_management",
            Criterion::SecurityAwareness => "security_awareness",
            Criterion::SideEffects => "side_effects",
            Criterion::Scalability => "scalability",
            Criterion::ResourceManagement => "resource_management",
            Criterion::Encapsulation => "encapsulation",
            Criterion::Readability => "readability",
        }
    }

    /// Human-readable label, e.g. "Separation Of Concerns".
    pub fn label(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a reviewer response could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("no JSON object found in response")]
    NoJson,
    #[error("response JSON is not an object")]
    NotAnObject,
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
}

/// Normalized reviewer verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub overall_score: u8,
    pub overall_feedback: String,
    /// Criterion key → score. Always holds every [`Criterion`].
    pub criteria_scores: BTreeMap<String, u8>,
    /// Criterion key → optional feedback. Always holds every [`Criterion`].
    pub criteria_feedback: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
}

impl Default for StructuredResponse {
    fn default() -> Self {
        Self::with_error("Unable to parse response")
    }
}

impl StructuredResponse {
    /// All-zero response carrying `error` as its feedback.
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            overall_score: 0,
            overall_feedback: error.into(),
            criteria_scores: Criterion::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), 0))
                .collect(),
            criteria_feedback: Criterion::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), None))
                .collect(),
            suggestions: Vec::new(),
            strengths: Vec::new(),
        }
    }

    pub fn score(&self, criterion: Criterion) -> u8 {
        self.criteria_scores
            .get(criterion.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn feedback(&self, criterion: Criterion) -> Option<&str> {
        self.criteria_feedback
            .get(criterion.as_str())
            .and_then(|f| f.as_deref())
    }

    /// Parse reviewer text into a response.
    pub fn parse(text: &str) -> Result<Self, ResponseError> {
        let value = extract_json(text).ok_or(ResponseError::NoJson)?;
        let object = value.as_object().ok_or(ResponseError::NotAnObject)?;
        from_object(object)
    }

    /// Parse reviewer text, substituting the default response on failure.
    pub fn parse_or_default(text: &str) -> Self {
        Self::parse(text).unwrap_or_else(|e| {
            Self::with_error(format!("Failed to parse reviewer response: {}", e))
        })
    }
}

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("valid fenced JSON regex")
});

static BRACED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[\s\S]*\}").expect("valid braced JSON regex"));

fn extract_json(text: &str) -> Option<Value> {
    let fenced = FENCED_JSON
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    let braced = BRACED_JSON.find(text).map(|m| m.as_str());

    fenced
        .into_iter()
        .chain(braced)
        .chain(std::iter::once(text))
        .find_map(|candidate| serde_json::from_str(candidate).ok())
}

fn from_object(object: &Map<String, Value>) -> Result<StructuredResponse, ResponseError> {
    let overall_score = object
        .get("overall_score")
        .and_then(score_of)
        .ok_or(ResponseError::MissingField("overall_score"))?;

    let mut response = StructuredResponse::with_error(String::new());
    response.overall_score = overall_score;
    response.overall_feedback = object
        .get("overall_feedback")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(scores) = object.get("criteria_scores").and_then(Value::as_object) {
        for criterion in Criterion::ALL {
            if let Some(score) = scores.get(criterion.as_str()).and_then(score_of) {
                response
                    .criteria_scores
                    .insert(criterion.as_str().to_string(), score);
            }
        }
    }

    if let Some(feedback) = object.get("criteria_feedback").and_then(Value::as_object) {
        for criterion in Criterion::ALL {
            let text = feedback
                .get(criterion.as_str())
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string);
            response
                .criteria_feedback
                .insert(criterion.as_str().to_string(), text);
        }
    }

    response.suggestions = string_list(object.get("suggestions"));
    response.strengths = string_list(object.get("strengths"));

    Ok(response)
}

/// Accepts integers, floats and numeric strings; clamps to `0..=MAX_SCORE`.
fn score_of(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(raw.round().clamp(0.0, MAX_SCORE as f64) as u8)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "overall_score": 8,
        "overall_feedback": "Solid method.",
        "criteria_scores": {
            "separation_of_concerns": 9, "documentation": 6, "logic_clarity": 8,
            "understandability": 8, "efficiency": 7, "error_handling": 5,
            "testability": 8, "reusability": 7, "code_consistency": 9,
            "dependency_management": 8, "security_awareness": 7, "side_effects": 9,
            "scalability": 7, "resource_management": 8, "encapsulation": 8,
            "readability": 9
        },
        "criteria_feedback": {"documentation": "Add a docstring.", "efficiency": null},
        "suggestions": ["Add a docstring"],
        "strengths": ["Clear naming", "Small"]
    }"#;

    #[test]
    fn test_parse_plain_json() {
        let r = StructuredResponse::parse(FULL).unwrap();
        assert_eq!(r.overall_score, 8);
        assert_eq!(r.overall_feedback, "Solid method.");
        assert_eq!(r.criteria_scores.len(), 16);
        assert_eq!(r.score(Criterion::Documentation), 6);
        assert_eq!(r.feedback(Criterion::Documentation), Some("Add a docstring."));
        assert_eq!(r.feedback(Criterion::Efficiency), None);
        assert_eq!(r.criteria_feedback.len(), 16);
        assert_eq!(r.strengths, vec!["Clear naming", "Small"]);
    }

    #[test]
    fn test_parse_fenced_block_with_prose() {
        let text = format!("Here is my review:\n```json\n{}\n```\nThanks!", FULL);
        let r = StructuredResponse::parse(&text).unwrap();
        assert_eq!(r.overall_score, 8);
    }

    #[test]
    fn test_parse_braced_span_with_prose() {
        let text = format!("Sure. {} Let me know.", FULL);
        assert_eq!(StructuredResponse::parse(&text).unwrap().suggestions.len(), 1);
    }

    #[test]
    fn test_missing_criteria_filled_and_scores_clamped() {
        let r = StructuredResponse::parse(
            r#"{"overall_score": 14, "criteria_scores": {"efficiency": "7", "readability": -3}}"#,
        )
        .unwrap();
        assert_eq!(r.overall_score, 10);
        assert_eq!(r.score(Criterion::Efficiency), 7);
        assert_eq!(r.score(Criterion::Readability), 0);
        assert_eq!(r.score(Criterion::Testability), 0);
        assert_eq!(r.criteria_scores.len(), 16);
        assert_eq!(r.criteria_feedback.len(), 16);
        assert!(r.suggestions.is_empty());
    }

    #[test]
    fn test_malformed_response_falls_back() {
        let r = StructuredResponse::parse_or_default("I think this code is pretty good overall.");
        assert_eq!(r.overall_score, 0);
        assert_eq!(r.criteria_scores.len(), 16);
        assert!(r.criteria_scores.values().all(|&v| v == 0));
        assert!(r.criteria_feedback.values().all(Option::is_none));
        assert!(r.overall_feedback.contains("no JSON object found"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(StructuredResponse::parse("[1, 2]"), Err(ResponseError::NotAnObject));
        assert_eq!(
            StructuredResponse::parse(r#"{"overall_feedback": "x"}"#),
            Err(ResponseError::MissingField("overall_score"))
        );
    }

    #[test]
    fn test_criterion_label() {
        assert_eq!(Criterion::SeparationOfConcerns.label(), "Separation Of Concerns");
        assert_eq!(Criterion::ALL.len(), 16);
    }
}
