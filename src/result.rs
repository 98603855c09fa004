//! Per-definition review results.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::MethodDefinition;
use crate::reviewer::StructuredResponse;

/// Outcome of reviewing one definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Class-qualified name (`Class.method` or `function`).
    pub definition_name: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub start_line: usize,
    pub raw_response: String,
    pub structured_response: StructuredResponse,
    /// Reviewer failure for this unit, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether this result was reused from a cache entry.
    #[serde(default)]
    pub from_cache: bool,
}

impl AnalysisResult {
    /// Result for a reviewer reply. Unparseable replies get the default response.
    pub fn from_response(definition: &MethodDefinition, raw_response: String) -> Self {
        let structured_response = StructuredResponse::parse_or_default(&raw_response);
        Self {
            definition_name: definition.qualified_name(),
            file_path: definition.file.clone(),
            start_line: definition.span.start_line,
            raw_response,
            structured_response,
            error: None,
            from_cache: false,
        }
    }

    /// Result for a failed reviewer call.
    pub fn from_error(definition: &MethodDefinition, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            definition_name: definition.qualified_name(),
            file_path: definition.file.clone(),
            start_line: definition.span.start_line,
            raw_response: String::new(),
            structured_response: StructuredResponse::with_error(format!("Error: {}", error)),
            error: Some(error),
            from_cache: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this result belongs to the definition named `name` starting at
    /// `start_line` in `file`.
    pub fn is_for(&self, name: &str, file: &Path, start_line: usize) -> bool {
        self.definition_name == name && self.file_path == file && self.start_line == start_line
    }

    pub fn score(&self) -> u8 {
        self.structured_response.overall_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Span;

    fn definition() -> MethodDefinition {
        MethodDefinition {
            module: "svc".to_string(),
            name: "run".to_string(),
            class_name: Some("Service".to_string()),
            file: PathBuf::from("/proj/svc.py"),
            span: Span {
                start_line: 4,
                ..Span::default()
            },
            text: "def run(self): pass".to_string(),
        }
    }

    #[test]
    fn test_from_response() {
        let r = AnalysisResult::from_response(&definition(), r#"{"overall_score": 6}"#.to_string());
        assert_eq!(r.definition_name, "Service.run");
        assert_eq!(r.start_line, 4);
        assert_eq!(r.score(), 6);
        assert!(!r.is_error());
        assert!(r.is_for("Service.run", Path::new("/proj/svc.py"), 4));
        assert!(!r.is_for("Service.run", Path::new("/proj/svc.py"), 9));
    }

    #[test]
    fn test_from_error() {
        let r = AnalysisResult::from_error(&definition(), "request timed out");
        assert!(r.is_error());
        assert_eq!(r.score(), 0);
        assert!(r.structured_response.overall_feedback.contains("request timed out"));
    }

    #[test]
    fn test_legacy_fields_default() {
        let json = serde_json::json!({
            "definition_name": "f",
            "file_path": "/proj/a.py",
            "raw_response": "",
            "structured_response": StructuredResponse::default(),
        });
        let r: AnalysisResult = serde_json::from_value(json).unwrap();
        assert_eq!(r.start_line, 0);
        assert!(r.error.is_none());
        assert!(!r.from_cache);
    }
}
