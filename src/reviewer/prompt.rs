//! Prompt construction for reviewer calls.

use super::response::Criterion;

/// Usage examples are separated by this marker in the critique prompt.
const USAGE_SEPARATOR: &str = "\n---\n";

/// Prompt asking for a JSON critique of one definition.
pub fn critique_prompt(definition: &str, usage_examples: &[String]) -> String {
    let mut prompt = String::from(
        "Evaluate the quality of the following Python method on a scale of 1 to 10 \
         for each criterion below, where 1 is poor and 10 is excellent.\n\nCriteria:\n",
    );
    for (i, criterion) in Criterion::ALL.iter().enumerate() {
        prompt.push_str(&format!("{:>2}. {}\n", i + 1, criterion.label()));
    }

    prompt.push_str("\nReturn ONLY a JSON object with this shape:\n");
    prompt.push_str(&response_schema());

    prompt.push_str("\n\nMethod Definition:\n");
    prompt.push_str(definition.trim());
    prompt.push('\n');

    let examples: Vec<&str> = usage_examples
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect();
    if !examples.is_empty() {
        prompt.push_str("\nUsage Examples:\n");
        prompt.push_str(&examples.join(USAGE_SEPARATOR));
        prompt.push('\n');
    }

    prompt.push_str("\nProvide ONLY the JSON response with no additional text.\n");
    prompt
}

/// Prompt asking for an improved version of a definition.
pub fn improve_prompt(definition: &str, critique: &str) -> String {
    format!(
        "Rewrite the following Python method to address the review below. \
         Keep its name, signature and behavior. Return only the improved code \
         in a single ```python block.\n\nMethod:\n{}\n\nReview:\n{}\n",
        definition.trim(),
        critique.trim()
    )
}

/// Prompt asking to review an improved definition against the original.
pub fn recritique_prompt(original: &str, improved: &str, original_critique: &str) -> String {
    format!(
        "An earlier review of a Python method is given below, followed by the \
         original method and an improved version. Evaluate the improved version \
         with the same criteria and return ONLY a JSON object with this shape:\n{}\n\n\
         Original Method:\n{}\n\nOriginal Review:\n{}\n\nImproved Method:\n{}\n",
        response_schema(),
        original.trim(),
        original_critique.trim(),
        improved.trim()
    )
}

fn response_schema() -> String {
    let scores: Vec<String> = Criterion::ALL
        .iter()
        .map(|c| format!("    \"{}\": <1-10>", c))
        .collect();
    let feedback: Vec<String> = Criterion::ALL
        .iter()
        .map(|c| format!("    \"{}\": \"<brief feedback or null>\"", c))
        .collect();

    format!(
        "{{\n  \"overall_score\": <integer 1-10>,\n  \"overall_feedback\": \"<general assessment>\",\n  \
         \"criteria_scores\": {{\n{}\n  }},\n  \"criteria_feedback\": {{\n{}\n  }},\n  \
         \"suggestions\": [\"<suggestion>\"],\n  \"strengths\": [\"<strength>\"]\n}}",
        scores.join(",\n"),
        feedback.join(",\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critique_prompt_includes_definition_and_usages() {
        let prompt = critique_prompt(
            "def foo():\n    return 1\n",
            &["def bar():\n    foo()".to_string(), "  ".to_string()],
        );
        assert!(prompt.contains("def foo():"));
        assert!(prompt.contains("Usage Examples:\ndef bar():"));
        assert!(!prompt.contains(USAGE_SEPARATOR));
        assert!(prompt.contains("\"resource_management\": <1-10>"));
        assert!(prompt.contains("16. Readability"));
    }

    #[test]
    fn test_critique_prompt_without_usages() {
        let prompt = critique_prompt("def foo(): pass", &[]);
        assert!(!prompt.contains("Usage Examples"));
    }

    #[test]
    fn test_recritique_prompt_sections() {
        let prompt = recritique_prompt("def a(): pass", "def a():\n    return None", "{}");
        let original = prompt.find("Original Method:").unwrap();
        let improved = prompt.find("Improved Method:").unwrap();
        assert!(original < improved);
    }
}
