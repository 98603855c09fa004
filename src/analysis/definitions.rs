//! Function and method definition extraction.

use streaming_iterator::StreamingIterator;
use tree_sitter::{Query, QueryCursor};

use super::facts::{MethodDefinition, Span};
use super::parse::{ParentMap, ParsedFile, PythonParser};

/// Tree-sitter query for function definitions (methods included).
const DEFINITION_QUERY: &str = r#"
(function_definition
  name: (identifier) @func_name
) @function
"#;

/// Extracts [`MethodDefinition`]s from parsed files.
pub struct DefinitionExtractor {
    query: Query,
}

impl DefinitionExtractor {
    pub fn new(parser: &PythonParser) -> anyhow::Result<Self> {
        let query = Query::new(parser.language(), DEFINITION_QUERY)?;
        Ok(Self { query })
    }

    /// Every function/method definition in `parsed`, in source order.
    pub fn extract(&self, parsed: &ParsedFile) -> Vec<MethodDefinition> {
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(
            &self.query,
            parsed.tree.root_node(),
            parsed.source.as_bytes(),
        );

        let mut definitions = Vec::new();

        while let Some(m) = matches.next() {
            let mut name = None;
            let mut func_node = None;

            for capture in m.captures {
                match self.query.capture_names()[capture.index as usize] {
                    "func_name" => name = Some(parsed.node_text(capture.node).to_string()),
                    "function" => func_node = Some(capture.node),
                    _ => {}
                }
            }

            let (Some(name), Some(node)) = (name, func_node) else {
                continue;
            };
            let Some(index) = parsed.parents.index_of(node) else {
                continue;
            };

            // Decorators belong to the definition text.
            let span = match parsed.parents.parent(node) {
                Some(parent) if parent.kind == "decorated_definition" => parent.span,
                _ => Span::from_node(node),
            };

            definitions.push(MethodDefinition {
                module: parsed.module.clone(),
                name,
                class_name: class_chain(&parsed.parents, index),
                file: parsed.path().to_path_buf(),
                span,
                text: parsed.span_text(&span).to_string(),
            });
        }

        definitions.sort_by_key(|d| d.span.start_byte);
        definitions
    }
}

/// Enclosing class names for the node at `index`, outermost first.
///
/// Stops at the first enclosing function, so a function nested inside a
/// method is not treated as a method.
pub fn class_chain(parents: &ParentMap, index: usize) -> Option<String> {
    let mut classes = Vec::new();
    for (_, ancestor) in parents.ancestors_of(index) {
        if ancestor.is_function() {
            break;
        }
        if ancestor.is_class() {
            if let Some(name) = &ancestor.name {
                classes.push(name.clone());
            }
        }
    }

    if classes.is_empty() {
        None
    } else {
        classes.reverse();
        Some(classes.join("."))
    }
}
