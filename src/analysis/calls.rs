//! Call-site resolution.
//!
//! Every `call` node in a file is matched against the known definitions:
//!
//! 1. The callee expression is reduced to a dotted path (`foo`, `mod.foo`,
//!    `self.method`, `alias.Class.method`).
//! 2. Import bindings and the current module turn that path into one or more
//!    fully-qualified candidates, each of which is tried at every
//!    (module, qualified name) split. A hit is an [`MatchConfidence::Exact`]
//!    match.
//! 3. Otherwise the callee's final name is looked up across all definitions.
//!    This is a heuristic: same-named callables in different modules cannot
//!    be told apart, which is what [`MatchConfidence::Ambiguous`] reports.

use std::collections::{HashMap, HashSet};

use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor};

use super::definitions::class_chain;
use super::facts::{CallSite, EnclosingScope, MatchConfidence, MethodDefinition, Span};
use super::imports::ImportMap;
use super::parse::{ParentMap, ParsedFile, PythonParser};

/// Tree-sitter query for call expressions.
const CALL_QUERY: &str = r#"
(call
  function: (_) @callee
) @call
"#;

/// Lookup tables over the definitions calls may resolve to.
#[derive(Debug, Default)]
pub struct DefinitionIndex {
    definitions: Vec<MethodDefinition>,
    by_path: HashMap<(String, String), usize>,
    by_name: HashMap<String, Vec<usize>>,
    modules: HashSet<String>,
}

impl DefinitionIndex {
    /// Index `definitions`, keeping their order as the discovery order.
    pub fn new(definitions: Vec<MethodDefinition>) -> Self {
        let mut index = DefinitionIndex::default();
        for (i, def) in definitions.iter().enumerate() {
            index
                .by_path
                .entry((def.module.clone(), def.qualified_name()))
                .or_insert(i);
            index.by_name.entry(def.name.clone()).or_default().push(i);
            index.modules.insert(def.module.clone());
        }
        index.definitions = definitions;
        index
    }

    pub fn definitions(&self) -> &[MethodDefinition] {
        &self.definitions
    }

    pub fn get(&self, index: usize) -> Option<&MethodDefinition> {
        self.definitions.get(index)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Exact lookup by module and class-qualified name.
    pub fn lookup(&self, module: &str, qualified_name: &str) -> Option<usize> {
        self.by_path
            .get(&(module.to_string(), qualified_name.to_string()))
            .copied()
    }

    /// All definitions with the given bare name.
    pub fn by_name(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn knows_module_prefix(&self, dotted: &str) -> bool {
        let parts: Vec<&str> = dotted.split('.').collect();
        (1..=parts.len()).any(|i| self.modules.contains(&parts[..i].join(".")))
    }

    /// Try every (module, qualified name) split of a dotted path.
    fn lookup_dotted(&self, dotted: &str) -> Option<usize> {
        let parts: Vec<&str> = dotted.split('.').collect();
        (1..parts.len()).find_map(|i| self.lookup(&parts[..i].join("."), &parts[i..].join(".")))
    }
}

/// A call matched to a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Index into [`DefinitionIndex::definitions`].
    pub definition: usize,
    pub confidence: MatchConfidence,
}

/// Apparent callee of a call expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Callee {
    /// `foo(...)`
    Name(String),
    /// `a.b.c(...)` rooted at a plain identifier.
    Chain(Vec<String>),
    /// `expr().c(...)`, `x[0].c(...)`: only the final attribute is known.
    Attribute(String),
}

impl Callee {
    fn final_name(&self) -> &str {
        match self {
            Callee::Name(name) | Callee::Attribute(name) => name,
            Callee::Chain(parts) => parts.last().map(String::as_str).unwrap_or(""),
        }
    }
}

/// Finds call sites and ties them to definitions.
pub struct CallSiteResolver {
    query: Query,
}

impl CallSiteResolver {
    pub fn new(parser: &PythonParser) -> anyhow::Result<Self> {
        let query = Query::new(parser.language(), CALL_QUERY)?;
        Ok(Self { query })
    }

    /// Every call in `parsed` that resolves to an indexed definition, in source order.
    pub fn resolve_file(
        &self,
        parsed: &ParsedFile,
        imports: &ImportMap,
        index: &DefinitionIndex,
    ) -> Vec<(usize, CallSite)> {
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(
            &self.query,
            parsed.tree.root_node(),
            parsed.source.as_bytes(),
        );

        let mut sites = Vec::new();
        while let Some(m) = matches.next() {
            let mut call_node = None;
            let mut callee_node = None;
            for capture in m.captures {
                match self.query.capture_names()[capture.index as usize] {
                    "call" => call_node = Some(capture.node),
                    "callee" => callee_node = Some(capture.node),
                    _ => {}
                }
            }

            let (Some(call), Some(callee)) = (call_node, callee_node) else {
                continue;
            };
            let Some(callee) = callee_of(parsed, callee) else {
                continue;
            };
            let Some(resolution) = resolve_callee(parsed, imports, index, call, &callee) else {
                continue;
            };

            let enclosing = find_enclosing_function(&parsed.parents, call);
            let context = usage_context(parsed, call, &enclosing);
            let position = call.start_position();

            sites.push((
                resolution.definition,
                CallSite {
                    file: parsed.path().to_path_buf(),
                    line: position.row + 1,
                    column: position.column + 1,
                    enclosing,
                    call_text: parsed.node_text(call).to_string(),
                    context,
                    confidence: resolution.confidence,
                },
            ));
        }

        sites.sort_by_key(|(_, site)| (site.line, site.column));
        sites
    }
}

fn callee_of(parsed: &ParsedFile, node: Node) -> Option<Callee> {
    match node.kind() {
        "identifier" => Some(Callee::Name(parsed.node_text(node).to_string())),
        "attribute" => {
            let mut parts = Vec::new();
            let mut current = node;
            while current.kind() == "attribute" {
                let attr = current.child_by_field_name("attribute")?;
                parts.push(parsed.node_text(attr).to_string());
                current = current.child_by_field_name("object")?;
            }

            if current.kind() == "identifier" {
                parts.push(parsed.node_text(current).to_string());
                parts.reverse();
                Some(Callee::Chain(parts))
            } else {
                parts.into_iter().next().map(Callee::Attribute)
            }
        }
        _ => None,
    }
}

fn resolve_callee(
    parsed: &ParsedFile,
    imports: &ImportMap,
    index: &DefinitionIndex,
    call: Node,
    callee: &Callee,
) -> Option<Resolution> {
    let module = parsed.module.as_str();
    let mut targets = Vec::new();
    let mut external = false;

    match callee {
        Callee::Name(name) => match imports.resolve(name) {
            Some(target) => {
                external = !index.knows_module_prefix(target);
                targets.push(target.to_string());
            }
            None => targets.push(format!("{}.{}", module, name)),
        },
        Callee::Chain(parts) => {
            let base = parts[0].as_str();
            let rest = parts[1..].join(".");

            if (base == "self" || base == "cls") && !rest.is_empty() {
                if let Some(class) = enclosing_class(&parsed.parents, call) {
                    targets.push(format!("{}.{}.{}", module, class, rest));
                }
            } else if let Some(target) = imports.resolve(base) {
                let full = format!("{}.{}", target, rest);
                external = !index.knows_module_prefix(&full);
                targets.push(full);
            } else {
                targets.push(format!("{}.{}", module, parts.join(".")));
                targets.push(parts.join("."));
            }
        }
        Callee::Attribute(_) => {}
    }

    if let Some(definition) = targets.iter().find_map(|t| index.lookup_dotted(t)) {
        return Some(Resolution {
            definition,
            confidence: MatchConfidence::Exact,
        });
    }

    if external {
        return None;
    }

    let candidates = index.by_name(callee.final_name());
    let definition = candidates
        .iter()
        .copied()
        .find(|&i| index.get(i).map(|d| d.file.as_path()) == Some(parsed.path()))
        .or_else(|| candidates.first().copied())?;

    Some(Resolution {
        definition,
        confidence: if candidates.len() == 1 {
            MatchConfidence::Heuristic
        } else {
            MatchConfidence::Ambiguous
        },
    })
}

/// Class chain of the method a node sits in, for `self.x()` resolution.
fn enclosing_class(parents: &ParentMap, node: Node) -> Option<String> {
    let (index, _) = parents.ancestors(node).find(|(_, n)| n.is_function())?;
    class_chain(parents, index)
}

/// Walk up from a call to the nearest function or class.
///
/// Returns [`EnclosingScope::Module`] exactly when neither is found before
/// the module root.
pub fn find_enclosing_function(parents: &ParentMap, call: Node) -> EnclosingScope {
    for (index, ancestor) in parents.ancestors(call) {
        if ancestor.is_function() {
            let name = ancestor.name.clone().unwrap_or_default();
            let qualified_name = match class_chain(parents, index) {
                Some(class) => format!("{}.{}", class, name),
                None => name,
            };
            return EnclosingScope::Function {
                qualified_name,
                span: definition_span(parents, index),
            };
        }
        if ancestor.is_class() {
            return EnclosingScope::Class {
                name: ancestor.name.clone().unwrap_or_default(),
                span: definition_span(parents, index),
            };
        }
    }
    EnclosingScope::Module
}

/// Span of a definition node, widened to its decorators.
fn definition_span(parents: &ParentMap, index: usize) -> Span {
    let Some(node) = parents.get(index) else {
        return Span::default();
    };
    match node.parent.and_then(|p| parents.get(p)) {
        Some(parent) if parent.kind == "decorated_definition" => parent.span,
        _ => node.span,
    }
}

/// Text shown to the reviewer as a usage example.
fn usage_context(parsed: &ParsedFile, call: Node, enclosing: &EnclosingScope) -> String {
    match enclosing {
        EnclosingScope::Function { span, .. } | EnclosingScope::Class { span, .. } => {
            parsed.span_text(span).to_string()
        }
        EnclosingScope::Module => {
            let Some(start) = parsed.parents.index_of(call) else {
                return parsed.node_text(call).to_string();
            };
            let mut top = start;
            for (index, ancestor) in parsed.parents.ancestors_of(start) {
                if ancestor.parent.is_none() {
                    break;
                }
                top = index;
            }
            parsed
                .parents
                .get(top)
                .map(|n| parsed.span_text(&n.span).to_string())
                .unwrap_or_default()
        }
    }
}
