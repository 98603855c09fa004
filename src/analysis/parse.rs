//! Python parsing and the per-file parent lookup.
//!
//! tree-sitter trees are immutable. Upward traversal goes through a
//! [`ParentMap`]: an arena of node records built once per file, indexed by
//! position and keyed by tree-sitter node id. It owns no borrow of the tree,
//! so it is stored next to the tree in [`ParsedFile`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tree_sitter::{Language, Node, Parser, Tree};

use super::facts::{SourceFile, Span};

/// Why a file could not be turned into a [`ParsedFile`].
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error at {line}:{column}")]
    Syntax { line: usize, column: usize },
    #[error("parser setup failed: {0}")]
    Grammar(String),
}

/// A file that failed to parse and was left out of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub message: String,
}

/// One record in the [`ParentMap`] arena.
#[derive(Debug, Clone)]
pub struct ArenaNode {
    /// tree-sitter node kind.
    pub kind: &'static str,
    /// Arena index of the syntactic parent; `None` for the module root.
    pub parent: Option<usize>,
    pub span: Span,
    /// Declared name, for `function_definition` and `class_definition` nodes.
    pub name: Option<String>,
}

impl ArenaNode {
    pub fn is_function(&self) -> bool {
        self.kind == "function_definition"
    }

    pub fn is_class(&self) -> bool {
        self.kind == "class_definition"
    }
}

/// Node → parent association for one syntax tree.
#[derive(Debug, Clone, Default)]
pub struct ParentMap {
    nodes: Vec<ArenaNode>,
    by_id: HashMap<usize, usize>,
}

impl ParentMap {
    /// Walk `tree` once and record every node with its parent.
    pub fn build(tree: &Tree, source: &str) -> Self {
        let mut map = ParentMap::default();
        let mut stack: Vec<(Node, Option<usize>)> = vec![(tree.root_node(), None)];

        while let Some((node, parent)) = stack.pop() {
            let index = map.nodes.len();
            let name = match node.kind() {
                "function_definition" | "class_definition" => node
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(source.as_bytes()).ok())
                    .map(str::to_string),
                _ => None,
            };

            map.nodes.push(ArenaNode {
                kind: node.kind(),
                parent,
                span: Span::from_node(node),
                name,
            });
            map.by_id.insert(node.id(), index);

            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                stack.push((child, Some(index)));
            }
        }

        map
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Arena index of a node from the tree this map was built for.
    pub fn index_of(&self, node: Node) -> Option<usize> {
        self.by_id.get(&node.id()).copied()
    }

    pub fn get(&self, index: usize) -> Option<&ArenaNode> {
        self.nodes.get(index)
    }

    /// The syntactic parent of `node`.
    pub fn parent(&self, node: Node) -> Option<&ArenaNode> {
        let index = self.index_of(node)?;
        let parent = self.nodes[index].parent?;
        self.nodes.get(parent)
    }

    /// Ancestors of `node`, nearest first, ending at the module root.
    pub fn ancestors(&self, node: Node) -> Ancestors<'_> {
        let next = self
            .index_of(node)
            .and_then(|index| self.nodes[index].parent);
        Ancestors { map: self, next }
    }

    /// Ancestors of the arena node at `index`, nearest first.
    pub fn ancestors_of(&self, index: usize) -> Ancestors<'_> {
        let next = self.nodes.get(index).and_then(|n| n.parent);
        Ancestors { map: self, next }
    }
}

/// Iterator over a node's ancestors.
pub struct Ancestors<'a> {
    map: &'a ParentMap,
    next: Option<usize>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = (usize, &'a ArenaNode);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next?;
        let node = self.map.nodes.get(index)?;
        self.next = node.parent;
        Some((index, node))
    }
}

/// A parsed Python file with its parent lookup.
pub struct ParsedFile {
    pub file: SourceFile,
    /// Dotted module name under the analysis root.
    pub module: String,
    pub source: String,
    pub tree: Tree,
    pub parents: ParentMap,
}

impl ParsedFile {
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Get text for a tree-sitter node.
    pub fn node_text(&self, node: Node) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// Get text for a span.
    pub fn span_text(&self, span: &Span) -> &str {
        span.text(&self.source)
    }
}

/// Python front end.
pub struct PythonParser {
    language: Language,
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonParser {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_python::LANGUAGE.into(),
        }
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    fn create_parser(&self) -> Result<Parser, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| ParseError::Grammar(e.to_string()))?;
        Ok(parser)
    }

    /// Parse source text into a tree. Trees with error nodes are rejected.
    pub fn parse_source(&self, source: &str) -> Result<Tree, ParseError> {
        let mut parser = self.create_parser()?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ParseError::Grammar("parser returned no tree".to_string()))?;

        let root = tree.root_node();
        if root.has_error() {
            let (line, column) = first_error_position(root).unwrap_or((1, 1));
            return Err(ParseError::Syntax { line, column });
        }

        Ok(tree)
    }

    /// Read and parse a file under `root`, building its parent lookup.
    pub fn parse_file(&self, root: &Path, path: &Path) -> Result<ParsedFile, ParseError> {
        let (file, source) = SourceFile::read(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tree = self.parse_source(&source)?;
        let parents = ParentMap::build(&tree, &source);

        Ok(ParsedFile {
            file,
            module: module_name(root, path),
            source,
            tree,
            parents,
        })
    }
}

/// Find the first ERROR or MISSING node, as a 1-indexed (line, column).
fn first_error_position(root: Node) -> Option<(usize, usize)> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return Some((pos.row + 1, pos.column + 1));
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    None
}

/// Dotted module name for `path` relative to `root`.
///
/// `pkg/mod.py` becomes `pkg.mod` and `pkg/__init__.py` becomes `pkg`.
pub fn module_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts: Vec<String> = relative
        .iter()
        .map(|c| c.to_string_lossy().to_string())
        .collect();

    if let Some(last) = parts.last_mut() {
        if let Some(stem) = last.strip_suffix(".py") {
            *last = stem.to_string();
        }
    }
    if parts.len() > 1 && parts.last().map(String::as_str) == Some("__init__") {
        parts.pop();
    }

    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SOURCE: &str = r#"
class Service:
    def run(self):
        helper()

def helper():
    return 1
"#;

    fn find_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
        if node.kind() == kind {
            return Some(node);
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        children.into_iter().find_map(|c| find_kind(c, kind))
    }

    fn count_nodes(node: Node) -> usize {
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        1 + children.into_iter().map(count_nodes).sum::<usize>()
    }

    #[test]
    fn test_parent_map_covers_every_node() {
        let parser = PythonParser::new();
        let tree = parser.parse_source(SOURCE).unwrap();
        let map = ParentMap::build(&tree, SOURCE);

        assert_eq!(map.len(), count_nodes(tree.root_node()));
        assert!(map.parent(tree.root_node()).is_none());
    }

    #[test]
    fn test_ancestors_reach_class() {
        let parser = PythonParser::new();
        let tree = parser.parse_source(SOURCE).unwrap();
        let map = ParentMap::build(&tree, SOURCE);

        let call = find_kind(tree.root_node(), "call").unwrap();
        let kinds: Vec<_> = map.ancestors(call).map(|(_, n)| n.kind).collect();

        assert!(kinds.contains(&"function_definition"));
        assert!(kinds.contains(&"class_definition"));
        assert_eq!(kinds.last(), Some(&"module"));

        let func = map.ancestors(call).find(|(_, n)| n.is_function()).unwrap().1;
        assert_eq!(func.name.as_deref(), Some("run"));
    }

    #[test]
    fn test_syntax_error_rejected() {
        let parser = PythonParser::new();
        let err = parser.parse_source("def broken(:\n    pass\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_module_name() {
        let root = Path::new("/proj");
        assert_eq!(module_name(root, Path::new("/proj/a.py")), "a");
        assert_eq!(module_name(root, Path::new("/proj/pkg/mod.py")), "pkg.mod");
        assert_eq!(module_name(root, Path::new("/proj/pkg/__init__.py")), "pkg");
        assert_eq!(module_name(root, Path::new("/proj/__init__.py")), "__init__");
    }

    #[test]
    fn test_parse_file() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("pkg");
        fs::create_dir(&pkg).unwrap();
        let path = pkg.join("svc.py");
        fs::write(&path, SOURCE).unwrap();

        let parsed = PythonParser::new().parse_file(temp.path(), &path).unwrap();
        assert_eq!(parsed.module, "pkg.svc");
        assert_eq!(parsed.path(), path.as_path());
        assert!(!parsed.parents.is_empty());
    }
}
