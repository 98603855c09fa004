//! Per-file import resolution.
//!
//! Maps each name an import binds in a file to the fully-qualified dotted
//! path it refers to.

use std::collections::HashMap;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor};

use super::parse::{ParsedFile, PythonParser};

/// Tree-sitter query for extracting imports.
const IMPORT_QUERY: &str = r#"
(import_statement) @import
(import_from_statement) @import_from
"#;

/// Names bound by imports in one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportMap {
    bindings: HashMap<String, String>,
}

impl ImportMap {
    /// Fully-qualified path bound to `name`, if an import binds it.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn bind(&mut self, name: &str, target: String) {
        self.bindings.insert(name.to_string(), target);
    }
}

/// Builds [`ImportMap`]s from parsed files.
pub struct ImportResolver {
    query: Query,
}

impl ImportResolver {
    pub fn new(parser: &PythonParser) -> anyhow::Result<Self> {
        let query = Query::new(parser.language(), IMPORT_QUERY)?;
        Ok(Self { query })
    }

    pub fn resolve_file(&self, parsed: &ParsedFile) -> ImportMap {
        let is_package = parsed
            .path()
            .file_name()
            .map(|n| n == "__init__.py")
            .unwrap_or(false);
        let package = package_of(&parsed.module, is_package);

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(
            &self.query,
            parsed.tree.root_node(),
            parsed.source.as_bytes(),
        );

        let mut map = ImportMap::default();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                match self.query.capture_names()[capture.index as usize] {
                    "import" => bind_import(parsed, capture.node, &mut map),
                    "import_from" => bind_import_from(parsed, capture.node, &package, &mut map),
                    _ => {}
                }
            }
        }
        map
    }
}

/// `import a.b` binds `a`; `import a.b as c` binds `c` to `a.b`.
fn bind_import(parsed: &ParsedFile, node: Node, map: &mut ImportMap) {
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        match name.kind() {
            "dotted_name" => {
                let path = parsed.node_text(name);
                let head = path.split('.').next().unwrap_or(path);
                map.bind(head, head.to_string());
            }
            "aliased_import" => {
                let (Some(target), Some(alias)) = (
                    name.child_by_field_name("name"),
                    name.child_by_field_name("alias"),
                ) else {
                    continue;
                };
                map.bind(parsed.node_text(alias), parsed.node_text(target).to_string());
            }
            _ => {}
        }
    }
}

/// `from m import f` binds `f` to `m.f`; relative modules resolve against `package`.
fn bind_import_from(parsed: &ParsedFile, node: Node, package: &str, map: &mut ImportMap) {
    let Some(module_node) = node.child_by_field_name("module_name") else {
        return;
    };
    let module_text = parsed.node_text(module_node);
    let module = if module_node.kind() == "relative_import" {
        resolve_relative(package, module_text)
    } else {
        module_text.to_string()
    };

    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        let (imported, bound) = match name.kind() {
            "dotted_name" => {
                let text = parsed.node_text(name);
                (text, text)
            }
            "aliased_import" => {
                let (Some(target), Some(alias)) = (
                    name.child_by_field_name("name"),
                    name.child_by_field_name("alias"),
                ) else {
                    continue;
                };
                (parsed.node_text(target), parsed.node_text(alias))
            }
            _ => continue,
        };
        map.bind(bound, join_path(&module, imported));
    }
}

/// Package that relative imports in `module` are resolved against.
fn package_of(module: &str, is_package: bool) -> String {
    if is_package {
        return module.to_string();
    }
    match module.rsplit_once('.') {
        Some((package, _)) => package.to_string(),
        None => String::new(),
    }
}

/// Resolve a relative module like `..pkg.mod` against `package`.
fn resolve_relative(package: &str, relative: &str) -> String {
    let dots = relative.chars().take_while(|c| *c == '.').count();
    let rest = relative[dots..].trim();

    let mut parts: Vec<&str> = package.split('.').filter(|p| !p.is_empty()).collect();
    for _ in 1..dots {
        parts.pop();
    }

    join_path(&parts.join("."), rest)
}

fn join_path(prefix: &str, suffix: &str) -> String {
    match (prefix.is_empty(), suffix.is_empty()) {
        (true, _) => suffix.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}.{}", prefix, suffix),
    }
}
