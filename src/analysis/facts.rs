//! Fact structures extracted from AST analysis.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

/// Source location span with byte offsets and line/column positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    /// Start byte offset (0-indexed).
    pub start_byte: usize,
    /// End byte offset (0-indexed, exclusive).
    pub end_byte: usize,
    /// Start line (1-indexed).
    pub start_line: usize,
    /// Start column (1-indexed).
    pub start_col: usize,
    /// End line (1-indexed).
    pub end_line: usize,
    /// End column (1-indexed).
    pub end_col: usize,
}

impl Span {
    /// Create a span from a tree-sitter node.
    pub fn from_node(node: tree_sitter::Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: start.row + 1, // tree-sitter is 0-indexed
            start_col: start.column + 1,
            end_line: end.row + 1,
            end_col: end.column + 1,
        }
    }

    /// Slice the spanned text out of `source`.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start_byte..self.end_byte).unwrap_or("")
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_col)
    }
}

/// A source file as seen by one run: path, content digest and mtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Hex SHA-256 of the file contents.
    pub content_hash: String,
    /// Modification time when the file was read, if the platform reports one.
    pub modified: Option<SystemTime>,
}

impl SourceFile {
    /// Read a file, returning its metadata together with its contents.
    pub fn read(path: &Path) -> io::Result<(SourceFile, String)> {
        let bytes = fs::read(path)?;
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        let content_hash = format!("{:x}", Sha256::digest(&bytes));
        let content = String::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok((
            SourceFile {
                path: path.to_path_buf(),
                content_hash,
                modified,
            },
            content,
        ))
    }
}

/// Identity of a definition: (file, qualified name, start line).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    pub file: PathBuf,
    pub qualified_name: String,
    pub start_line: usize,
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.display(),
            self.start_line,
            self.qualified_name
        )
    }
}

/// A function or method definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefinition {
    /// Dotted module name derived from the file's path under the root.
    pub module: String,
    /// The function's own name.
    pub name: String,
    /// Enclosing class chain joined with `.` (e.g. "Outer.Inner"), if any.
    pub class_name: Option<String>,
    /// Absolute path of the defining file.
    pub file: PathBuf,
    /// Span of the definition, decorators included.
    pub span: Span,
    /// Source text of the definition.
    pub text: String,
}

impl MethodDefinition {
    /// Class-qualified name (`Class.method` or `function`).
    pub fn qualified_name(&self) -> String {
        match &self.class_name {
            Some(class) => format!("{}.{}", class, self.name),
            None => self.name.clone(),
        }
    }

    pub fn id(&self) -> MethodId {
        MethodId {
            file: self.file.clone(),
            qualified_name: self.qualified_name(),
            start_line: self.span.start_line,
        }
    }

    /// Whether this definition lives inside a class body.
    pub fn is_method(&self) -> bool {
        self.class_name.is_some()
    }
}

/// The scope a call site sits in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnclosingScope {
    /// Inside a function or method body.
    Function { qualified_name: String, span: Span },
    /// Directly inside a class body (e.g. a class attribute initializer).
    Class { name: String, span: Span },
    /// At module top level.
    Module,
}

impl EnclosingScope {
    pub fn is_module(&self) -> bool {
        matches!(self, EnclosingScope::Module)
    }

    /// Name of the enclosing function or class; `<module>` at top level.
    pub fn name(&self) -> &str {
        match self {
            EnclosingScope::Function { qualified_name, .. } => qualified_name,
            EnclosingScope::Class { name, .. } => name,
            EnclosingScope::Module => "<module>",
        }
    }
}

impl fmt::Display for EnclosingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a call was tied to its definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchConfidence {
    /// Module and name both resolved.
    Exact,
    /// Bare-name match with exactly one candidate.
    Heuristic,
    /// Bare-name match picked among several candidates.
    Ambiguous,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchConfidence::Exact => "exact",
            MatchConfidence::Heuristic => "heuristic",
            MatchConfidence::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved call expression plus its usage context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// File containing the call.
    pub file: PathBuf,
    /// Line of the call (1-indexed).
    pub line: usize,
    /// Column of the call (1-indexed).
    pub column: usize,
    /// Scope the call sits in.
    pub enclosing: EnclosingScope,
    /// Raw call expression text.
    pub call_text: String,
    /// Usage example text: the enclosing definition, or the top-level statement.
    pub context: String,
    pub confidence: MatchConfidence,
}
