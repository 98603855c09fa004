//! AST-backed definition and usage analysis for Python sources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │ Source Files │────▶│ PythonParser  │────▶│ ParsedFile      │
//! └──────────────┘     └───────────────┘     │ (Tree+ParentMap)│
//!                                            └─────────────────┘
//!                                                     │
//!                      ┌──────────────────────────────┼────────────────┐
//!                      ▼                              ▼                ▼
//!             ┌────────────────────┐     ┌────────────────┐   ┌──────────────┐
//!             │DefinitionExtractor │     │ ImportResolver │──▶│CallSiteResolv│
//!             └────────────────────┘     └────────────────┘   └──────────────┘
//!                      │                                               │
//!                      └──────────────▶ UsageCollector ◀───────────────┘
//!                                             │
//!                                             ▼
//!                                   UsageSampler → UsageMap
//! ```

mod calls;
mod collector;
mod definitions;
mod facts;
mod imports;
mod parse;
mod sampler;

pub use calls::{find_enclosing_function, CallSiteResolver, DefinitionIndex, Resolution};
pub use collector::{MethodUsage, UsageCollector, UsageMap};
pub use definitions::{class_chain, DefinitionExtractor};
pub use facts::{
    CallSite, EnclosingScope, MatchConfidence, MethodDefinition, MethodId, SourceFile, Span,
};
pub use imports::{ImportMap, ImportResolver};
pub use parse::{
    module_name, Ancestors, ArenaNode, ParentMap, ParseError, ParseFailure, ParsedFile,
    PythonParser,
};
pub use sampler::{UsageSampler, DEFAULT_USAGE_CAP};
