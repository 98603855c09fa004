//! Codewise - LLM-assisted review of Python code in context.
//!
//! Codewise discovers every function and method in a Python project, finds
//! where each one is called, and hands the definition plus a sample of real
//! call sites to a reviewer model that scores it against sixteen quality
//! criteria. Results are cached per project and reused until the source
//! tree changes.
//!
//! # Architecture
//!
//! - `walk`: Python source discovery with directory exclusions
//! - `analysis`: tree-sitter extraction of definitions, imports and call sites
//! - `state`: content hashes used to detect source drift
//! - `cache`: per-project JSON records of past analyses
//! - `reviewer`: the reviewer trait, HTTP client and response parsing
//! - `orchestrator`: cancellable batch driver and the improve flow
//! - `report`: Output formatting (pretty, JSON)

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod report;
pub mod result;
pub mod reviewer;
pub mod state;
pub mod walk;

pub use analysis::{
    CallSite, DefinitionExtractor, MethodDefinition, MethodUsage, UsageCollector, UsageMap,
    UsageSampler,
};
pub use cache::{CacheEntry, CacheStore, ChangeReport, Fingerprint};
pub use config::Config;
pub use orchestrator::{
    AnalysisError, AnalysisEvent, AnalysisHandle, AnalysisRequest, BatchOutcome, BatchState,
    CancellationToken, Orchestrator,
};
pub use result::AnalysisResult;
pub use reviewer::{HttpReviewer, Reviewer, ReviewerError, StructuredResponse};
pub use state::{RepoChanges, RepoState};
pub use walk::SourceWalker;
