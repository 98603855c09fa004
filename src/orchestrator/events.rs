use std::path::PathBuf;

use super::state::BatchState;
use crate::cache::ChangeReport;
use crate::result::AnalysisResult;

/// Messages streamed from a running batch to its consumer.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    StateChanged(BatchState),
    /// Setup finished; `total` definitions will be processed.
    Started {
        total: usize,
        parse_failures: usize,
        reusing_cache: bool,
    },
    /// A cache entry exists but the tree changed since it was written.
    CacheDrift(ChangeReport),
    Progress {
        current: usize,
        total: usize,
        definition: String,
        message: String,
    },
    Result(AnalysisResult),
    /// The reviewer failed for one definition; the batch continues.
    UnitError {
        definition: String,
        file: PathBuf,
        error: String,
    },
    Cancelled {
        completed: usize,
        total: usize,
    },
    Finished {
        completed: usize,
        errors: usize,
    },
    Failed(String),
}
