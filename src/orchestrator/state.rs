use std::fmt;

use serde::Serialize;

/// Lifecycle of an analysis batch.
///
/// ```text
/// Idle → Running → Cancelling → Cancelled
///              ├→ Completed
///              └→ Failed
/// ```
///
/// Any terminal state may start a new batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Cancelled | BatchState::Completed | BatchState::Failed
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        match (self, next) {
            (Idle, Running) => true,
            (Running, Cancelling | Completed | Failed) => true,
            (Cancelling, Cancelled) => true,
            (s, Running) if s.is_terminal() => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Idle => "idle",
            BatchState::Running => "running",
            BatchState::Cancelling => "cancelling",
            BatchState::Cancelled => "cancelled",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
