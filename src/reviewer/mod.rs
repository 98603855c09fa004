//! External code reviewer.
//!
//! The orchestrator only depends on the [`Reviewer`] trait. [`HttpReviewer`]
//! talks to an OpenAI-compatible chat-completions endpoint; tests use
//! scripted in-memory implementations.

mod http;
pub mod prompt;
mod response;

pub use http::HttpReviewer;
pub use response::{Criterion, ResponseError, StructuredResponse, MAX_SCORE};

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while calling a reviewer.
#[derive(Error, Debug)]
pub enum ReviewerError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by reviewer")]
    RateLimited,
    #[error("reviewer rejected credentials: {0}")]
    Unauthorized(String),
    #[error("reviewer unavailable: {0}")]
    Unavailable(String),
    #[error("malformed reviewer reply: {0}")]
    Malformed(String),
}

/// An opaque code reviewer.
///
/// Every operation returns the reviewer's raw text; callers parse it.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Short identifier used in logs and reports.
    fn name(&self) -> &str;

    /// Review one definition given sample usages of it.
    async fn critique(
        &self,
        definition: &str,
        usage_examples: &[String],
    ) -> Result<String, ReviewerError>;

    /// Propose an improved version of `definition` addressing `critique`.
    async fn improve(&self, definition: &str, critique: &str) -> Result<String, ReviewerError>;

    /// Review `improved` against `original` and its earlier critique.
    async fn recritique(
        &self,
        original: &str,
        improved: &str,
        original_critique: &str,
    ) -> Result<String, ReviewerError>;
}
