//! Error types for cohort-matcher
//!
//! Store errors use `cohort_common::Error`. Scorer failures have their own
//! type because the orchestrator treats every one of them as "no match".

use thiserror::Error;

/// Compatibility scorer failure
#[derive(Debug, Error)]
pub enum ScorerError {
    /// Transport-level failure (connect, TLS, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Scorer answered with a non-success status
    #[error("Scorer returned status {0}")]
    Status(u16),

    /// No answer within the configured timeout
    #[error("Scorer timed out after {0} ms")]
    Timeout(u64),

    /// Scorer answered without a score (null result)
    #[error("Scorer returned no score")]
    NoScore,

    /// Score was NaN or infinite
    #[error("Scorer returned invalid score {0}")]
    Invalid(f64),

    /// Any other scorer-side failure
    #[error("Scorer error: {0}")]
    Other(String),
}
