//! cohort-matcher library
//!
//! Periodic matching pipeline:
//! 1. [`scoring::ScoreOrchestrator`] scores unmatched member pairs in bounded
//!    batches and records pending matches.
//! 2. [`promoter::MatchPromoter`] accepts a capped number of top matches.
//! 3. [`grouping::GroupFormationEngine`] places matched members into weekly
//!    groups of limited capacity.
//!
//! Every phase is safe to rerun: existing matches and memberships are
//! detected before writing, and partial failures are retried by the next run.

pub mod error;
pub mod grouping;
pub mod params;
pub mod pipeline;
pub mod promoter;
pub mod scorer;
pub mod scoring;
pub mod store;

pub use error::ScorerError;
pub use params::PipelineParams;
pub use pipeline::{MatchingPipeline, Phases, PipelineSummary};
