//! Pairwise score orchestration
//!
//! Enumerates every unordered pair of active members once, skips pairs that
//! already have a match record, and scores the rest in fixed-size batches.
//! All pairs of a batch are scored concurrently; the next batch starts only
//! when the whole batch has resolved, which bounds in-flight scorer calls to
//! the batch size.
//!
//! Failures are soft: a failed scorer call drops that pair, and a failed bulk
//! write drops that batch's matches. Neither leaves a record behind, so the
//! next scheduled run retries them.

use crate::error::ScorerError;
use crate::scorer::CompatibilityScorer;
use crate::store::{MatchStore, MemberDirectory};
use cohort_common::db::MatchRecord;
use cohort_common::Result;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tunables for a scoring pass
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Pairs scored concurrently per batch
    pub batch_size: usize,
    /// Minimum score for a pending match
    pub candidacy_threshold: f64,
    /// Per-call scorer timeout
    pub scorer_timeout: Duration,
    /// Log progress every this many enumerated pairs
    pub progress_interval: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            candidacy_threshold: 20.0,
            scorer_timeout: Duration::from_secs(30),
            progress_interval: 100,
        }
    }
}

/// Counters reported at the end of a scoring pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoringSummary {
    pub members: usize,
    pub pairs_total: usize,
    /// Pairs skipped because a match record already exists
    pub pairs_skipped: usize,
    /// Pairs whose existence check failed (retried next run)
    pub lookup_failures: usize,
    pub pairs_scored: usize,
    pub scorer_failures: usize,
    pub below_threshold: usize,
    pub matches_created: u64,
    /// Qualifying matches lost to failed bulk writes
    pub write_failures: usize,
    pub batches: usize,
    /// Progress lines logged (one every `progress_interval` pairs)
    pub progress_reports: usize,
}

/// Scores unmatched pairs and records pending matches
pub struct ScoreOrchestrator {
    directory: Arc<dyn MemberDirectory>,
    matches: Arc<dyn MatchStore>,
    scorer: Arc<dyn CompatibilityScorer>,
    config: ScoringConfig,
}

impl ScoreOrchestrator {
    pub fn new(
        directory: Arc<dyn MemberDirectory>,
        matches: Arc<dyn MatchStore>,
        scorer: Arc<dyn CompatibilityScorer>,
        config: ScoringConfig,
    ) -> Self {
        Self {
            directory,
            matches,
            scorer,
            config,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Run one scoring pass over all active members
    ///
    /// Only a failure to read the member directory is returned as an error;
    /// every per-pair and per-batch failure is counted in the summary.
    pub async fn run(&self) -> Result<ScoringSummary> {
        let mut members = self.directory.list_active_members().await?;
        // Canonical order: pair (i, j) with i < j is visited exactly once
        members.sort_by_key(|member| member.id);
        members.dedup_by_key(|member| member.id);

        let n = members.len();
        let mut summary = ScoringSummary {
            members: n,
            pairs_total: n * n.saturating_sub(1) / 2,
            ..Default::default()
        };

        if n < 2 {
            info!(members = n, "Fewer than two active members, nothing to score");
            return Ok(summary);
        }

        info!(
            members = n,
            pairs = summary.pairs_total,
            batch_size = self.config.batch_size,
            "Scoring phase started"
        );

        let batch_size = self.config.batch_size.max(1);
        let progress_interval = self.config.progress_interval.max(1);
        let mut batch: Vec<(Uuid, Uuid)> = Vec::with_capacity(batch_size);
        let mut processed = 0usize;

        for i in 0..n {
            for j in (i + 1)..n {
                let (subject_id, object_id) = (members[i].id, members[j].id);
                processed += 1;

                match self.matches.find_existing_match(subject_id, object_id).await {
                    Ok(Some(_)) => summary.pairs_skipped += 1,
                    Ok(None) => {
                        batch.push((subject_id, object_id));
                        if batch.len() >= batch_size {
                            self.process_batch(&batch, &mut summary).await;
                            batch.clear();
                        }
                    }
                    Err(e) => {
                        summary.lookup_failures += 1;
                        warn!(
                            subject_id = %subject_id,
                            object_id = %object_id,
                            error = %e,
                            "Existing match lookup failed, pair deferred to next run"
                        );
                    }
                }

                if processed % progress_interval == 0 {
                    summary.progress_reports += 1;
                    info!(
                        progress = format!("{}/{}", processed, summary.pairs_total),
                        skipped = summary.pairs_skipped,
                        created = summary.matches_created,
                        "Scoring progress"
                    );
                }
            }
        }

        if !batch.is_empty() {
            self.process_batch(&batch, &mut summary).await;
        }

        info!(
            pairs = summary.pairs_total,
            skipped = summary.pairs_skipped,
            scored = summary.pairs_scored,
            scorer_failures = summary.scorer_failures,
            created = summary.matches_created,
            write_failures = summary.write_failures,
            "Scoring phase completed"
        );

        Ok(summary)
    }

    /// Score one batch concurrently, then bulk-write qualifying matches
    async fn process_batch(&self, batch: &[(Uuid, Uuid)], summary: &mut ScoringSummary) {
        summary.batches += 1;

        let results = join_all(batch.iter().map(|&(subject_id, object_id)| async move {
            let outcome = self.score_pair(subject_id, object_id).await;
            (subject_id, object_id, outcome)
        }))
        .await;

        let mut records = Vec::new();
        for (subject_id, object_id, outcome) in results {
            match outcome {
                Ok(score) => {
                    summary.pairs_scored += 1;
                    if score >= self.config.candidacy_threshold {
                        records.push(MatchRecord::pending(subject_id, object_id, score));
                    } else {
                        summary.below_threshold += 1;
                    }
                }
                Err(e) => {
                    summary.scorer_failures += 1;
                    debug!(
                        subject_id = %subject_id,
                        object_id = %object_id,
                        error = %e,
                        "Scoring failed, treating pair as unmatched"
                    );
                }
            }
        }

        if records.is_empty() {
            return;
        }

        match self.matches.insert_matches(&records).await {
            Ok(inserted) => {
                summary.matches_created += inserted;
                debug!(batch = summary.batches, inserted, "Batch matches written");
            }
            Err(e) => {
                summary.write_failures += records.len();
                error!(
                    batch = summary.batches,
                    records = records.len(),
                    error = %e,
                    "Bulk match insert failed, continuing with next batch"
                );
            }
        }
    }

    /// Score with the per-call timeout; non-finite scores are failures
    async fn score_pair(&self, subject_id: Uuid, object_id: Uuid) -> std::result::Result<f64, ScorerError> {
        let timeout = self.config.scorer_timeout;
        match tokio::time::timeout(timeout, self.scorer.score(subject_id, object_id)).await {
            Ok(Ok(score)) if !score.is_finite() => Err(ScorerError::Invalid(score)),
            Ok(outcome) => outcome,
            Err(_) => Err(ScorerError::Timeout(timeout.as_millis() as u64)),
        }
    }
}
