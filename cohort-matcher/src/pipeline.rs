//! End-to-end pipeline run: score → promote → group
//!
//! A run always completes. A phase that cannot start (for example the member
//! directory is unreachable) is logged and reported as absent in the summary,
//! and later phases still run against whatever state the store holds.

use crate::grouping::{GroupFormationEngine, GroupingSummary};
use crate::params::PipelineParams;
use crate::promoter::{MatchPromoter, PromotionSummary};
use crate::scorer::CompatibilityScorer;
use crate::scoring::{ScoreOrchestrator, ScoringSummary};
use crate::store::{GroupStore, MatchStore, MemberDirectory};
use chrono::Weekday;
use cohort_common::CohortWeek;
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which phases to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub score: bool,
    pub promote: bool,
    pub group: bool,
}

impl Phases {
    pub const ALL: Phases = Phases {
        score: true,
        promote: true,
        group: true,
    };
    pub const SCORE: Phases = Phases {
        score: true,
        promote: false,
        group: false,
    };
    pub const PROMOTE: Phases = Phases {
        score: false,
        promote: true,
        group: false,
    };
    pub const GROUP: Phases = Phases {
        score: false,
        promote: false,
        group: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub week: CohortWeek,
    pub scoring: Option<ScoringSummary>,
    pub promotion: Option<PromotionSummary>,
    /// Groups of earlier weeks closed before allocation
    pub closed_groups: u64,
    pub grouping: Option<GroupingSummary>,
}

pub struct MatchingPipeline<R = StdRng> {
    orchestrator: Option<ScoreOrchestrator>,
    promoter: MatchPromoter,
    engine: GroupFormationEngine<R>,
    groups: Arc<dyn GroupStore>,
    matching_weekday: Weekday,
}

impl<R: Rng + Send> MatchingPipeline<R> {
    /// Build every phase over one store implementing all store traits
    ///
    /// Without a scorer the scoring phase is unavailable and is skipped.
    pub fn from_store<S>(
        store: Arc<S>,
        scorer: Option<Arc<dyn CompatibilityScorer>>,
        params: &PipelineParams,
        rng: R,
    ) -> Self
    where
        S: MemberDirectory + MatchStore + GroupStore + 'static,
    {
        let orchestrator = scorer.map(|scorer| {
            ScoreOrchestrator::new(store.clone(), store.clone(), scorer, params.scoring_config())
        });

        Self {
            orchestrator,
            promoter: MatchPromoter::new(store.clone(), params.promotion_config()),
            engine: GroupFormationEngine::with_rng(store.clone(), params.grouping_config(), rng),
            groups: store,
            matching_weekday: params.matching_weekday,
        }
    }

    /// The cohort week a run started now would allocate into
    pub fn current_week(&self) -> CohortWeek {
        CohortWeek::current(self.matching_weekday)
    }

    /// Run the selected phases for the current cohort week
    pub async fn run(&mut self, phases: Phases) -> PipelineSummary {
        let week = self.current_week();
        self.run_for_week(week, phases).await
    }

    /// Run the selected phases, allocating into `week`
    pub async fn run_for_week(&mut self, week: CohortWeek, phases: Phases) -> PipelineSummary {
        info!(week = %week, ?phases, "Matching pipeline run started");

        let mut summary = PipelineSummary {
            week,
            scoring: None,
            promotion: None,
            closed_groups: 0,
            grouping: None,
        };

        if phases.score {
            match &self.orchestrator {
                Some(orchestrator) => match orchestrator.run().await {
                    Ok(scoring) => summary.scoring = Some(scoring),
                    Err(e) => error!(error = %e, "Scoring phase aborted"),
                },
                None => warn!("No compatibility scorer configured, scoring phase skipped"),
            }
        }

        if phases.promote {
            match self.promoter.run().await {
                Ok(promotion) => summary.promotion = Some(promotion),
                Err(e) => error!(error = %e, "Promotion phase aborted"),
            }
        }

        if phases.group {
            match self.groups.close_groups_before(week).await {
                Ok(closed) => {
                    summary.closed_groups = closed;
                    if closed > 0 {
                        info!(closed, week = %week, "Closed groups of earlier weeks");
                    }
                }
                Err(e) => warn!(error = %e, "Could not close groups of earlier weeks"),
            }

            match self.groups.list_eligible_members(week).await {
                Ok(eligible) => {
                    summary.grouping = Some(self.engine.form_groups(week, eligible).await);
                }
                Err(e) => error!(error = %e, "Group formation aborted: eligible members unavailable"),
            }
        }

        info!(week = %week, "Matching pipeline run completed");
        summary
    }
}
