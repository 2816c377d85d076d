//! Match promotion
//!
//! Accepts at most `limit` of the best pending matches per run. The cap is
//! what bounds how many members reach group formation in a single pass.

use crate::store::MatchStore;
use cohort_common::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionConfig {
    /// Minimum score for acceptance
    pub acceptance_threshold: f64,
    /// Maximum matches accepted per run
    pub limit: u32,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 60.0,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionSummary {
    pub promoted: u64,
}

pub struct MatchPromoter {
    matches: Arc<dyn MatchStore>,
    config: PromotionConfig,
}

impl MatchPromoter {
    pub fn new(matches: Arc<dyn MatchStore>, config: PromotionConfig) -> Self {
        Self { matches, config }
    }

    pub async fn run(&self) -> Result<PromotionSummary> {
        let promoted = self
            .matches
            .promote_top_matches(self.config.acceptance_threshold, self.config.limit)
            .await?;

        info!(
            promoted,
            threshold = self.config.acceptance_threshold,
            limit = self.config.limit,
            "Promotion phase completed"
        );

        Ok(PromotionSummary { promoted })
    }
}
