//! Database-backed pipeline parameters
//!
//! Tunables are read from the `settings` table, which `init_database` seeds
//! with defaults. A missing or unparsable value falls back to the default
//! with a warning rather than stopping the run.

use crate::grouping::GroupingConfig;
use crate::promoter::PromotionConfig;
use crate::scoring::ScoringConfig;
use chrono::Weekday;
use cohort_common::db::get_setting;
use cohort_common::time::parse_weekday;
use cohort_common::Result;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    pub scoring_batch_size: usize,
    pub scoring_progress_interval: usize,
    pub scorer_timeout_ms: u64,
    pub match_candidacy_threshold: f64,
    pub match_acceptance_threshold: f64,
    pub match_promotion_limit: u32,
    pub group_capacity: usize,
    pub matching_weekday: Weekday,
    pub enforce_mixed_ratio: bool,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            scoring_batch_size: 20,
            scoring_progress_interval: 100,
            scorer_timeout_ms: 30_000,
            match_candidacy_threshold: 20.0,
            match_acceptance_threshold: 60.0,
            match_promotion_limit: 20,
            group_capacity: 5,
            matching_weekday: Weekday::Mon,
            enforce_mixed_ratio: false,
        }
    }
}

impl PipelineParams {
    /// Load from the settings table
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            scoring_batch_size: read(pool, "scoring_batch_size", defaults.scoring_batch_size, |v| *v > 0).await?,
            scoring_progress_interval: read(
                pool,
                "scoring_progress_interval",
                defaults.scoring_progress_interval,
                |v| *v > 0,
            )
            .await?,
            scorer_timeout_ms: read(pool, "scorer_timeout_ms", defaults.scorer_timeout_ms, |v| *v > 0).await?,
            match_candidacy_threshold: read(
                pool,
                "match_candidacy_threshold",
                defaults.match_candidacy_threshold,
                |v: &f64| v.is_finite(),
            )
            .await?,
            match_acceptance_threshold: read(
                pool,
                "match_acceptance_threshold",
                defaults.match_acceptance_threshold,
                |v: &f64| v.is_finite(),
            )
            .await?,
            match_promotion_limit: read(pool, "match_promotion_limit", defaults.match_promotion_limit, |_| true)
                .await?,
            group_capacity: read(pool, "group_capacity", defaults.group_capacity, |v| *v > 0).await?,
            matching_weekday: match get_setting(pool, "matching_weekday").await? {
                Some(raw) => parse_weekday(&raw).unwrap_or_else(|_| {
                    warn!("Invalid matching_weekday '{}', using {}", raw, defaults.matching_weekday);
                    defaults.matching_weekday
                }),
                None => defaults.matching_weekday,
            },
            enforce_mixed_ratio: read(pool, "enforce_mixed_ratio", defaults.enforce_mixed_ratio, |_| true)
                .await?,
        })
    }

    pub fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            batch_size: self.scoring_batch_size,
            candidacy_threshold: self.match_candidacy_threshold,
            scorer_timeout: Duration::from_millis(self.scorer_timeout_ms),
            progress_interval: self.scoring_progress_interval,
        }
    }

    pub fn promotion_config(&self) -> PromotionConfig {
        PromotionConfig {
            acceptance_threshold: self.match_acceptance_threshold,
            limit: self.match_promotion_limit,
        }
    }

    pub fn grouping_config(&self) -> GroupingConfig {
        GroupingConfig {
            capacity: self.group_capacity,
            enforce_mixed_ratio: self.enforce_mixed_ratio,
        }
    }
}

/// Read and parse one setting, falling back to `default` when missing or invalid
async fn read<T>(pool: &SqlitePool, key: &str, default: T, valid: impl Fn(&T) -> bool) -> Result<T>
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = get_setting(pool, key).await? else {
        return Ok(default);
    };

    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => Ok(value),
        _ => {
            warn!("Invalid value '{}' for setting '{}', using default {}", raw, key, default);
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_common::db::{init_memory_database, set_setting};

    #[tokio::test]
    async fn test_seeded_settings_match_defaults() {
        let pool = init_memory_database().await.unwrap();
        let params = PipelineParams::load(&pool).await.unwrap();
        assert_eq!(params, PipelineParams::default());
    }

    #[tokio::test]
    async fn test_overrides_are_read() {
        let pool = init_memory_database().await.unwrap();
        set_setting(&pool, "scoring_batch_size", "50").await.unwrap();
        set_setting(&pool, "match_acceptance_threshold", "72.5").await.unwrap();
        set_setting(&pool, "matching_weekday", "thursday").await.unwrap();
        set_setting(&pool, "enforce_mixed_ratio", "true").await.unwrap();

        let params = PipelineParams::load(&pool).await.unwrap();
        assert_eq!(params.scoring_batch_size, 50);
        assert_eq!(params.match_acceptance_threshold, 72.5);
        assert_eq!(params.matching_weekday, Weekday::Thu);
        assert!(params.enforce_mixed_ratio);
        assert!(params.grouping_config().enforce_mixed_ratio);
        assert_eq!(params.scoring_config().batch_size, 50);
    }

    #[tokio::test]
    async fn test_invalid_values_fall_back() {
        let pool = init_memory_database().await.unwrap();
        set_setting(&pool, "scoring_batch_size", "0").await.unwrap();
        set_setting(&pool, "group_capacity", "five").await.unwrap();
        set_setting(&pool, "matching_weekday", "someday").await.unwrap();
        set_setting(&pool, "match_candidacy_threshold", "NaN").await.unwrap();

        let params = PipelineParams::load(&pool).await.unwrap();
        assert_eq!(params.scoring_batch_size, 20);
        assert_eq!(params.group_capacity, 5);
        assert_eq!(params.matching_weekday, Weekday::Mon);
        assert_eq!(params.match_candidacy_threshold, 20.0);
    }

    #[test]
    fn test_scoring_config_timeout() {
        let params = PipelineParams {
            scorer_timeout_ms: 1500,
            ..Default::default()
        };
        assert_eq!(params.scoring_config().scorer_timeout, Duration::from_millis(1500));
    }
}
