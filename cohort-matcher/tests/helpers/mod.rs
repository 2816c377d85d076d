//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use cohort_common::db::{init_memory_database, Gender, MatchRecord, Member};
use cohort_common::{CohortWeek, Result};
use cohort_matcher::scorer::CompatibilityScorer;
use cohort_matcher::store::{MatchStore, SqliteStore};
use cohort_matcher::ScorerError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn test_week() -> CohortWeek {
    CohortWeek::from_anchor(NaiveDate::from_ymd_opt(2026, 10, 12).unwrap())
}

/// In-memory store populated with active members of the given genders
pub async fn store_with_members(genders: &[Gender]) -> (Arc<SqliteStore>, Vec<Member>) {
    let store = Arc::new(SqliteStore::new(init_memory_database().await.unwrap()));
    let mut members = Vec::new();
    for (i, gender) in genders.iter().enumerate() {
        let member = Member::new(Uuid::new_v4(), *gender).with_city(format!("City {}", i % 3));
        store.save_member(&member, true).await.unwrap();
        members.push(member);
    }
    (store, members)
}

/// Scorer returning a fixed score, failing for selected pairs, and
/// recording every pair it was asked about
pub struct FakeScorer {
    score: f64,
    failing: HashSet<(Uuid, Uuid)>,
    calls: Mutex<Vec<(Uuid, Uuid)>>,
}

impl FakeScorer {
    pub fn constant(score: f64) -> Self {
        Self {
            score,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail (in either direction) for the pair {a, b}
    pub fn failing_for(mut self, a: Uuid, b: Uuid) -> Self {
        self.failing.insert((a, b));
        self.failing.insert((b, a));
        self
    }

    pub fn calls(&self) -> Vec<(Uuid, Uuid)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_called_for(&self, a: Uuid, b: Uuid) -> bool {
        self.calls()
            .iter()
            .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

#[async_trait]
impl CompatibilityScorer for FakeScorer {
    async fn score(&self, subject_id: Uuid, object_id: Uuid) -> std::result::Result<f64, ScorerError> {
        self.calls.lock().unwrap().push((subject_id, object_id));
        if self.failing.contains(&(subject_id, object_id)) {
            return Err(ScorerError::Other("injected failure".to_string()));
        }
        Ok(self.score)
    }
}

/// Match store whose first `failures` bulk inserts fail
pub struct FlakyMatchStore {
    inner: Arc<SqliteStore>,
    failures: AtomicUsize,
}

impl FlakyMatchStore {
    pub fn new(inner: Arc<SqliteStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl MatchStore for FlakyMatchStore {
    async fn find_existing_match(&self, a: Uuid, b: Uuid) -> Result<Option<MatchRecord>> {
        self.inner.find_existing_match(a, b).await
    }

    async fn insert_matches(&self, records: &[MatchRecord]) -> Result<u64> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(cohort_common::Error::Internal("injected write failure".to_string()));
        }
        self.inner.insert_matches(records).await
    }

    async fn promote_top_matches(&self, min_score: f64, limit: u32) -> Result<u64> {
        self.inner.promote_top_matches(min_score, limit).await
    }
}
