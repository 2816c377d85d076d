//! End-to-end pipeline tests against an in-memory database

mod helpers;

use cohort_common::db::{Gender, GenderComposition, GroupType, MatchRecord, MatchStatus};
use cohort_common::CohortWeek;
use cohort_matcher::scoring::{ScoreOrchestrator, ScoringConfig};
use cohort_matcher::store::{GroupFilter, GroupStore, MatchStore, SqliteStore};
use cohort_matcher::{MatchingPipeline, Phases, PipelineParams};
use helpers::{store_with_members, test_week, FakeScorer, FlakyMatchStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;

fn pipeline(store: Arc<SqliteStore>, scorer: Option<Arc<FakeScorer>>, seed: u64) -> MatchingPipeline {
    let scorer = scorer.map(|s| s as Arc<dyn cohort_matcher::scorer::CompatibilityScorer>);
    MatchingPipeline::from_store(store, scorer, &PipelineParams::default(), StdRng::seed_from_u64(seed))
}

/// Every active group of `week` with its member ids
async fn groups_with_members(
    store: &SqliteStore,
    week: CohortWeek,
) -> Vec<(cohort_common::db::Group, Vec<uuid::Uuid>)> {
    let groups = store
        .list_active_groups_for_week(week, GroupFilter::default())
        .await
        .unwrap();
    let mut out = Vec::new();
    for group in groups {
        let ids = store.list_group_member_ids(group.id).await.unwrap();
        out.push((group, ids));
    }
    out
}

#[tokio::test]
async fn test_three_females_end_to_end() {
    let (store, members) = store_with_members(&[Gender::Female; 3]).await;
    let scorer = Arc::new(FakeScorer::constant(80.0));
    let week = test_week();

    let summary = pipeline(store.clone(), Some(scorer.clone()), 1)
        .run_for_week(week, Phases::ALL)
        .await;

    let scoring = summary.scoring.unwrap();
    assert_eq!(scoring.pairs_total, 3);
    assert_eq!(scoring.matches_created, 3);
    assert_eq!(summary.promotion.unwrap().promoted, 3);

    let matches = store.list_matches().await.unwrap();
    assert_eq!(matches.len(), 3);
    assert!(matches.iter().all(|m| m.status == MatchStatus::Accepted));

    let groups = groups_with_members(&store, week).await;
    assert_eq!(groups.len(), 1);
    let (group, ids) = &groups[0];
    assert_eq!(group.group_type, GroupType::SameGender);
    assert_eq!(group.gender_composition, GenderComposition::AllFemale);
    assert_eq!(ids.len(), 3);
    for member in &members {
        assert!(ids.contains(&member.id));
    }
}

#[tokio::test]
async fn test_mixed_genders_respect_capacity() {
    let genders = [
        Gender::Female,
        Gender::Female,
        Gender::Female,
        Gender::Female,
        Gender::Male,
        Gender::Male,
    ];
    let (store, _) = store_with_members(&genders).await;
    let week = test_week();

    let summary = pipeline(store.clone(), Some(Arc::new(FakeScorer::constant(75.0))), 7)
        .run_for_week(week, Phases::ALL)
        .await;

    // 15 pairs, promotion limit 20: everyone ends up with an accepted match
    assert_eq!(summary.promotion.unwrap().promoted, 15);
    let grouping = summary.grouping.unwrap();
    assert_eq!(grouping.eligible, 6);
    assert_eq!(grouping.assigned, 6);
    assert_eq!(grouping.unassigned, 0);

    let groups = groups_with_members(&store, week).await;
    let mut seen = HashSet::new();
    for (group, ids) in &groups {
        assert!(ids.len() <= 5, "group {} has {} members", group.id, ids.len());
        for id in ids {
            assert!(seen.insert(*id), "member {} placed twice in one week", id);
        }
    }
    assert_eq!(seen.len(), 6);
}

#[tokio::test]
async fn test_same_gender_groups_hold_one_gender() {
    let genders = [
        Gender::Male,
        Gender::Female,
        Gender::Male,
        Gender::Female,
        Gender::Male,
        Gender::Male,
        Gender::Female,
    ];
    let (store, _) = store_with_members(&genders).await;
    let week = test_week();

    pipeline(store.clone(), Some(Arc::new(FakeScorer::constant(90.0))), 3)
        .run_for_week(week, Phases::ALL)
        .await;

    for (group, _) in groups_with_members(&store, week).await {
        match group.gender_composition {
            GenderComposition::AllFemale => {
                let males = store.count_group_members_by_gender(group.id, Gender::Male).await.unwrap();
                assert_eq!(males, 0);
                assert_eq!(group.group_type, GroupType::SameGender);
            }
            GenderComposition::AllMale => {
                let females = store.count_group_members_by_gender(group.id, Gender::Female).await.unwrap();
                assert_eq!(females, 0);
                assert_eq!(group.group_type, GroupType::SameGender);
            }
            GenderComposition::Ratio2f3m | GenderComposition::Ratio3f2m => {
                assert_eq!(group.group_type, GroupType::Mixed);
            }
        }
    }
}

#[tokio::test]
async fn test_existing_pair_is_not_rescored() {
    let (store, members) = store_with_members(&[Gender::Female, Gender::Male, Gender::Female]).await;
    let (a, b) = (members[0].id, members[1].id);

    // Stored in the reverse direction from the canonical visit order
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    store
        .insert_matches(&[MatchRecord::pending(high, low, 55.0)])
        .await
        .unwrap();

    let scorer = Arc::new(FakeScorer::constant(80.0));
    let orchestrator = ScoreOrchestrator::new(store.clone(), store.clone(), scorer.clone(), ScoringConfig::default());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pairs_skipped, 1);
    assert_eq!(summary.matches_created, 2);
    assert!(!scorer.was_called_for(a, b));
    assert_eq!(scorer.calls().len(), 2);

    let matches = store.list_matches().await.unwrap();
    assert_eq!(matches.len(), 3);
    let keys: HashSet<String> = matches.iter().map(|m| m.pair_key()).collect();
    assert_eq!(keys.len(), 3);
    let existing = matches.iter().find(|m| m.covers(a, b)).unwrap();
    assert_eq!(existing.compatibility_score, 55.0);
}

#[tokio::test]
async fn test_scorer_failure_is_isolated_to_its_pair() {
    let (store, members) = store_with_members(&[Gender::Female; 5]).await;
    let (a, b) = (members[1].id, members[3].id);
    let scorer = Arc::new(FakeScorer::constant(70.0).failing_for(a, b));

    let orchestrator = ScoreOrchestrator::new(store.clone(), store.clone(), scorer.clone(), ScoringConfig::default());
    let summary = orchestrator.run().await.unwrap();

    // 10 pairs fit in a single batch
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.pairs_scored, 9);
    assert_eq!(summary.scorer_failures, 1);
    assert_eq!(summary.matches_created, 9);

    let matches = store.list_matches().await.unwrap();
    assert_eq!(matches.len(), 9);
    assert!(!matches.iter().any(|m| m.covers(a, b)));

    // The next run picks the failed pair up again
    let retry = ScoreOrchestrator::new(
        store.clone(),
        store.clone(),
        Arc::new(FakeScorer::constant(70.0)),
        ScoringConfig::default(),
    );
    let summary = retry.run().await.unwrap();
    assert_eq!(summary.pairs_skipped, 9);
    assert_eq!(summary.matches_created, 1);
}

#[tokio::test]
async fn test_failed_batch_write_does_not_stop_later_batches() {
    let (store, _) = store_with_members(&[Gender::Male; 5]).await;
    let flaky = Arc::new(FlakyMatchStore::new(store.clone(), 1));
    let config = ScoringConfig {
        batch_size: 3,
        ..Default::default()
    };

    let orchestrator = ScoreOrchestrator::new(store.clone(), flaky, Arc::new(FakeScorer::constant(50.0)), config.clone());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.batches, 4);
    // First batch of 3 records lost
    assert_eq!(summary.write_failures, 3);
    assert_eq!(summary.matches_created, 7);
    assert_eq!(store.list_matches().await.unwrap().len(), 7);

    let rerun = ScoreOrchestrator::new(store.clone(), store.clone(), Arc::new(FakeScorer::constant(50.0)), config);
    let summary = rerun.run().await.unwrap();
    assert_eq!(summary.matches_created, 3);
    assert_eq!(store.list_matches().await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_rerun_in_same_week_changes_nothing() {
    let genders = [Gender::Female, Gender::Male, Gender::Female, Gender::Male];
    let (store, _) = store_with_members(&genders).await;
    let week = test_week();
    let scorer = Arc::new(FakeScorer::constant(85.0));

    let mut pipeline = pipeline(store.clone(), Some(scorer.clone()), 11);
    let first = pipeline.run_for_week(week, Phases::ALL).await;
    assert_eq!(first.grouping.unwrap().assigned, 4);
    let calls_after_first = scorer.calls().len();
    let groups_after_first = groups_with_members(&store, week).await;

    let second = pipeline.run_for_week(week, Phases::ALL).await;
    let scoring = second.scoring.unwrap();
    assert_eq!(scoring.matches_created, 0);
    assert_eq!(scoring.pairs_skipped, 6);
    assert_eq!(scorer.calls().len(), calls_after_first);
    assert_eq!(second.promotion.unwrap().promoted, 0);
    let grouping = second.grouping.unwrap();
    assert_eq!(grouping.eligible, 0);
    assert_eq!(grouping.groups_created, 0);

    assert_eq!(store.list_matches().await.unwrap().len(), 6);
    assert_eq!(groups_with_members(&store, week).await, groups_after_first);
}

#[tokio::test]
async fn test_new_week_closes_previous_groups() {
    let (store, _) = store_with_members(&[Gender::Female, Gender::Female, Gender::Male]).await;
    let scorer = Arc::new(FakeScorer::constant(65.0));
    let last_week = test_week().previous();
    let this_week = test_week();

    let mut pipeline = pipeline(store.clone(), Some(scorer), 5);
    let first = pipeline.run_for_week(last_week, Phases::ALL).await;
    assert_eq!(first.grouping.unwrap().assigned, 3);

    let second = pipeline.run_for_week(this_week, Phases::GROUP).await;
    assert!(second.scoring.is_none());
    assert!(second.promotion.is_none());
    assert!(second.closed_groups >= 1);
    assert_eq!(second.grouping.unwrap().assigned, 3);

    assert!(groups_with_members(&store, last_week).await.is_empty());
    assert!(!groups_with_members(&store, this_week).await.is_empty());
}

#[tokio::test]
async fn test_pipeline_without_scorer_still_promotes_and_groups() {
    let (store, members) = store_with_members(&[Gender::Male, Gender::Male]).await;
    store
        .insert_matches(&[MatchRecord::pending(members[0].id, members[1].id, 90.0)])
        .await
        .unwrap();
    let week = test_week();

    let summary = pipeline(store.clone(), None, 2).run_for_week(week, Phases::ALL).await;

    assert!(summary.scoring.is_none());
    assert_eq!(summary.promotion.unwrap().promoted, 1);
    let grouping = summary.grouping.unwrap();
    assert_eq!(grouping.assigned, 2);
    assert_eq!(grouping.same_gender_groups, 1);
}

#[tokio::test]
async fn test_low_scores_are_not_eligible() {
    let (store, _) = store_with_members(&[Gender::Female; 3]).await;
    let week = test_week();

    // Above candidacy, below acceptance: pending matches only
    let summary = pipeline(store.clone(), Some(Arc::new(FakeScorer::constant(40.0))), 9)
        .run_for_week(week, Phases::ALL)
        .await;

    assert_eq!(summary.scoring.unwrap().matches_created, 3);
    assert_eq!(summary.promotion.unwrap().promoted, 0);
    assert_eq!(summary.grouping.unwrap().eligible, 0);
    assert!(groups_with_members(&store, week).await.is_empty());
}
