//! Persistence boundary of the pipeline
//!
//! The pipeline only talks to storage through these traits. [`SqliteStore`]
//! implements all of them over the shared database.

use async_trait::async_trait;
use cohort_common::db::{
    Gender, GenderComposition, Group, GroupMembership, GroupType, MatchRecord, Member,
};
use cohort_common::{CohortWeek, Result};
use uuid::Uuid;

mod sqlite;

pub use sqlite::SqliteStore;

/// Read-only view of the member directory
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// All members currently active
    async fn list_active_members(&self) -> Result<Vec<Member>>;
}

/// Match record persistence
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Existing record for the unordered pair {a, b}, in either direction
    async fn find_existing_match(&self, a: Uuid, b: Uuid) -> Result<Option<MatchRecord>>;

    /// Bulk insert; pairs that already have a record are ignored
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_matches(&self, records: &[MatchRecord]) -> Result<u64>;

    /// Accept up to `limit` pending matches scoring at least `min_score`,
    /// highest scores first. Returns the number promoted.
    async fn promote_top_matches(&self, min_score: f64, limit: u32) -> Result<u64>;
}

/// Optional restrictions for [`GroupStore::list_active_groups_for_week`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupFilter {
    pub group_type: Option<GroupType>,
    pub composition: Option<GenderComposition>,
}

impl GroupFilter {
    /// Same-gender groups for members of `gender`
    pub fn same_gender(gender: Gender) -> Self {
        Self {
            group_type: Some(GroupType::SameGender),
            composition: Some(GenderComposition::same_gender(gender)),
        }
    }

    /// Any group of the given type
    pub fn of_type(group_type: GroupType) -> Self {
        Self {
            group_type: Some(group_type),
            composition: None,
        }
    }
}

/// Result of a membership insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMemberOutcome {
    Added,
    /// The member already holds a seat in an active group of the same week
    /// (this group or another one)
    Duplicate,
    /// The group had no free seat at insert time
    Full,
}

/// Group and membership persistence
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Active groups of `week` matching `filter`, oldest first
    async fn list_active_groups_for_week(
        &self,
        week: CohortWeek,
        filter: GroupFilter,
    ) -> Result<Vec<Group>>;

    async fn count_group_members(&self, group_id: Uuid) -> Result<usize>;

    async fn count_group_members_by_gender(&self, group_id: Uuid, gender: Gender) -> Result<usize>;

    /// Active groups of `group_type` created for `week`
    async fn count_groups_for_week(&self, week: CohortWeek, group_type: GroupType) -> Result<usize>;

    async fn create_group(
        &self,
        week: CohortWeek,
        group_type: GroupType,
        composition: GenderComposition,
    ) -> Result<Group>;

    /// The member's seat in an active group of `week`, if any
    async fn find_active_membership(
        &self,
        week: CohortWeek,
        member_id: Uuid,
    ) -> Result<Option<GroupMembership>>;

    /// Add a member if the group still has fewer than `capacity` members and
    /// the member has no seat in another active group of the group's week
    ///
    /// Both checks and the insert happen in one statement.
    async fn add_group_member(
        &self,
        group_id: Uuid,
        member_id: Uuid,
        capacity: usize,
    ) -> Result<AddMemberOutcome>;

    /// Active members with an accepted match and no active group in `week`
    async fn list_eligible_members(&self, week: CohortWeek) -> Result<Vec<Member>>;

    /// Close active groups of weeks before `week`. Returns the number closed.
    async fn close_groups_before(&self, week: CohortWeek) -> Result<u64>;
}
