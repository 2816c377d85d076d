//! Weekly group formation
//!
//! Greedy, strictly sequential allocation: each placement can change the
//! free capacity seen by the next member, so members are handled one at a
//! time in shuffled order.
//!
//! Per member:
//! 1. First active same-gender group of the week with a free seat
//! 2. Otherwise the first active mixed group with a free seat
//! 3. Otherwise a new group whose type balances same-gender against mixed
//!
//! Mixed groups carry a target ratio label. It is advisory unless
//! `enforce_mixed_ratio` is set, in which case a member only joins a mixed
//! group while the label still has a seat for their gender.

use crate::store::{AddMemberOutcome, GroupFilter, GroupStore};
use cohort_common::db::{GenderComposition, Group, GroupType, Member};
use cohort_common::{CohortWeek, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingConfig {
    /// Maximum members per group
    pub capacity: usize,
    /// Reject members that would exceed a mixed group's gender ratio
    pub enforce_mixed_ratio: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            enforce_mixed_ratio: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupingSummary {
    pub week: CohortWeek,
    pub eligible: usize,
    pub assigned: usize,
    /// Members left unassigned this run (retried next run)
    pub unassigned: usize,
    /// Members skipped because they already hold a seat this week
    pub already_grouped: usize,
    pub groups_created: usize,
    pub same_gender_groups: usize,
    pub mixed_groups: usize,
}

impl GroupingSummary {
    fn new(week: CohortWeek, eligible: usize) -> Self {
        Self {
            week,
            eligible,
            assigned: 0,
            unassigned: 0,
            already_grouped: 0,
            groups_created: 0,
            same_gender_groups: 0,
            mixed_groups: 0,
        }
    }
}

/// Outcome of placing one member
enum Placement {
    Joined(Uuid),
    AlreadySeated(Uuid),
    /// The store refused the seat (group full or member seated concurrently)
    Refused,
}

/// Greedy weekly group allocator
///
/// The random source is injected so allocation order is reproducible with
/// a seeded generator.
pub struct GroupFormationEngine<R = StdRng> {
    store: Arc<dyn GroupStore>,
    config: GroupingConfig,
    rng: R,
}

impl GroupFormationEngine<StdRng> {
    /// Engine with an entropy-seeded generator
    pub fn new(store: Arc<dyn GroupStore>, config: GroupingConfig) -> Self {
        Self::with_rng(store, config, StdRng::from_entropy())
    }
}

impl<R: Rng + Send> GroupFormationEngine<R> {
    pub fn with_rng(store: Arc<dyn GroupStore>, config: GroupingConfig, rng: R) -> Self {
        Self { store, config, rng }
    }

    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    /// Place every eligible member into an active group of `week`
    ///
    /// Never fails as a whole: per-member errors are logged and the member
    /// stays unassigned until the next run.
    pub async fn form_groups(&mut self, week: CohortWeek, mut members: Vec<Member>) -> GroupingSummary {
        let mut summary = GroupingSummary::new(week, members.len());
        members.shuffle(&mut self.rng);

        info!(week = %week, eligible = members.len(), "Group formation started");

        let mut assigned: HashSet<Uuid> = HashSet::with_capacity(members.len());

        for member in &members {
            if assigned.contains(&member.id) {
                continue;
            }

            match self.assign_member(week, member, &mut summary).await {
                Ok(Placement::Joined(group_id)) => {
                    assigned.insert(member.id);
                    summary.assigned += 1;
                    debug!(member_id = %member.id, group_id = %group_id, "Member assigned");
                }
                Ok(Placement::AlreadySeated(group_id)) => {
                    assigned.insert(member.id);
                    summary.already_grouped += 1;
                    debug!(member_id = %member.id, group_id = %group_id, "Member already grouped this week");
                }
                Ok(Placement::Refused) => summary.unassigned += 1,
                Err(e) => {
                    summary.unassigned += 1;
                    warn!(
                        member_id = %member.id,
                        error = %e,
                        "Group assignment failed, member retried next run"
                    );
                }
            }
        }

        match self.group_type_counts(week).await {
            Ok((same_gender, mixed)) => {
                summary.same_gender_groups = same_gender;
                summary.mixed_groups = mixed;
            }
            Err(e) => warn!(week = %week, error = %e, "Could not count groups for summary"),
        }

        info!(
            week = %week,
            assigned = summary.assigned,
            already_grouped = summary.already_grouped,
            eligible = summary.eligible,
            groups_created = summary.groups_created,
            same_gender_groups = summary.same_gender_groups,
            mixed_groups = summary.mixed_groups,
            "Group formation completed"
        );

        summary
    }

    async fn assign_member(
        &mut self,
        week: CohortWeek,
        member: &Member,
        summary: &mut GroupingSummary,
    ) -> Result<Placement> {
        if let Some(membership) = self.store.find_active_membership(week, member.id).await? {
            return Ok(Placement::AlreadySeated(membership.group_id));
        }

        let target = match self.find_open_group(week, member).await? {
            Some(group) => group,
            None => {
                let group = self.create_group_for(week, member).await?;
                summary.groups_created += 1;
                group
            }
        };

        match self
            .store
            .add_group_member(target.id, member.id, self.config.capacity)
            .await?
        {
            AddMemberOutcome::Added => Ok(Placement::Joined(target.id)),
            AddMemberOutcome::Duplicate => {
                warn!(
                    member_id = %member.id,
                    group_id = %target.id,
                    "Member took a seat this week before insert"
                );
                Ok(Placement::Refused)
            }
            AddMemberOutcome::Full => {
                warn!(member_id = %member.id, group_id = %target.id, "Group filled before insert");
                Ok(Placement::Refused)
            }
        }
    }

    async fn find_open_group(&self, week: CohortWeek, member: &Member) -> Result<Option<Group>> {
        let same_gender = self
            .store
            .list_active_groups_for_week(week, GroupFilter::same_gender(member.gender))
            .await?;
        for group in same_gender {
            if self.store.count_group_members(group.id).await? < self.config.capacity {
                return Ok(Some(group));
            }
        }

        let mixed = self
            .store
            .list_active_groups_for_week(week, GroupFilter::of_type(GroupType::Mixed))
            .await?;
        for group in mixed {
            if self.store.count_group_members(group.id).await? >= self.config.capacity {
                continue;
            }
            if self.config.enforce_mixed_ratio && !self.has_ratio_seat(&group, member).await? {
                continue;
            }
            return Ok(Some(group));
        }

        Ok(None)
    }

    async fn has_ratio_seat(&self, group: &Group, member: &Member) -> Result<bool> {
        let taken = self
            .store
            .count_group_members_by_gender(group.id, member.gender)
            .await?;
        Ok(taken < group.gender_composition.seats_for(member.gender, self.config.capacity))
    }

    async fn create_group_for(&mut self, week: CohortWeek, member: &Member) -> Result<Group> {
        let (same_gender, mixed) = self.group_type_counts(week).await?;

        // Ties go to same-gender
        let (group_type, composition) = if same_gender <= mixed {
            (GroupType::SameGender, GenderComposition::same_gender(member.gender))
        } else if self.rng.gen_bool(0.5) {
            (GroupType::Mixed, GenderComposition::Ratio2f3m)
        } else {
            (GroupType::Mixed, GenderComposition::Ratio3f2m)
        };

        let group = self.store.create_group(week, group_type, composition).await?;

        info!(
            group_id = %group.id,
            week = %week,
            group_type = %group_type,
            composition = %composition,
            "Created group"
        );

        Ok(group)
    }

    async fn group_type_counts(&self, week: CohortWeek) -> Result<(usize, usize)> {
        let same_gender = self
            .store
            .count_groups_for_week(week, GroupType::SameGender)
            .await?;
        let mixed = self.store.count_groups_for_week(week, GroupType::Mixed).await?;
        Ok((same_gender, mixed))
    }
}
