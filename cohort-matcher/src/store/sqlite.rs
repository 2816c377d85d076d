//! SQLite implementation of the store traits

use super::{AddMemberOutcome, GroupFilter, GroupStore, MatchStore, MemberDirectory};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cohort_common::db::{
    pair_key, Gender, GenderComposition, Group, GroupMembership, GroupStatus, GroupType,
    MatchRecord, Member,
};
use cohort_common::{CohortWeek, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::warn;
use uuid::Uuid;

/// Rows per multi-row INSERT; keeps bound parameters well under SQLite's limit
const MAX_ROWS_PER_INSERT: usize = 500;

const MEMBER_COLUMNS: &str = "m.id, m.gender, m.city, m.attributes";
const MATCH_COLUMNS: &str = "id, subject_id, object_id, compatibility_score, status, created_at";
const GROUP_COLUMNS: &str = "id, match_week, group_type, gender_composition, status, created_at";

/// Store backed by the shared SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a member row (directory sync and tests)
    pub async fn save_member(&self, member: &Member, active: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO members (id, gender, city, attributes, active)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                gender = excluded.gender,
                city = excluded.city,
                attributes = excluded.attributes,
                active = excluded.active
            "#,
        )
        .bind(member.id.to_string())
        .bind(member.gender.as_str())
        .bind(&member.city)
        .bind(member.attributes.to_string())
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All match records, oldest first
    pub async fn list_matches(&self) -> Result<Vec<MatchRecord>> {
        let sql = format!("SELECT {} FROM matches ORDER BY created_at, rowid", MATCH_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(match_from_row).collect()
    }

    /// Member ids of a group in join order
    pub async fn list_group_member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT member_id FROM cohort_group_members WHERE group_id = ? ORDER BY joined_at, rowid",
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        ids.iter()
            .map(|id| Uuid::parse_str(id).map_err(Into::into))
            .collect()
    }
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let text: String = row.try_get(column)?;
    Ok(Uuid::parse_str(&text)?)
}

fn member_from_row(row: &SqliteRow) -> Result<Member> {
    let id = parse_uuid(row, "id")?;
    let gender: String = row.try_get("gender")?;
    let raw_attributes: String = row.try_get("attributes")?;

    let attributes = match serde_json::from_str(&raw_attributes) {
        Ok(value) => value,
        Err(e) => {
            warn!(member_id = %id, error = %e, "Malformed member attributes, using null");
            serde_json::Value::Null
        }
    };

    Ok(Member {
        id,
        gender: gender.parse()?,
        city: row.try_get("city")?,
        attributes,
    })
}

fn match_from_row(row: &SqliteRow) -> Result<MatchRecord> {
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(MatchRecord {
        id: parse_uuid(row, "id")?,
        subject_id: parse_uuid(row, "subject_id")?,
        object_id: parse_uuid(row, "object_id")?,
        compatibility_score: row.try_get("compatibility_score")?,
        status: status.parse()?,
        created_at,
    })
}

fn membership_from_row(row: &SqliteRow) -> Result<GroupMembership> {
    Ok(GroupMembership {
        group_id: parse_uuid(row, "group_id")?,
        member_id: parse_uuid(row, "member_id")?,
        joined_at: row.try_get("joined_at")?,
    })
}

fn group_from_row(row: &SqliteRow) -> Result<Group> {
    let match_week: NaiveDate = row.try_get("match_week")?;
    let group_type: String = row.try_get("group_type")?;
    let composition: String = row.try_get("gender_composition")?;
    let status: String = row.try_get("status")?;

    Ok(Group {
        id: parse_uuid(row, "id")?,
        match_week: CohortWeek::from_anchor(match_week),
        group_type: group_type.parse()?,
        gender_composition: composition.parse()?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MemberDirectory for SqliteStore {
    async fn list_active_members(&self) -> Result<Vec<Member>> {
        let sql = format!(
            "SELECT {} FROM members m WHERE m.active = 1 ORDER BY m.id",
            MEMBER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(member_from_row).collect()
    }
}

#[async_trait]
impl MatchStore for SqliteStore {
    async fn find_existing_match(&self, a: Uuid, b: Uuid) -> Result<Option<MatchRecord>> {
        let sql = format!("SELECT {} FROM matches WHERE pair_key = ?", MATCH_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(pair_key(a, b))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(match_from_row).transpose()
    }

    async fn insert_matches(&self, records: &[MatchRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in records.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO matches (id, subject_id, object_id, pair_key, compatibility_score, status, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.id.to_string())
                    .push_bind(record.subject_id.to_string())
                    .push_bind(record.object_id.to_string())
                    .push_bind(record.pair_key())
                    .push_bind(record.compatibility_score)
                    .push_bind(record.status.as_str())
                    .push_bind(record.created_at)
                    .push_bind(record.created_at);
            });
            builder.push(" ON CONFLICT(pair_key) DO NOTHING");

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn promote_top_matches(&self, min_score: f64, limit: u32) -> Result<u64> {
        if limit == 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE matches
            SET status = 'accepted', updated_at = ?
            WHERE id IN (
                SELECT id FROM matches
                WHERE status = 'pending' AND compatibility_score >= ?
                ORDER BY compatibility_score DESC, created_at ASC, rowid ASC
                LIMIT ?
            )
            "#,
        )
        .bind(Utc::now())
        .bind(min_score)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl GroupStore for SqliteStore {
    async fn list_active_groups_for_week(
        &self,
        week: CohortWeek,
        filter: GroupFilter,
    ) -> Result<Vec<Group>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM cohort_groups WHERE status = 'active' AND match_week = ",
            GROUP_COLUMNS
        ));
        builder.push_bind(week.anchor_date());

        if let Some(group_type) = filter.group_type {
            builder.push(" AND group_type = ").push_bind(group_type.as_str());
        }
        if let Some(composition) = filter.composition {
            builder
                .push(" AND gender_composition = ")
                .push_bind(composition.as_str());
        }
        builder.push(" ORDER BY created_at ASC, rowid ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn count_group_members(&self, group_id: Uuid) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cohort_group_members WHERE group_id = ?")
                .bind(group_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn count_group_members_by_gender(&self, group_id: Uuid, gender: Gender) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM cohort_group_members gm
            JOIN members m ON m.id = gm.member_id
            WHERE gm.group_id = ? AND m.gender = ?
            "#,
        )
        .bind(group_id.to_string())
        .bind(gender.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn count_groups_for_week(&self, week: CohortWeek, group_type: GroupType) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cohort_groups WHERE status = 'active' AND match_week = ? AND group_type = ?",
        )
        .bind(week.anchor_date())
        .bind(group_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn create_group(
        &self,
        week: CohortWeek,
        group_type: GroupType,
        composition: GenderComposition,
    ) -> Result<Group> {
        let group = Group {
            id: Uuid::new_v4(),
            match_week: week,
            group_type,
            gender_composition: composition,
            status: GroupStatus::Active,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO cohort_groups (id, match_week, group_type, gender_composition, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(group.id.to_string())
        .bind(week.anchor_date())
        .bind(group_type.as_str())
        .bind(composition.as_str())
        .bind(group.status.as_str())
        .bind(group.created_at)
        .execute(&self.pool)
        .await?;

        Ok(group)
    }

    async fn find_active_membership(
        &self,
        week: CohortWeek,
        member_id: Uuid,
    ) -> Result<Option<GroupMembership>> {
        let row = sqlx::query(
            r#"
            SELECT gm.group_id, gm.member_id, gm.joined_at
            FROM cohort_group_members gm
            JOIN cohort_groups g ON g.id = gm.group_id
            WHERE gm.member_id = ? AND g.status = 'active' AND g.match_week = ?
            ORDER BY gm.joined_at ASC, gm.rowid ASC
            LIMIT 1
            "#,
        )
        .bind(member_id.to_string())
        .bind(week.anchor_date())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(membership_from_row).transpose()
    }

    async fn add_group_member(
        &self,
        group_id: Uuid,
        member_id: Uuid,
        capacity: usize,
    ) -> Result<AddMemberOutcome> {
        // Single statement: SQLite serializes writers, so two allocators
        // cannot both take the last seat or seat one member twice in a week.
        let result = sqlx::query(
            r#"
            INSERT INTO cohort_group_members (group_id, member_id, joined_at)
            SELECT ?, ?, ?
            WHERE (SELECT COUNT(*) FROM cohort_group_members WHERE group_id = ?) < ?
              AND NOT EXISTS (
                  SELECT 1 FROM cohort_group_members gm
                  JOIN cohort_groups g ON g.id = gm.group_id
                  WHERE gm.member_id = ?
                    AND g.status = 'active'
                    AND g.match_week = (SELECT match_week FROM cohort_groups WHERE id = ?)
              )
            ON CONFLICT(group_id, member_id) DO NOTHING
            "#,
        )
        .bind(group_id.to_string())
        .bind(member_id.to_string())
        .bind(Utc::now())
        .bind(group_id.to_string())
        .bind(capacity as i64)
        .bind(member_id.to_string())
        .bind(group_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(AddMemberOutcome::Added);
        }

        let seated: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM cohort_group_members gm
                JOIN cohort_groups g ON g.id = gm.group_id
                WHERE gm.member_id = ?
                  AND (
                      gm.group_id = ?
                      OR (
                          g.status = 'active'
                          AND g.match_week = (SELECT match_week FROM cohort_groups WHERE id = ?)
                      )
                  )
            )
            "#,
        )
        .bind(member_id.to_string())
        .bind(group_id.to_string())
        .bind(group_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(if seated {
            AddMemberOutcome::Duplicate
        } else {
            AddMemberOutcome::Full
        })
    }

    async fn list_eligible_members(&self, week: CohortWeek) -> Result<Vec<Member>> {
        let sql = format!(
            r#"
            SELECT {} FROM members m
            WHERE m.active = 1
              AND EXISTS (
                  SELECT 1 FROM matches x
                  WHERE x.status = 'accepted' AND (x.subject_id = m.id OR x.object_id = m.id)
              )
              AND NOT EXISTS (
                  SELECT 1 FROM cohort_group_members gm
                  JOIN cohort_groups g ON g.id = gm.group_id
                  WHERE gm.member_id = m.id AND g.status = 'active' AND g.match_week = ?
              )
            ORDER BY m.id
            "#,
            MEMBER_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(week.anchor_date())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(member_from_row).collect()
    }

    async fn close_groups_before(&self, week: CohortWeek) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE cohort_groups SET status = 'closed' WHERE status = 'active' AND match_week < ?",
        )
        .bind(week.anchor_date())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
