//! Database models
//!
//! Enumerations are stored as their snake_case text form.

use crate::time::CohortWeek;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Member gender as supplied by the member directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl FromStr for Gender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            other => Err(Error::InvalidInput(format!("unknown gender '{}'", other))),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active member read from the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub gender: Gender,
    pub city: Option<String>,
    /// Opaque profile attributes, only meaningful to the scorer
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Member {
    pub fn new(id: Uuid, gender: Gender) -> Self {
        Self {
            id,
            gender,
            city: None,
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }
}

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Accepted => "accepted",
            MatchStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MatchStatus::Pending),
            "accepted" => Ok(MatchStatus::Accepted),
            "rejected" => Ok(MatchStatus::Rejected),
            other => Err(Error::InvalidInput(format!("unknown match status '{}'", other))),
        }
    }
}

/// Direction-agnostic key for an unordered member pair
///
/// Both `pair_key(a, b)` and `pair_key(b, a)` yield `"<lower>:<higher>"`.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", low, high)
}

/// Scored member pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub object_id: Uuid,
    pub compatibility_score: f64,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    /// New pending match between two members
    pub fn pending(subject_id: Uuid, object_id: Uuid, compatibility_score: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            object_id,
            compatibility_score,
            status: MatchStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn pair_key(&self) -> String {
        pair_key(self.subject_id, self.object_id)
    }

    /// True if this record covers the unordered pair {a, b}
    pub fn covers(&self, a: Uuid, b: Uuid) -> bool {
        (self.subject_id == a && self.object_id == b)
            || (self.subject_id == b && self.object_id == a)
    }
}

/// Kind of weekly group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    SameGender,
    Mixed,
}

impl GroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::SameGender => "same_gender",
            GroupType::Mixed => "mixed",
        }
    }
}

impl FromStr for GroupType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "same_gender" => Ok(GroupType::SameGender),
            "mixed" => Ok(GroupType::Mixed),
            other => Err(Error::InvalidInput(format!("unknown group type '{}'", other))),
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target gender composition label of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderComposition {
    AllFemale,
    AllMale,
    #[serde(rename = "ratio_2f_3m")]
    Ratio2f3m,
    #[serde(rename = "ratio_3f_2m")]
    Ratio3f2m,
}

impl GenderComposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenderComposition::AllFemale => "all_female",
            GenderComposition::AllMale => "all_male",
            GenderComposition::Ratio2f3m => "ratio_2f_3m",
            GenderComposition::Ratio3f2m => "ratio_3f_2m",
        }
    }

    /// Same-gender composition for a member of `gender`
    pub fn same_gender(gender: Gender) -> Self {
        match gender {
            Gender::Female => GenderComposition::AllFemale,
            Gender::Male => GenderComposition::AllMale,
        }
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self, GenderComposition::Ratio2f3m | GenderComposition::Ratio3f2m)
    }

    /// Number of seats the label reserves for `gender` in a group of `capacity`
    ///
    /// Mixed labels split 2:3, rounding the minority share to the nearest
    /// seat; the two shares always add up to `capacity`.
    pub fn seats_for(&self, gender: Gender, capacity: usize) -> usize {
        let minority = (2 * capacity + 2) / 5;
        match (self, gender) {
            (GenderComposition::AllFemale, Gender::Female) => capacity,
            (GenderComposition::AllMale, Gender::Male) => capacity,
            (GenderComposition::AllFemale, Gender::Male) => 0,
            (GenderComposition::AllMale, Gender::Female) => 0,
            (GenderComposition::Ratio2f3m, Gender::Female) => minority,
            (GenderComposition::Ratio2f3m, Gender::Male) => capacity - minority,
            (GenderComposition::Ratio3f2m, Gender::Female) => capacity - minority,
            (GenderComposition::Ratio3f2m, Gender::Male) => minority,
        }
    }
}

impl FromStr for GenderComposition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all_female" => Ok(GenderComposition::AllFemale),
            "all_male" => Ok(GenderComposition::AllMale),
            "ratio_2f_3m" => Ok(GenderComposition::Ratio2f3m),
            "ratio_3f_2m" => Ok(GenderComposition::Ratio3f2m),
            other => Err(Error::InvalidInput(format!("unknown gender composition '{}'", other))),
        }
    }
}

impl fmt::Display for GenderComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Closed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Active => "active",
            GroupStatus::Closed => "closed",
        }
    }
}

impl FromStr for GroupStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(GroupStatus::Active),
            "closed" => Ok(GroupStatus::Closed),
            other => Err(Error::InvalidInput(format!("unknown group status '{}'", other))),
        }
    }
}

/// Weekly cohort group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub match_week: CohortWeek,
    pub group_type: GroupType,
    pub gender_composition: GenderComposition,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
}

/// A member's seat in a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: Uuid,
    pub member_id: Uuid,
    pub joined_at: DateTime<Utc>,
}
