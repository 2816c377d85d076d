//! Timestamp and cohort week utilities
//!
//! A cohort week is keyed by its anchor date: the most recent occurrence of the
//! configured matching weekday, counting today. All derivation is done in UTC.

use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a weekday setting value ("monday", "Mon", "thu", ...)
pub fn parse_weekday(value: &str) -> Result<Weekday> {
    value
        .trim()
        .parse::<Weekday>()
        .map_err(|_| Error::InvalidInput(format!("not a weekday: '{}'", value)))
}

/// Weekly cohort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CohortWeek(NaiveDate);

impl CohortWeek {
    /// Cohort week that `date` falls into for the given anchor weekday
    pub fn containing(date: NaiveDate, anchor: Weekday) -> Self {
        let days_back = (7 + date.weekday().num_days_from_monday()
            - anchor.num_days_from_monday())
            % 7;
        Self(date - Duration::days(i64::from(days_back)))
    }

    /// Cohort week for the current wall-clock date
    pub fn current(anchor: Weekday) -> Self {
        Self::containing(now().date_naive(), anchor)
    }

    /// Build from a stored anchor date
    pub fn from_anchor(anchor_date: NaiveDate) -> Self {
        Self(anchor_date)
    }

    /// The anchor date itself (this week's matching date)
    pub fn anchor_date(&self) -> NaiveDate {
        self.0
    }

    /// Storage key, `YYYY-MM-DD`
    pub fn key(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// The cohort week immediately before this one
    pub fn previous(&self) -> Self {
        Self(self.0 - Duration::days(7))
    }
}

impl fmt::Display for CohortWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
