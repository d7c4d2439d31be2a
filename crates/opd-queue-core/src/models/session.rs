//! OPD session models.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Status of a doctor's daily session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Paused,
    Ended,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Ended => "ended",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Which shift the session covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Shift {
    Morning,
    Evening,
    FullDay,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Morning => "morning",
            Shift::Evening => "evening",
            Shift::FullDay => "full-day",
        }
    }
}

impl Default for Shift {
    fn default() -> Self {
        Shift::Morning
    }
}

/// A doctor's working session for one calendar date.
///
/// One row per date. Rollup counts stay zero until `end` snapshots them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub date: NaiveDate,
    pub shift: Shift,
    pub status: SessionStatus,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub paused_at: Option<String>,
    /// Cumulative operator-applied delay, added to every ETA for the day
    pub delay_minutes: i64,
    pub total_patients: u32,
    pub served_patients: u32,
    pub skipped_patients: u32,
    pub cancelled_patients: u32,
    /// Average actual wait in minutes, snapshotted at end
    pub avg_wait_time: i64,
    pub notes: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    /// Create a fresh scheduled session for a date.
    pub fn new(date: NaiveDate, shift: Shift) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            shift,
            status: SessionStatus::Scheduled,
            start_time: None,
            end_time: None,
            paused_at: None,
            delay_minutes: 0,
            total_patients: 0,
            served_patients: 0,
            skipped_patients: 0,
            cancelled_patients: 0,
            avg_wait_time: 0,
            notes: String::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Working time elapsed since the session started, as of `now`.
    ///
    /// Pure function of `start_time` and `paused_at`; there is no ticking
    /// counter anywhere. A paused session stops accruing at `paused_at`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let start = match parse_instant(self.start_time.as_deref()) {
            Some(t) => t,
            None => return Duration::zero(),
        };
        let until = match self.status {
            SessionStatus::Paused => parse_instant(self.paused_at.as_deref()).unwrap_or(now),
            SessionStatus::Ended | SessionStatus::Cancelled => {
                parse_instant(self.end_time.as_deref()).unwrap_or(now)
            }
            _ => now,
        };
        (until - start).max(Duration::zero())
    }
}

fn parse_instant(s: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Read-only aggregate counts for one date's queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayStats {
    pub total_patients: u32,
    pub waiting_patients: u32,
    pub served_patients: u32,
    pub skipped_patients: u32,
    pub cancelled_patients: u32,
    /// Average actual wait among served tokens, minutes
    pub avg_wait_time: i64,
    /// Remaining bookable tokens for the date
    pub available_tokens: u32,
}
