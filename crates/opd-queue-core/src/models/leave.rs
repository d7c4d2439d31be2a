//! Clinic leave (closure) models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Whether the closure was planned ahead or declared on the day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LeaveKind {
    /// Blocks new bookings for the date
    Planned,
    /// Also force-cancels the day's waiting tokens
    Emergency,
}

impl LeaveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveKind::Planned => "planned",
            LeaveKind::Emergency => "emergency",
        }
    }
}

/// A calendar date on which the clinic does not operate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Leave {
    pub id: String,
    pub date: NaiveDate,
    pub reason: String,
    pub kind: LeaveKind,
    pub notes: Option<String>,
    pub created_at: String,
}

impl Leave {
    pub fn new(date: NaiveDate, reason: String, kind: LeaveKind, notes: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            reason,
            kind,
            notes,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
