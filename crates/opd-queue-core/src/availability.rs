//! Token numbering and booking availability.
//!
//! Pure queries over the token store and leave records; nothing here
//! mutates state.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::db::{Database, DbResult};

/// Why a date cannot accept bookings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    PastDate,
    Weekend,
    OnLeave,
    CapacityFull,
}

impl UnavailableReason {
    /// Patient-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            UnavailableReason::PastDate => "Cannot book for past dates",
            UnavailableReason::Weekend => "Clinic is closed on weekends",
            UnavailableReason::OnLeave => "Doctor is on leave on this date",
            UnavailableReason::CapacityFull => "All tokens for this date are booked",
        }
    }
}

/// Outcome of an availability check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub reason: Option<UnavailableReason>,
    /// Remaining bookable tokens when available
    pub remaining: Option<u32>,
}

impl Availability {
    fn closed(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            remaining: None,
        }
    }

    fn open(remaining: u32) -> Self {
        Self {
            available: true,
            reason: None,
            remaining: Some(remaining),
        }
    }
}

/// Next token number for a date: `1 + max` over all statuses, or 1.
///
/// Numbers are never reused, even after cancellation.
pub fn next_token_number(db: &Database, date: NaiveDate) -> DbResult<u32> {
    Ok(db.max_token_number(date)?.map_or(1, |max| max + 1))
}

/// Whether `date` can accept a new booking, seen from `today`.
///
/// Checks run in fixed order: past date, non-working weekday, planned
/// leave, daily capacity. Capacity counts waiting + served tokens.
pub fn check_availability(
    db: &Database,
    config: &QueueConfig,
    date: NaiveDate,
    today: NaiveDate,
) -> DbResult<Availability> {
    if date < today {
        return Ok(Availability::closed(UnavailableReason::PastDate));
    }

    if !config.is_working_day(date.weekday()) {
        return Ok(Availability::closed(UnavailableReason::Weekend));
    }

    if db.get_leave_by_date(date)?.is_some() {
        return Ok(Availability::closed(UnavailableReason::OnLeave));
    }

    let booked = db.booked_count(date)?;
    if booked >= config.max_tokens_per_day {
        return Ok(Availability::closed(UnavailableReason::CapacityFull));
    }

    Ok(Availability::open(config.max_tokens_per_day - booked))
}
