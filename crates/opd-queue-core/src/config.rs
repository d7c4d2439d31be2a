//! Queue configuration.

use chrono::Weekday;
use std::time::Duration;

/// Tunable knobs for the queue. `Default` matches the clinic's production
/// constants; tests override individual fields.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Daily booking capacity (waiting + served count against it)
    pub max_tokens_per_day: u32,
    /// Assumed consultation length when no patient has been served yet
    pub per_patient_minutes: i64,
    /// Replace the per-patient constant with the day's served average
    /// once at least one patient has been served
    pub use_rolling_average: bool,
    /// How many upcoming waiting tokens a queue snapshot carries
    pub upcoming_limit: usize,
    /// Weekdays the clinic does not operate
    pub closed_weekdays: Vec<Weekday>,
    /// How long a mutation waits for a date's lock before giving up
    pub lock_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_day: 30,
            per_patient_minutes: 10,
            use_rolling_average: true,
            upcoming_limit: 10,
            closed_weekdays: vec![Weekday::Sat, Weekday::Sun],
            lock_timeout: Duration::from_millis(500),
        }
    }
}

impl QueueConfig {
    /// Whether the clinic operates on this weekday.
    pub fn is_working_day(&self, weekday: Weekday) -> bool {
        !self.closed_weekdays.contains(&weekday)
    }
}
