//! Estimated-wait-time computation.
//!
//! Every function takes `now` explicitly: for a fixed store snapshot and a
//! fixed `now` the results are deterministic, and `recompute_all` can be
//! re-run without drift.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::QueueConfig;
use crate::db::{Database, DbResult};
use crate::models::Token;

/// Display format for estimates stored on tokens.
const ESTIMATE_FORMAT: &str = "%H:%M";

/// Waiting tokens ahead of `token` on its booking date.
pub fn wait_ahead(db: &Database, token: &Token) -> DbResult<u32> {
    db.count_waiting_before(token.booking_date, token.token_number)
}

/// Minutes to assume per consultation for a date.
///
/// Defaults to the configured constant; once the day has at least one
/// served token the rolling average of actual waits takes over.
pub fn per_patient_minutes(db: &Database, config: &QueueConfig, date: NaiveDate) -> DbResult<i64> {
    if config.use_rolling_average {
        if let Some(avg) = db.avg_served_wait(date)? {
            return Ok((avg.round() as i64).max(1));
        }
    }
    Ok(config.per_patient_minutes)
}

/// When a token at queue position `position` should be served.
pub fn estimated_serve_time(
    position: u32,
    per_patient: i64,
    delay_minutes: i64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    now + Duration::minutes(position as i64 * per_patient + delay_minutes)
}

/// Render an estimate as the stored display string.
pub fn format_estimate(time: DateTime<Utc>) -> String {
    time.format(ESTIMATE_FORMAT).to_string()
}

/// Re-derive and persist `estimated_time` for every waiting token of a
/// date, in ascending token-number order. Returns how many were updated.
///
/// Idempotent for a fixed `now`: re-running without intervening mutations
/// writes identical values.
pub fn recompute_all(
    db: &Database,
    config: &QueueConfig,
    date: NaiveDate,
    delay_minutes: i64,
    now: DateTime<Utc>,
) -> DbResult<usize> {
    let per_patient = per_patient_minutes(db, config, date)?;
    let waiting = db.list_waiting_tokens(date)?;
    let updated_at = now.to_rfc3339();

    for (position, token) in waiting.iter().enumerate() {
        let estimate = estimated_serve_time(position as u32, per_patient, delay_minutes, now);
        db.set_estimated_time(&token.id, &format_estimate(estimate), &updated_at)?;
    }

    Ok(waiting.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingRequest, NotificationPrefs, TokenStatus};
    use chrono::TimeZone;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn insert_token(db: &Database, number: u32, status: TokenStatus) -> Token {
        let mut token = Token::new(
            number,
            &BookingRequest {
                patient_name: format!("Patient {}", number),
                patient_phone: "9876543210".into(),
                patient_age: 30,
                patient_gender: Default::default(),
                booking_date: date(),
                symptoms: String::new(),
                notifications: NotificationPrefs::default(),
            },
        );
        token.status = status;
        db.insert_token(&token).unwrap();
        token
    }

    #[test]
    fn test_estimated_serve_time_arithmetic() {
        let now = fixed_now();
        assert_eq!(estimated_serve_time(0, 10, 0, now), now);
        assert_eq!(
            estimated_serve_time(3, 10, 0, now),
            now + Duration::minutes(30)
        );
        assert_eq!(
            estimated_serve_time(2, 10, 15, now),
            now + Duration::minutes(35)
        );
    }

    #[test]
    fn test_wait_ahead_counts_only_smaller_waiting() {
        let db = setup_db();
        insert_token(&db, 1, TokenStatus::Served);
        insert_token(&db, 2, TokenStatus::Waiting);
        insert_token(&db, 3, TokenStatus::Cancelled);
        let fourth = insert_token(&db, 4, TokenStatus::Waiting);

        assert_eq!(wait_ahead(&db, &fourth).unwrap(), 1);
    }

    #[test]
    fn test_per_patient_falls_back_to_default() {
        let db = setup_db();
        let config = QueueConfig::default();
        assert_eq!(per_patient_minutes(&db, &config, date()).unwrap(), 10);
    }

    #[test]
    fn test_per_patient_uses_served_average() {
        let db = setup_db();
        let config = QueueConfig::default();

        for (n, wait) in [(1, 6), (2, 8)] {
            let mut token = insert_token(&db, n, TokenStatus::Waiting);
            token.status = TokenStatus::Served;
            token.actual_wait_time = Some(wait);
            db.update_token(&token).unwrap();
        }

        assert_eq!(per_patient_minutes(&db, &config, date()).unwrap(), 7);
    }

    #[test]
    fn test_per_patient_rolling_average_disabled() {
        let db = setup_db();
        let config = QueueConfig {
            use_rolling_average: false,
            ..Default::default()
        };

        let mut token = insert_token(&db, 1, TokenStatus::Waiting);
        token.status = TokenStatus::Served;
        token.actual_wait_time = Some(25);
        db.update_token(&token).unwrap();

        assert_eq!(per_patient_minutes(&db, &config, date()).unwrap(), 10);
    }

    #[test]
    fn test_recompute_all_ascending_positions() {
        let db = setup_db();
        let config = QueueConfig::default();
        let first = insert_token(&db, 1, TokenStatus::Waiting);
        let second = insert_token(&db, 2, TokenStatus::Waiting);

        let updated = recompute_all(&db, &config, date(), 0, fixed_now()).unwrap();
        assert_eq!(updated, 2);

        let first = db.get_token(&first.id).unwrap().unwrap();
        let second = db.get_token(&second.id).unwrap().unwrap();
        assert_eq!(first.estimated_time, "09:00");
        assert_eq!(second.estimated_time, "09:10");
    }

    #[test]
    fn test_recompute_all_idempotent() {
        let db = setup_db();
        let config = QueueConfig::default();
        for n in 1..=3 {
            insert_token(&db, n, TokenStatus::Waiting);
        }

        recompute_all(&db, &config, date(), 5, fixed_now()).unwrap();
        let first_pass: Vec<String> = db
            .list_waiting_tokens(date())
            .unwrap()
            .into_iter()
            .map(|t| t.estimated_time)
            .collect();

        recompute_all(&db, &config, date(), 5, fixed_now()).unwrap();
        let second_pass: Vec<String> = db
            .list_waiting_tokens(date())
            .unwrap()
            .into_iter()
            .map(|t| t.estimated_time)
            .collect();

        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_recompute_skips_non_waiting() {
        let db = setup_db();
        let config = QueueConfig::default();
        let mut served = insert_token(&db, 1, TokenStatus::Served);
        served.estimated_time = "08:30".into();
        db.update_token(&served).unwrap();
        insert_token(&db, 2, TokenStatus::Waiting);

        recompute_all(&db, &config, date(), 0, fixed_now()).unwrap();

        // Served token's stored estimate is untouched
        let served = db.get_token(&served.id).unwrap().unwrap();
        assert_eq!(served.estimated_time, "08:30");
    }

    #[test]
    fn test_delay_shifts_estimates_exactly() {
        let db = setup_db();
        let config = QueueConfig::default();
        insert_token(&db, 1, TokenStatus::Waiting);
        insert_token(&db, 2, TokenStatus::Waiting);

        recompute_all(&db, &config, date(), 0, fixed_now()).unwrap();
        let before: Vec<String> = db
            .list_waiting_tokens(date())
            .unwrap()
            .into_iter()
            .map(|t| t.estimated_time)
            .collect();
        assert_eq!(before, vec!["09:00", "09:10"]);

        recompute_all(&db, &config, date(), 15, fixed_now()).unwrap();
        let after: Vec<String> = db
            .list_waiting_tokens(date())
            .unwrap()
            .into_iter()
            .map(|t| t.estimated_time)
            .collect();
        assert_eq!(after, vec!["09:15", "09:25"]);
    }
}
