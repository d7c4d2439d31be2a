//! Session controller: the doctor's daily working session, leaves, and
//! end-of-day statistics.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::config::QueueConfig;
use crate::db::{Database, DbError};
use crate::models::{
    DayStats, Leave, LeaveKind, Session, SessionStatus, Shift, Token, TokenStatus,
};
use crate::queue::QueueEngine;

/// Session and leave errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("No session for {0}")]
    NotFound(NaiveDate),

    #[error("Cannot {action} session for {date}: status is {current}", current = .current.as_str())]
    InvalidTransition {
        date: NaiveDate,
        current: SessionStatus,
        action: &'static str,
    },

    #[error("Invalid input: {0}")]
    Validation(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Controller over one date's session and leave records.
pub struct SessionController<'a> {
    db: &'a Database,
}

impl<'a> SessionController<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Start the date's session, creating it if absent, resuming if paused.
    pub fn start(&self, date: NaiveDate, shift: Shift, now: DateTime<Utc>) -> SessionResult<Session> {
        match self.db.get_session_by_date(date)? {
            None => {
                let mut session = Session::new(date, shift);
                session.status = SessionStatus::Active;
                session.start_time = Some(now.to_rfc3339());
                session.updated_at = now.to_rfc3339();
                self.db.insert_session(&session)?;
                tracing::info!(%date, shift = shift.as_str(), "session started");
                Ok(session)
            }
            Some(mut session) => {
                if matches!(
                    session.status,
                    SessionStatus::Ended | SessionStatus::Cancelled
                ) {
                    return Err(SessionError::InvalidTransition {
                        date,
                        current: session.status,
                        action: "start",
                    });
                }
                let resuming = session.status == SessionStatus::Paused;
                if !resuming {
                    session.start_time = Some(now.to_rfc3339());
                }
                session.status = SessionStatus::Active;
                session.paused_at = None;
                session.updated_at = now.to_rfc3339();
                self.db.update_session(&session)?;
                tracing::info!(%date, resuming, "session active");
                Ok(session)
            }
        }
    }

    /// Pause an active session.
    pub fn pause(&self, date: NaiveDate, now: DateTime<Utc>) -> SessionResult<Session> {
        let mut session = self.require(date)?;
        if session.status != SessionStatus::Active {
            return Err(SessionError::InvalidTransition {
                date,
                current: session.status,
                action: "pause",
            });
        }
        session.status = SessionStatus::Paused;
        session.paused_at = Some(now.to_rfc3339());
        session.updated_at = now.to_rfc3339();
        self.db.update_session(&session)?;
        tracing::info!(%date, "session paused");
        Ok(session)
    }

    /// End the session: cancel remaining waiting tokens, snapshot the
    /// day's rollup counts, then mark ended.
    ///
    /// Returns the session and the tokens cancelled on the way out, so the
    /// caller can hand them to the notifier.
    pub fn end(
        &self,
        date: NaiveDate,
        config: &QueueConfig,
        now: DateTime<Utc>,
    ) -> SessionResult<(Session, Vec<Token>)> {
        let mut session = self.require(date)?;
        if !matches!(session.status, SessionStatus::Active | SessionStatus::Paused) {
            return Err(SessionError::InvalidTransition {
                date,
                current: session.status,
                action: "end",
            });
        }

        let leftover = self.cancel_waiting(date, "session ended", now)?;

        let stats = self.day_stats(date, config)?;
        session.total_patients = stats.total_patients;
        session.served_patients = stats.served_patients;
        session.skipped_patients = stats.skipped_patients;
        session.cancelled_patients = stats.cancelled_patients;
        session.avg_wait_time = stats.avg_wait_time;

        session.status = SessionStatus::Ended;
        session.end_time = Some(now.to_rfc3339());
        session.paused_at = None;
        session.updated_at = now.to_rfc3339();
        self.db.update_session(&session)?;
        tracing::info!(%date, cancelled = leftover.len(), "session ended");

        Ok((session, leftover))
    }

    /// Add operator delay minutes to the date's session (upserting it),
    /// returning the updated session. The caller recomputes ETAs.
    pub fn add_delay(
        &self,
        date: NaiveDate,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> SessionResult<Session> {
        if minutes <= 0 {
            return Err(SessionError::Validation(
                "Delay must be a positive number of minutes".into(),
            ));
        }

        let mut session = match self.db.get_session_by_date(date)? {
            Some(session) => session,
            None => {
                let session = Session::new(date, Shift::default());
                self.db.insert_session(&session)?;
                session
            }
        };
        session.delay_minutes += minutes;
        session.updated_at = now.to_rfc3339();
        self.db.update_session(&session)?;
        tracing::info!(%date, minutes, total = session.delay_minutes, "delay added");
        Ok(session)
    }

    /// Cumulative delay for a date; zero when no session exists.
    pub fn delay_minutes(&self, date: NaiveDate) -> SessionResult<i64> {
        Ok(self
            .db
            .get_session_by_date(date)?
            .map_or(0, |s| s.delay_minutes))
    }

    /// Schedule a planned leave. At most one leave per date.
    pub fn schedule_leave(
        &self,
        date: NaiveDate,
        reason: &str,
        notes: Option<String>,
    ) -> SessionResult<Leave> {
        if self.db.get_leave_by_date(date)?.is_some() {
            return Err(SessionError::Validation(
                "Leave already scheduled for this date".into(),
            ));
        }
        let leave = Leave::new(date, reason.to_string(), LeaveKind::Planned, notes);
        self.db.insert_leave(&leave)?;
        tracing::info!(%date, %reason, "leave scheduled");
        Ok(leave)
    }

    /// Declare an emergency closure for `date`: force-cancel every waiting
    /// token, record an emergency leave, and cancel the session.
    ///
    /// Idempotent: a second call cancels zero additional tokens and reuses
    /// the existing leave record.
    pub fn emergency_leave(
        &self,
        date: NaiveDate,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<(Leave, Vec<Token>)> {
        let cancelled = self.cancel_waiting(date, "emergency leave", now)?;

        let leave = match self.db.get_leave_by_date(date)? {
            Some(existing) => existing,
            None => {
                let leave = Leave::new(date, reason.to_string(), LeaveKind::Emergency, None);
                self.db.insert_leave(&leave)?;
                leave
            }
        };

        if let Some(mut session) = self.db.get_session_by_date(date)? {
            if session.status != SessionStatus::Ended {
                session.status = SessionStatus::Cancelled;
                session.end_time = Some(now.to_rfc3339());
                session.updated_at = now.to_rfc3339();
                self.db.update_session(&session)?;
            }
        }

        tracing::info!(%date, %reason, cancelled = cancelled.len(), "emergency leave");
        Ok((leave, cancelled))
    }

    /// Read-only aggregates for one date's queue.
    pub fn day_stats(&self, date: NaiveDate, config: &QueueConfig) -> SessionResult<DayStats> {
        let waiting = self.db.count_with_status(date, TokenStatus::Waiting)?;
        let called = self.db.count_with_status(date, TokenStatus::Called)?;
        let served = self.db.count_with_status(date, TokenStatus::Served)?;
        let skipped = self.db.count_with_status(date, TokenStatus::Skipped)?;
        let cancelled = self.db.count_with_status(date, TokenStatus::Cancelled)?;

        let booked = self.db.booked_count(date)?;
        Ok(DayStats {
            total_patients: waiting + called + served + skipped + cancelled,
            waiting_patients: waiting + called,
            served_patients: served,
            skipped_patients: skipped,
            cancelled_patients: cancelled,
            avg_wait_time: self
                .db
                .avg_served_wait(date)?
                .map_or(0, |avg| avg.round() as i64),
            available_tokens: config.max_tokens_per_day.saturating_sub(booked),
        })
    }

    /// Cancel every waiting token for a date through the state machine's
    /// forced path, collecting the cancelled tokens.
    fn cancel_waiting(
        &self,
        date: NaiveDate,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<Vec<Token>> {
        let engine = QueueEngine::new(self.db);
        let waiting = self.db.list_waiting_tokens(date)?;
        let mut cancelled = Vec::with_capacity(waiting.len());
        for token in waiting {
            match engine.cancel(&token.id, reason, true, now) {
                Ok(token) => cancelled.push(token),
                Err(err) => {
                    // A token mutated underneath us is not fatal to the sweep
                    tracing::warn!(token = token.token_number, %err, "bulk cancel skipped token");
                }
            }
        }
        Ok(cancelled)
    }

    fn require(&self, date: NaiveDate) -> SessionResult<Session> {
        self.db
            .get_session_by_date(date)?
            .ok_or(SessionError::NotFound(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingRequest, NotificationPrefs};
    use chrono::TimeZone;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn book(db: &Database, number: u32) -> Token {
        let token = Token::new(
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
        db.insert_token(&token).unwrap();
        token
    }

    #[test]
    fn test_start_creates_active_session() {
        let db = setup_db();
        let controller = SessionController::new(&db);

        let session = controller.start(date(), Shift::Morning, now()).unwrap();
        assert!(matches!(session.status, SessionStatus::Active));
        assert!(session.start_time.is_some());
    }

    #[test]
    fn test_start_resumes_paused_session() {
        let db = setup_db();
        let controller = SessionController::new(&db);

        let started = controller.start(date(), Shift::Morning, now()).unwrap();
        controller
            .pause(date(), now() + chrono::Duration::minutes(30))
            .unwrap();
        let resumed = controller
            .start(date(), Shift::Morning, now() + chrono::Duration::hours(1))
            .unwrap();

        assert!(matches!(resumed.status, SessionStatus::Active));
        assert!(resumed.paused_at.is_none());
        // Resume keeps the original start time
        assert_eq!(resumed.start_time, started.start_time);
    }

    #[test]
    fn test_pause_requires_active() {
        let db = setup_db();
        let controller = SessionController::new(&db);

        assert!(matches!(
            controller.pause(date(), now()),
            Err(SessionError::NotFound(_))
        ));

        controller.start(date(), Shift::Morning, now()).unwrap();
        controller.pause(date(), now()).unwrap();
        let again = controller.pause(date(), now());
        assert!(matches!(
            again,
            Err(SessionError::InvalidTransition { action: "pause", .. })
        ));
    }

    #[test]
    fn test_end_snapshots_rollups_and_cancels_waiting() {
        let db = setup_db();
        let config = QueueConfig::default();
        let controller = SessionController::new(&db);
        let engine = QueueEngine::new(&db);

        controller.start(date(), Shift::Morning, now()).unwrap();
        let first = book(&db, 1);
        book(&db, 2);
        book(&db, 3);

        engine.serve(&first.id, now()).unwrap();

        let (session, leftover) = controller.end(date(), &config, now()).unwrap();
        assert!(matches!(session.status, SessionStatus::Ended));
        assert_eq!(session.served_patients, 1);
        assert_eq!(session.cancelled_patients, 2);
        assert_eq!(session.total_patients, 3);

        assert_eq!(leftover.len(), 2);
        assert!(leftover
            .iter()
            .all(|t| t.cancellation_reason.as_deref() == Some("session ended")));

        // Ended sessions cannot be restarted
        assert!(matches!(
            controller.start(date(), Shift::Morning, now()),
            Err(SessionError::InvalidTransition { action: "start", .. })
        ));
    }

    #[test]
    fn test_add_delay_accumulates() {
        let db = setup_db();
        let controller = SessionController::new(&db);

        assert!(matches!(
            controller.add_delay(date(), 0, now()),
            Err(SessionError::Validation(_))
        ));

        controller.add_delay(date(), 15, now()).unwrap();
        let session = controller.add_delay(date(), 10, now()).unwrap();
        assert_eq!(session.delay_minutes, 25);
        assert_eq!(controller.delay_minutes(date()).unwrap(), 25);
    }

    #[test]
    fn test_schedule_leave_rejects_duplicate() {
        let db = setup_db();
        let controller = SessionController::new(&db);

        controller
            .schedule_leave(date(), "conference", None)
            .unwrap();
        let dup = controller.schedule_leave(date(), "other", None);
        assert!(matches!(dup, Err(SessionError::Validation(_))));
    }

    #[test]
    fn test_emergency_leave_idempotent() {
        let db = setup_db();
        let controller = SessionController::new(&db);

        controller.start(date(), Shift::Morning, now()).unwrap();
        book(&db, 1);
        book(&db, 2);

        let (leave, cancelled) = controller
            .emergency_leave(date(), "doctor unwell", now())
            .unwrap();
        assert!(matches!(leave.kind, LeaveKind::Emergency));
        assert_eq!(cancelled.len(), 2);

        let session = db.get_session_by_date(date()).unwrap().unwrap();
        assert!(matches!(session.status, SessionStatus::Cancelled));

        // Second call cancels nothing new and reuses the leave
        let (leave_again, cancelled_again) = controller
            .emergency_leave(date(), "doctor unwell", now())
            .unwrap();
        assert_eq!(leave_again.id, leave.id);
        assert!(cancelled_again.is_empty());
    }

    #[test]
    fn test_day_stats_counts() {
        let db = setup_db();
        let config = QueueConfig::default();
        let controller = SessionController::new(&db);
        let engine = QueueEngine::new(&db);

        let first = book(&db, 1);
        book(&db, 2);
        let third = book(&db, 3);

        engine.serve(&first.id, now()).unwrap();
        engine
            .cancel(&third.id, "changed plans", false, now())
            .unwrap();

        let stats = controller.day_stats(date(), &config).unwrap();
        assert_eq!(stats.total_patients, 3);
        assert_eq!(stats.waiting_patients, 1);
        assert_eq!(stats.served_patients, 1);
        assert_eq!(stats.cancelled_patients, 1);
        assert_eq!(stats.available_tokens, 28);
    }
}
