//! Queue state machine.
//!
//! Legal transitions:
//!
//! ```text
//!            ┌──────── auto-revert ────────┐
//!            ▼                             │
//!   waiting ──── call ────► called ──── serve ────► served
//!      │                      │
//!      ├── skip ──► skipped ◄─┘ (skip while called)
//!      └── cancel ► cancelled
//! ```
//!
//! `served`, `skipped` and `cancelled` are terminal. At most one token per
//! date sits in `called`; calling another reverts the previous one to
//! `waiting`. The engine only mutates the store — broadcast and ETA
//! recomputation are orchestrated by the caller.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::db::{Database, DbError};
use crate::models::{Token, TokenStatus};

/// Queue transition errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Token not found: {0}")]
    NotFound(String),

    #[error("No patients waiting for {0}")]
    NoPatientsWaiting(NaiveDate),

    #[error("No patient is currently called for {0}")]
    NoCurrentPatient(NaiveDate),

    #[error("Cannot {action} token {id}: status is {current}", current = .current.as_str())]
    InvalidTransition {
        id: String,
        current: TokenStatus,
        action: &'static str,
    },
}

pub type QueueResult<T> = Result<T, QueueError>;

/// State machine over a date's tokens.
pub struct QueueEngine<'a> {
    db: &'a Database,
}

impl<'a> QueueEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Call the lowest-numbered waiting token for a date.
    ///
    /// Any previously called token reverts to waiting first, so the
    /// single-called-slot invariant holds across any call sequence.
    pub fn call_next(&self, date: NaiveDate, now: DateTime<Utc>) -> QueueResult<Token> {
        let next = self
            .db
            .first_waiting(date)?
            .ok_or(QueueError::NoPatientsWaiting(date))?;

        self.db.revert_called(date, &now.to_rfc3339())?;
        self.mark_called(next, now)
    }

    /// Call a specific waiting token out of order.
    pub fn call_specific(&self, id: &str, now: DateTime<Utc>) -> QueueResult<Token> {
        let token = self.get(id)?;
        if token.status != TokenStatus::Waiting {
            return Err(QueueError::InvalidTransition {
                id: token.id,
                current: token.status,
                action: "call",
            });
        }

        self.db.revert_called(token.booking_date, &now.to_rfc3339())?;
        self.mark_called(token, now)
    }

    /// Serve the currently called token for a date.
    pub fn serve_current(&self, date: NaiveDate, now: DateTime<Utc>) -> QueueResult<Token> {
        let current = self
            .db
            .current_called(date)?
            .ok_or(QueueError::NoCurrentPatient(date))?;
        self.mark_served(current, now)
    }

    /// Serve a specific token (waiting or called).
    pub fn serve(&self, id: &str, now: DateTime<Utc>) -> QueueResult<Token> {
        let token = self.get(id)?;
        if !matches!(token.status, TokenStatus::Waiting | TokenStatus::Called) {
            return Err(QueueError::InvalidTransition {
                id: token.id,
                current: token.status,
                action: "serve",
            });
        }
        self.mark_served(token, now)
    }

    /// Skip the currently called token for a date.
    pub fn skip_current(&self, date: NaiveDate, now: DateTime<Utc>) -> QueueResult<Token> {
        let current = self
            .db
            .current_called(date)?
            .ok_or(QueueError::NoCurrentPatient(date))?;
        self.mark_skipped(current, now)
    }

    /// Skip a specific token (waiting or called).
    pub fn skip(&self, id: &str, now: DateTime<Utc>) -> QueueResult<Token> {
        let token = self.get(id)?;
        if !matches!(token.status, TokenStatus::Waiting | TokenStatus::Called) {
            return Err(QueueError::InvalidTransition {
                id: token.id,
                current: token.status,
                action: "skip",
            });
        }
        self.mark_skipped(token, now)
    }

    /// Cancel a token.
    ///
    /// The patient path (`force = false`) only cancels waiting tokens. The
    /// operator emergency path (`force = true`) cancels any non-terminal
    /// token.
    pub fn cancel(
        &self,
        id: &str,
        reason: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> QueueResult<Token> {
        let mut token = self.get(id)?;
        let allowed = if force {
            !token.status.is_terminal()
        } else {
            token.status == TokenStatus::Waiting
        };
        if !allowed {
            return Err(QueueError::InvalidTransition {
                id: token.id,
                current: token.status,
                action: "cancel",
            });
        }

        token.status = TokenStatus::Cancelled;
        token.cancelled_at = Some(now.to_rfc3339());
        token.cancellation_reason = Some(reason.to_string());
        token.updated_at = now.to_rfc3339();
        self.db.update_token(&token)?;
        tracing::debug!(token = token.token_number, %reason, "token cancelled");
        Ok(token)
    }

    fn get(&self, id: &str) -> QueueResult<Token> {
        self.db
            .get_token(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    fn mark_called(&self, mut token: Token, now: DateTime<Utc>) -> QueueResult<Token> {
        token.status = TokenStatus::Called;
        token.called_at = Some(now.to_rfc3339());
        token.updated_at = now.to_rfc3339();
        self.db.update_token(&token)?;
        tracing::debug!(token = token.token_number, date = %token.booking_date, "token called");
        Ok(token)
    }

    fn mark_served(&self, mut token: Token, now: DateTime<Utc>) -> QueueResult<Token> {
        token.status = TokenStatus::Served;
        token.served_at = Some(now.to_rfc3339());
        // Wait time is fixed once, at serve time
        token.actual_wait_time = Some(
            token
                .created_instant()
                .map(|created| (now - created).num_minutes().max(0))
                .unwrap_or(0),
        );
        token.updated_at = now.to_rfc3339();
        self.db.update_token(&token)?;
        tracing::debug!(token = token.token_number, date = %token.booking_date, "token served");
        Ok(token)
    }

    fn mark_skipped(&self, mut token: Token, now: DateTime<Utc>) -> QueueResult<Token> {
        token.status = TokenStatus::Skipped;
        token.called_at = None;
        token.updated_at = now.to_rfc3339();
        self.db.update_token(&token)?;
        tracing::debug!(token = token.token_number, date = %token.booking_date, "token skipped");
        Ok(token)
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
    fn test_call_next_picks_lowest_number() {
        let db = setup_db();
        book(&db, 1);
        book(&db, 2);
        let engine = QueueEngine::new(&db);

        let called = engine.call_next(date(), now()).unwrap();
        assert_eq!(called.token_number, 1);
        assert!(matches!(called.status, TokenStatus::Called));
        assert!(called.called_at.is_some());
    }

    #[test]
    fn test_call_next_empty_queue() {
        let db = setup_db();
        let engine = QueueEngine::new(&db);
        let result = engine.call_next(date(), now());
        assert!(matches!(result, Err(QueueError::NoPatientsWaiting(_))));
    }

    #[test]
    fn test_single_called_slot() {
        let db = setup_db();
        let first = book(&db, 1);
        book(&db, 2);
        let third = book(&db, 3);
        let engine = QueueEngine::new(&db);

        engine.call_next(date(), now()).unwrap();
        engine.call_specific(&third.id, now()).unwrap();

        // Token 1 reverted to waiting; only token 3 is called
        let first = db.get_token(&first.id).unwrap().unwrap();
        assert!(matches!(first.status, TokenStatus::Waiting));
        assert!(first.called_at.is_none());

        let called: Vec<Token> = db
            .list_tokens_for_date(date())
            .unwrap()
            .into_iter()
            .filter(|t| t.status == TokenStatus::Called)
            .collect();
        assert_eq!(called.len(), 1);
        assert_eq!(called[0].token_number, 3);
    }

    #[test]
    fn test_call_specific_guards_waiting() {
        let db = setup_db();
        let token = book(&db, 1);
        let engine = QueueEngine::new(&db);

        engine.serve(&token.id, now()).unwrap();
        let result = engine.call_specific(&token.id, now());
        assert!(matches!(
            result,
            Err(QueueError::InvalidTransition {
                current: TokenStatus::Served,
                action: "call",
                ..
            })
        ));
    }

    #[test]
    fn test_serve_current_happy_path() {
        let db = setup_db();
        book(&db, 1);
        let engine = QueueEngine::new(&db);

        engine.call_next(date(), now()).unwrap();
        let served = engine
            .serve_current(date(), now() + chrono::Duration::minutes(5))
            .unwrap();
        assert!(matches!(served.status, TokenStatus::Served));
        assert!(served.served_at.is_some());
        assert!(served.actual_wait_time.unwrap() >= 0);
    }

    #[test]
    fn test_serve_current_requires_called() {
        let db = setup_db();
        book(&db, 1);
        let engine = QueueEngine::new(&db);
        let result = engine.serve_current(date(), now());
        assert!(matches!(result, Err(QueueError::NoCurrentPatient(_))));
    }

    #[test]
    fn test_served_is_terminal() {
        let db = setup_db();
        book(&db, 1);
        book(&db, 2);
        let engine = QueueEngine::new(&db);

        let first = engine.call_next(date(), now()).unwrap();
        engine.serve(&first.id, now()).unwrap();

        // Calling next must not revert the served token
        let second = engine.call_next(date(), now()).unwrap();
        assert_eq!(second.token_number, 2);

        let first = db.get_token(&first.id).unwrap().unwrap();
        assert!(matches!(first.status, TokenStatus::Served));
    }

    #[test]
    fn test_skip_clears_called_at() {
        let db = setup_db();
        book(&db, 1);
        let engine = QueueEngine::new(&db);

        engine.call_next(date(), now()).unwrap();
        let skipped = engine.skip_current(date(), now()).unwrap();
        assert!(matches!(skipped.status, TokenStatus::Skipped));
        assert!(skipped.called_at.is_none());
    }

    #[test]
    fn test_cancel_guard_and_force() {
        let db = setup_db();
        book(&db, 1);
        let engine = QueueEngine::new(&db);

        let called = engine.call_next(date(), now()).unwrap();

        // Patient path cannot cancel a called token
        let result = engine.cancel(&called.id, "changed my mind", false, now());
        assert!(matches!(
            result,
            Err(QueueError::InvalidTransition { action: "cancel", .. })
        ));

        // Operator path can
        let cancelled = engine
            .cancel(&called.id, "emergency leave", true, now())
            .unwrap();
        assert!(matches!(cancelled.status, TokenStatus::Cancelled));
        assert_eq!(
            cancelled.cancellation_reason.as_deref(),
            Some("emergency leave")
        );
    }

    #[test]
    fn test_cancel_unknown_token() {
        let db = setup_db();
        let engine = QueueEngine::new(&db);
        let result = engine.cancel("no-such-id", "whatever", false, now());
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_guard_violation_leaves_token_unchanged() {
        let db = setup_db();
        let token = book(&db, 1);
        let engine = QueueEngine::new(&db);

        engine.serve(&token.id, now()).unwrap();
        let before = db.get_token(&token.id).unwrap().unwrap();

        assert!(engine.skip(&token.id, now()).is_err());
        let after = db.get_token(&token.id).unwrap().unwrap();
        assert_eq!(before, after);
    }
}
