//! OPD Queue Core Library
//!
//! Walk-in token queue manager for an outpatient clinic: per-day token
//! numbering, live ETA computation, doctor session control, and leave
//! handling, backed by SQLite.
//!
//! # Architecture
//!
//! ```text
//! BookingRequest ──▶ validation ──▶ availability ──▶ token number
//!                                                         │
//!                                              [tokens: waiting]
//!                                                         │
//!                  ┌────────── call-next ─────────────────┤
//!                  ▼                                      │
//!               called ── serve ──▶ served                │
//!                  │                                      │
//!                  └── skip ──▶ skipped      cancel ──▶ cancelled
//!                                                         │
//!                             every mutation ─────────────┤
//!                                                         ▼
//!                                          recompute ETAs + QueueSnapshot
//!                                                         │
//!                                                         ▼
//!                                              Publisher (fan-out)
//! ```
//!
//! # Modules
//!
//! - [`db`]: SQLite database layer
//! - [`models`]: Domain types (Token, Session, Leave, etc.)
//! - [`availability`]: Booking-window and capacity rules
//! - [`eta`]: Wait estimates and rolling consultation average
//! - [`queue`]: Token status state machine
//! - [`session`]: Doctor sessions, delays, and leaves
//! - [`broadcast`]: Queue events and snapshot building

pub mod availability;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod eta;
pub mod models;
pub mod queue;
pub mod session;

// Re-export commonly used types
pub use availability::{Availability, UnavailableReason};
pub use broadcast::{
    MemoryPublisher, NotificationKind, NullPublisher, Publisher, QueueEvent, QueueSnapshot,
    TokenBrief,
};
pub use config::QueueConfig;
pub use db::Database;
pub use models::{
    BookingConfirmation, BookingRequest, DayStats, Gender, Leave, LeaveKind, NotificationPrefs,
    Session, SessionStatus, Shift, Token, TokenStatus, TokenStatusView,
};

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};

use queue::{QueueEngine, QueueError};
use session::{SessionController, SessionError};

// =========================================================================
// Error Type
// =========================================================================

/// Unified error surface of the clinic core.
#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{date} is not bookable: {message}", message = .reason.message())]
    ClosedDate {
        date: NaiveDate,
        reason: UnavailableReason,
    },

    #[error("All tokens for {date} are booked (limit {limit})")]
    CapacityExceeded { date: NaiveDate, limit: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} {id}: status is {current}")]
    InvalidTransition {
        id: String,
        current: String,
        action: &'static str,
    },

    #[error("Queue for {0} is busy, please retry")]
    ConcurrencyConflict(NaiveDate),

    #[error("Internal error: {0}")]
    Fatal(String),
}

pub type ClinicResult<T> = Result<T, ClinicError>;

impl From<db::DbError> for ClinicError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => ClinicError::NotFound(what),
            other => ClinicError::Fatal(other.to_string()),
        }
    }
}

impl From<QueueError> for ClinicError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Db(inner) => inner.into(),
            QueueError::NotFound(id) => ClinicError::NotFound(format!("token {}", id)),
            QueueError::NoPatientsWaiting(date) => {
                ClinicError::NotFound(format!("No patients waiting for {}", date))
            }
            QueueError::NoCurrentPatient(date) => {
                ClinicError::NotFound(format!("No patient is currently called for {}", date))
            }
            QueueError::InvalidTransition {
                id,
                current,
                action,
            } => ClinicError::InvalidTransition {
                id,
                current: current.as_str().to_string(),
                action,
            },
        }
    }
}

impl From<SessionError> for ClinicError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Db(inner) => inner.into(),
            SessionError::NotFound(date) => {
                ClinicError::NotFound(format!("No session for {}", date))
            }
            SessionError::Validation(message) => ClinicError::Validation(message),
            SessionError::InvalidTransition {
                date,
                current,
                action,
            } => ClinicError::InvalidTransition {
                id: date.to_string(),
                current: current.as_str().to_string(),
                action,
            },
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ClinicError::Fatal(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Per-date Mutation Locks
// =========================================================================

/// Serializes mutations per booking date so token numbers stay unique and
/// the capacity check cannot race a concurrent booking.
struct DateLocks {
    busy: Mutex<HashSet<NaiveDate>>,
}

impl DateLocks {
    fn new() -> Self {
        Self {
            busy: Mutex::new(HashSet::new()),
        }
    }

    fn acquire(&self, date: NaiveDate, timeout: Duration) -> ClinicResult<DateLockGuard<'_>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut busy = self.busy.lock()?;
                if busy.insert(date) {
                    return Ok(DateLockGuard { locks: self, date });
                }
            }
            if Instant::now() >= deadline {
                return Err(ClinicError::ConcurrencyConflict(date));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

struct DateLockGuard<'a> {
    locks: &'a DateLocks,
    date: NaiveDate,
}

impl Drop for DateLockGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.locks.busy.lock() {
            busy.remove(&self.date);
        }
    }
}

// =========================================================================
// Factory Functions
// =========================================================================

/// Open or create a database at the given path, with no event fan-out.
pub fn open<P: AsRef<Path>>(path: P) -> ClinicResult<ClinicCore> {
    let db = Database::open(path)?;
    Ok(ClinicCore::new(db, QueueConfig::default(), Arc::new(NullPublisher)))
}

/// Create an in-memory instance (for testing), with no event fan-out.
pub fn open_in_memory() -> ClinicResult<ClinicCore> {
    let db = Database::open_in_memory()?;
    Ok(ClinicCore::new(db, QueueConfig::default(), Arc::new(NullPublisher)))
}

/// Create an in-memory instance with explicit config and publisher.
pub fn open_in_memory_with(
    config: QueueConfig,
    publisher: Arc<dyn Publisher>,
) -> ClinicResult<ClinicCore> {
    let db = Database::open_in_memory()?;
    Ok(ClinicCore::new(db, config, publisher))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe clinic queue manager.
///
/// All mutations for a booking date run under that date's lock; events go
/// out through the publisher only after the locks are released, and a
/// failing publisher never fails the operation.
pub struct ClinicCore {
    db: Mutex<Database>,
    locks: DateLocks,
    config: QueueConfig,
    publisher: Arc<dyn Publisher>,
}

impl ClinicCore {
    pub fn new(db: Database, config: QueueConfig, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            db: Mutex::new(db),
            locks: DateLocks::new(),
            config,
            publisher,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // =========================================================================
    // Booking Operations
    // =========================================================================

    /// Book the next token for a date.
    pub fn book_token(&self, request: &BookingRequest) -> ClinicResult<BookingConfirmation> {
        validate_booking(request)?;

        let now = Utc::now();
        let date = request.booking_date;

        let (confirmation, snapshot) = {
            let _guard = self.locks.acquire(date, self.config.lock_timeout)?;
            let db = self.db.lock()?;

            let availability =
                availability::check_availability(&db, &self.config, date, now.date_naive())?;
            if let Some(reason) = availability.reason {
                return Err(match reason {
                    UnavailableReason::CapacityFull => ClinicError::CapacityExceeded {
                        date,
                        limit: self.config.max_tokens_per_day,
                    },
                    other => ClinicError::ClosedDate {
                        date,
                        reason: other,
                    },
                });
            }

            let number = availability::next_token_number(&db, date)?;
            let mut token = Token::new(number, request);

            let wait_ahead = eta::wait_ahead(&db, &token)?;
            let delay = SessionController::new(&db).delay_minutes(date)?;
            let per_patient = eta::per_patient_minutes(&db, &self.config, date)?;
            token.estimated_time = eta::format_estimate(eta::estimated_serve_time(
                wait_ahead,
                per_patient,
                delay,
                now,
            ));
            db.insert_token(&token)?;
            tracing::info!(%date, token = number, "token booked");

            let current_serving = db.current_called(date)?.map(|t| t.token_number);
            let snapshot = broadcast::build_snapshot(&db, &self.config, date, delay)?;
            (
                BookingConfirmation {
                    token,
                    wait_ahead,
                    current_serving,
                },
                snapshot,
            )
        };

        self.emit(QueueEvent::NewBooking(confirmation.token.clone()));
        self.emit(QueueEvent::Snapshot(snapshot));
        self.notify(&confirmation.token, NotificationKind::BookingConfirmed);
        Ok(confirmation)
    }

    /// Look up a token by number or 10-digit phone.
    ///
    /// Exactly ten digits is treated as a phone (most recent booking on or
    /// after today wins); any other all-digit string is a token number for
    /// today or later.
    pub fn token_status(&self, query: &str) -> ClinicResult<TokenStatusView> {
        let query = query.trim();
        if query.is_empty() || !query.chars().all(|c| c.is_ascii_digit()) {
            return Err(ClinicError::Validation(
                "Search by token number or 10-digit phone".into(),
            ));
        }

        let today = Utc::now().date_naive();
        let db = self.db.lock()?;

        let token = if query.len() == 10 {
            db.latest_token_by_phone_from(query, today)?
        } else {
            let number: u32 = query
                .parse()
                .map_err(|_| ClinicError::Validation("Invalid token number".into()))?;
            db.get_token_by_number_from(number, today)?
        };
        let token =
            token.ok_or_else(|| ClinicError::NotFound(format!("No token matching {}", query)))?;

        let wait_ahead = eta::wait_ahead(&db, &token)?;
        let current_serving = db.current_called(token.booking_date)?.map(|t| t.token_number);
        Ok(TokenStatusView {
            token,
            wait_ahead,
            current_serving,
        })
    }

    /// Patient-initiated cancellation of a waiting token.
    pub fn cancel_token(&self, id: &str, reason: &str) -> ClinicResult<Token> {
        let date = self.token_date(id)?;
        let (token, snapshot) = self.mutate_queue(date, |db, now| {
            Ok(QueueEngine::new(db).cancel(id, reason, false, now)?)
        })?;

        self.emit(QueueEvent::TokenUpdate(token.clone()));
        self.emit(QueueEvent::Snapshot(snapshot));
        self.notify(
            &token,
            NotificationKind::Cancelled {
                reason: reason.to_string(),
            },
        );
        Ok(token)
    }

    /// Whether a date can accept a new booking.
    pub fn check_availability(&self, date: NaiveDate) -> ClinicResult<Availability> {
        let db = self.db.lock()?;
        Ok(availability::check_availability(
            &db,
            &self.config,
            date,
            Utc::now().date_naive(),
        )?)
    }

    // =========================================================================
    // Queue Views
    // =========================================================================

    /// All tokens for a date, in token-number order.
    pub fn tokens_for_date(&self, date: NaiveDate) -> ClinicResult<Vec<Token>> {
        let db = self.db.lock()?;
        Ok(db.list_tokens_for_date(date)?)
    }

    /// Live queue view for a date.
    pub fn live_queue(&self, date: NaiveDate) -> ClinicResult<QueueSnapshot> {
        let db = self.db.lock()?;
        let delay = SessionController::new(&db).delay_minutes(date)?;
        Ok(broadcast::build_snapshot(&db, &self.config, date, delay)?)
    }

    /// Aggregate counts for a date.
    pub fn day_stats(&self, date: NaiveDate) -> ClinicResult<DayStats> {
        let db = self.db.lock()?;
        Ok(SessionController::new(&db).day_stats(date, &self.config)?)
    }

    /// Scheduled leaves from today onward.
    pub fn upcoming_leaves(&self) -> ClinicResult<Vec<Leave>> {
        let db = self.db.lock()?;
        Ok(db.list_leaves_from(Utc::now().date_naive())?)
    }

    // =========================================================================
    // Queue Transitions
    // =========================================================================

    /// Call the first waiting token, releasing any previously called one
    /// back to waiting.
    pub fn call_next(&self, date: NaiveDate) -> ClinicResult<Token> {
        let (token, snapshot) =
            self.mutate_queue(date, |db, now| Ok(QueueEngine::new(db).call_next(date, now)?))?;
        self.publish_transition(&token, snapshot, Some(NotificationKind::Called));
        Ok(token)
    }

    /// Call a specific waiting token out of order.
    pub fn call_token(&self, id: &str) -> ClinicResult<Token> {
        let date = self.token_date(id)?;
        let (token, snapshot) =
            self.mutate_queue(date, |db, now| Ok(QueueEngine::new(db).call_specific(id, now)?))?;
        self.publish_transition(&token, snapshot, Some(NotificationKind::Called));
        Ok(token)
    }

    /// Mark the currently called token as served.
    pub fn serve_current(&self, date: NaiveDate) -> ClinicResult<Token> {
        let (token, snapshot) = self.mutate_queue(date, |db, now| {
            Ok(QueueEngine::new(db).serve_current(date, now)?)
        })?;
        self.publish_transition(&token, snapshot, Some(NotificationKind::Served));
        Ok(token)
    }

    /// Mark a waiting or called token as served.
    pub fn serve_token(&self, id: &str) -> ClinicResult<Token> {
        let date = self.token_date(id)?;
        let (token, snapshot) =
            self.mutate_queue(date, |db, now| Ok(QueueEngine::new(db).serve(id, now)?))?;
        self.publish_transition(&token, snapshot, Some(NotificationKind::Served));
        Ok(token)
    }

    /// Skip the currently called token.
    pub fn skip_current(&self, date: NaiveDate) -> ClinicResult<Token> {
        let (token, snapshot) = self.mutate_queue(date, |db, now| {
            Ok(QueueEngine::new(db).skip_current(date, now)?)
        })?;
        self.publish_transition(&token, snapshot, None);
        Ok(token)
    }

    /// Skip a waiting or called token.
    pub fn skip_token(&self, id: &str) -> ClinicResult<Token> {
        let date = self.token_date(id)?;
        let (token, snapshot) =
            self.mutate_queue(date, |db, now| Ok(QueueEngine::new(db).skip(id, now)?))?;
        self.publish_transition(&token, snapshot, None);
        Ok(token)
    }

    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Start (or resume) the date's session.
    pub fn start_session(&self, date: NaiveDate, shift: Shift) -> ClinicResult<Session> {
        let (session, snapshot) = self.mutate_queue(date, |db, now| {
            Ok(SessionController::new(db).start(date, shift, now)?)
        })?;
        self.emit(QueueEvent::Snapshot(snapshot));
        Ok(session)
    }

    /// Pause the date's active session.
    pub fn pause_session(&self, date: NaiveDate) -> ClinicResult<Session> {
        let (session, snapshot) = self.mutate_queue(date, |db, now| {
            Ok(SessionController::new(db).pause(date, now)?)
        })?;
        self.emit(QueueEvent::Snapshot(snapshot));
        Ok(session)
    }

    /// End the date's session, cancelling any still-waiting tokens.
    pub fn end_session(&self, date: NaiveDate) -> ClinicResult<Session> {
        let ((session, leftover), snapshot) = self.mutate_queue(date, |db, now| {
            Ok(SessionController::new(db).end(date, &self.config, now)?)
        })?;

        self.emit(QueueEvent::Snapshot(snapshot));
        for token in &leftover {
            self.emit(QueueEvent::TokenUpdate(token.clone()));
            self.notify(
                token,
                NotificationKind::Cancelled {
                    reason: "session ended".into(),
                },
            );
        }
        Ok(session)
    }

    /// Add delay minutes to the date's session and push fresh estimates to
    /// every waiting patient.
    pub fn add_delay(&self, date: NaiveDate, minutes: i64) -> ClinicResult<Session> {
        let ((session, waiting), snapshot) = self.mutate_queue(date, |db, now| {
            let session = SessionController::new(db).add_delay(date, minutes, now)?;
            let waiting = db.list_waiting_tokens(date)?;
            Ok((session, waiting))
        })?;

        self.emit(QueueEvent::Snapshot(snapshot));
        for token in &waiting {
            self.notify(token, NotificationKind::Delay { minutes });
        }
        Ok(session)
    }

    // =========================================================================
    // Leave Operations
    // =========================================================================

    /// Schedule a planned leave for a future date.
    pub fn schedule_leave(
        &self,
        date: NaiveDate,
        reason: &str,
        notes: Option<String>,
    ) -> ClinicResult<Leave> {
        if date < Utc::now().date_naive() {
            return Err(ClinicError::Validation(
                "Cannot schedule leave for past dates".into(),
            ));
        }
        let _guard = self.locks.acquire(date, self.config.lock_timeout)?;
        let db = self.db.lock()?;
        Ok(SessionController::new(&db).schedule_leave(date, reason, notes)?)
    }

    /// Close a date immediately: cancel its waiting tokens, record an
    /// emergency leave, and cancel the session.
    pub fn emergency_leave(&self, date: NaiveDate, reason: &str) -> ClinicResult<Leave> {
        let ((leave, cancelled), snapshot) = self.mutate_queue(date, |db, now| {
            Ok(SessionController::new(db).emergency_leave(date, reason, now)?)
        })?;

        self.emit(QueueEvent::EmergencyLeave {
            date,
            reason: reason.to_string(),
            cancelled_count: cancelled.len(),
        });
        self.emit(QueueEvent::Snapshot(snapshot));
        for token in &cancelled {
            self.emit(QueueEvent::TokenUpdate(token.clone()));
            self.notify(
                token,
                NotificationKind::Cancelled {
                    reason: reason.to_string(),
                },
            );
        }
        Ok(leave)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run a mutation under the date lock, then recompute estimates and
    /// build the post-mutation snapshot while still holding it.
    fn mutate_queue<T>(
        &self,
        date: NaiveDate,
        op: impl FnOnce(&Database, DateTime<Utc>) -> ClinicResult<T>,
    ) -> ClinicResult<(T, QueueSnapshot)> {
        let now = Utc::now();
        let _guard = self.locks.acquire(date, self.config.lock_timeout)?;
        let db = self.db.lock()?;

        let value = op(&db, now)?;

        let delay = SessionController::new(&db).delay_minutes(date)?;
        eta::recompute_all(&db, &self.config, date, delay, now)?;
        let snapshot = broadcast::build_snapshot(&db, &self.config, date, delay)?;
        Ok((value, snapshot))
    }

    fn token_date(&self, id: &str) -> ClinicResult<NaiveDate> {
        let db = self.db.lock()?;
        let token = db
            .get_token(id)?
            .ok_or_else(|| ClinicError::NotFound(format!("token {}", id)))?;
        Ok(token.booking_date)
    }

    fn publish_transition(
        &self,
        token: &Token,
        snapshot: QueueSnapshot,
        kind: Option<NotificationKind>,
    ) {
        self.emit(QueueEvent::TokenUpdate(token.clone()));
        self.emit(QueueEvent::Snapshot(snapshot));
        if let Some(kind) = kind {
            self.notify(token, kind);
        }
    }

    fn notify(&self, token: &Token, kind: NotificationKind) {
        if !token.notifications.any() {
            return;
        }
        self.emit(QueueEvent::NotifyPatient {
            token_id: token.id.clone(),
            token_number: token.token_number,
            phone: token.patient_phone.clone(),
            kind,
        });
    }

    fn emit(&self, event: QueueEvent) {
        if let Err(err) = self.publisher.publish(&event) {
            tracing::warn!(%err, "event publish failed");
        }
    }
}

fn validate_booking(request: &BookingRequest) -> ClinicResult<()> {
    if request.patient_name.trim().is_empty() {
        return Err(ClinicError::Validation("Patient name is required".into()));
    }
    if request.patient_phone.len() != 10
        || !request.patient_phone.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ClinicError::Validation(
            "Phone must be exactly 10 digits".into(),
        ));
    }
    if request.patient_age == 0 || request.patient_age > 120 {
        return Err(ClinicError::Validation(
            "Age must be between 1 and 120".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(date: NaiveDate) -> BookingRequest {
        BookingRequest {
            patient_name: "Asha Rao".into(),
            patient_phone: "9876543210".into(),
            patient_age: 34,
            patient_gender: Gender::Female,
            booking_date: date,
            symptoms: "fever".into(),
            notifications: NotificationPrefs::default(),
        }
    }

    #[test]
    fn test_validate_booking_rejects_bad_input() {
        let date = Utc::now().date_naive();

        let mut bad = request(date);
        bad.patient_name = "   ".into();
        assert!(matches!(
            validate_booking(&bad),
            Err(ClinicError::Validation(_))
        ));

        let mut bad = request(date);
        bad.patient_phone = "12345".into();
        assert!(matches!(
            validate_booking(&bad),
            Err(ClinicError::Validation(_))
        ));

        let mut bad = request(date);
        bad.patient_phone = "987654321x".into();
        assert!(matches!(
            validate_booking(&bad),
            Err(ClinicError::Validation(_))
        ));

        let mut bad = request(date);
        bad.patient_age = 0;
        assert!(matches!(
            validate_booking(&bad),
            Err(ClinicError::Validation(_))
        ));

        assert!(validate_booking(&request(date)).is_ok());
    }

    #[test]
    fn test_date_locks_exclusive_per_date() {
        let locks = DateLocks::new();
        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();

        let guard = locks.acquire(monday, Duration::from_millis(30)).unwrap();

        // Same date times out while held, another date does not
        assert!(matches!(
            locks.acquire(monday, Duration::from_millis(30)),
            Err(ClinicError::ConcurrencyConflict(_))
        ));
        assert!(locks.acquire(tuesday, Duration::from_millis(30)).is_ok());

        drop(guard);
        assert!(locks.acquire(monday, Duration::from_millis(30)).is_ok());
    }

    #[test]
    fn test_token_status_rejects_non_numeric_query() {
        let core = open_in_memory().unwrap();
        assert!(matches!(
            core.token_status("abc"),
            Err(ClinicError::Validation(_))
        ));
        assert!(matches!(
            core.token_status(""),
            Err(ClinicError::Validation(_))
        ));
    }
}
