//! Event fan-out. Queue mutations produce [`QueueEvent`]s which a
//! [`Publisher`] pushes to whatever transport the host application wires
//! in (websocket hub, SMS gateway, test sink). Publish failures never
//! fail the mutation that produced them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::db::{Database, DbResult};
use crate::eta;
use crate::models::{Token, TokenStatus};

/// Sink for queue events. Implementations must tolerate being called from
/// multiple threads.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: &QueueEvent) -> anyhow::Result<()>;
}

/// What a patient should be told, and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    Called,
    Delay { minutes: i64 },
    Served,
    Cancelled { reason: String },
}

/// An observable change in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    NewBooking(Token),
    TokenUpdate(Token),
    Snapshot(QueueSnapshot),
    EmergencyLeave {
        date: NaiveDate,
        reason: String,
        cancelled_count: usize,
    },
    NotifyPatient {
        token_id: String,
        token_number: u32,
        phone: String,
        kind: NotificationKind,
    },
}

/// The public waiting-room view of a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBrief {
    pub token_number: u32,
    pub patient_name: String,
    pub estimated_time: String,
}

impl From<&Token> for TokenBrief {
    fn from(token: &Token) -> Self {
        Self {
            token_number: token.token_number,
            patient_name: token.patient_name.clone(),
            estimated_time: token.estimated_time.clone(),
        }
    }
}

/// Live view of one date's queue: who is in the chair, who is up next,
/// and a coarse wait estimate for a fresh arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub date: NaiveDate,
    /// The called token, falling back to the most recently served one
    pub current_token: Option<TokenBrief>,
    pub upcoming_tokens: Vec<TokenBrief>,
    /// "40-50 minutes" style range for a walk-in arriving now
    pub estimated_wait_range: String,
    pub waiting_count: u32,
    pub served_count: u32,
}

/// Build the live queue view for a date, folding the session's delay into
/// the wait range.
pub fn build_snapshot(
    db: &Database,
    config: &QueueConfig,
    date: NaiveDate,
    delay_minutes: i64,
) -> DbResult<QueueSnapshot> {
    let current = match db.current_called(date)? {
        Some(token) => Some(token),
        None => db.latest_served(date)?,
    };

    let waiting = db.list_waiting_tokens(date)?;
    let upcoming = waiting
        .iter()
        .take(config.upcoming_limit)
        .map(TokenBrief::from)
        .collect();

    let per_patient = eta::per_patient_minutes(db, config, date)?;
    let base = waiting.len() as i64 * per_patient + delay_minutes;

    Ok(QueueSnapshot {
        date,
        current_token: current.as_ref().map(TokenBrief::from),
        upcoming_tokens: upcoming,
        estimated_wait_range: format!("{}-{} minutes", base, base + per_patient),
        waiting_count: waiting.len() as u32,
        served_count: db.count_with_status(date, TokenStatus::Served)?,
    })
}

/// Discards every event. The default when the host wires no transport.
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _event: &QueueEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Collects events in memory. Test sink.
#[derive(Default)]
pub struct MemoryPublisher {
    events: std::sync::Mutex<Vec<QueueEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().expect("publisher poisoned").clone()
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, event: &QueueEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .expect("publisher poisoned")
            .push(event.clone());
        Ok(())
    }
}
