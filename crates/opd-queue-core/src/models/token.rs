//! Token models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a token.
///
/// Happy path is `Waiting → Called → Served`. A `Called` token reverts to
/// `Waiting` when a different token is called. `Served`, `Skipped` and
/// `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Waiting,
    Called,
    Served,
    Skipped,
    Cancelled,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Waiting => "waiting",
            TokenStatus::Called => "called",
            TokenStatus::Served => "served",
            TokenStatus::Skipped => "skipped",
            TokenStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TokenStatus::Served | TokenStatus::Skipped | TokenStatus::Cancelled
        )
    }
}

/// Patient gender as recorded at booking time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl Default for Gender {
    fn default() -> Self {
        Gender::Male
    }
}

/// Notification channels the patient opted into. Consumed only by the
/// external notifier; the core just carries the flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPrefs {
    pub sms: bool,
    pub whatsapp: bool,
}

impl NotificationPrefs {
    pub fn any(&self) -> bool {
        self.sms || self.whatsapp
    }
}

/// A patient's numbered place in a day's queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// Unique token ID
    pub id: String,
    /// Sequential number, unique within `booking_date`, starting at 1
    pub token_number: u32,
    /// Calendar date the token belongs to
    pub booking_date: NaiveDate,
    /// Patient name
    pub patient_name: String,
    /// Patient phone, exactly 10 digits
    pub patient_phone: String,
    /// Patient age in years
    pub patient_age: u32,
    /// Patient gender
    pub patient_gender: Gender,
    /// Free-text symptoms
    pub symptoms: String,
    /// Queue status
    pub status: TokenStatus,
    /// Estimated serve time, display string `HH:MM`. Derived, not
    /// authoritative; rewritten whenever queue order or delay changes.
    pub estimated_time: String,
    /// Opted-in notification channels
    pub notifications: NotificationPrefs,
    /// Set when the token is called
    pub called_at: Option<String>,
    /// Set when the token is served
    pub served_at: Option<String>,
    /// Set when the token is cancelled
    pub cancelled_at: Option<String>,
    /// Why the token was cancelled
    pub cancellation_reason: Option<String>,
    /// Minutes between creation and serve, fixed at serve time
    pub actual_wait_time: Option<i64>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl Token {
    /// Create a new waiting token from a booking request.
    pub fn new(token_number: u32, request: &BookingRequest) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token_number,
            booking_date: request.booking_date,
            patient_name: request.patient_name.clone(),
            patient_phone: request.patient_phone.clone(),
            patient_age: request.patient_age,
            patient_gender: request.patient_gender,
            symptoms: request.symptoms.clone(),
            status: TokenStatus::Waiting,
            estimated_time: String::new(),
            notifications: request.notifications,
            called_at: None,
            served_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            actual_wait_time: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Creation time as a parsed instant.
    pub fn created_instant(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Patient-supplied facts for a new booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_age: u32,
    #[serde(default)]
    pub patient_gender: Gender,
    pub booking_date: NaiveDate,
    #[serde(default)]
    pub symptoms: String,
    #[serde(default)]
    pub notifications: NotificationPrefs,
}

/// What the patient gets back after booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub token: Token,
    /// Waiting tokens ahead of this one
    pub wait_ahead: u32,
    /// Token number currently being served, if any
    pub current_serving: Option<u32>,
}

/// Result of a status lookup by token number or phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStatusView {
    pub token: Token,
    pub wait_ahead: u32,
    pub current_serving: Option<u32>,
}
