//! Token database operations.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Gender, NotificationPrefs, Token, TokenStatus};

const TOKEN_COLUMNS: &str = "id, token_number, booking_date, patient_name, patient_phone, \
     patient_age, patient_gender, symptoms, status, estimated_time, \
     notify_sms, notify_whatsapp, called_at, served_at, cancelled_at, \
     cancellation_reason, actual_wait_time, created_at, updated_at";

impl Database {
    /// Insert a new token.
    pub fn insert_token(&self, token: &Token) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO tokens (
                id, token_number, booking_date, patient_name, patient_phone,
                patient_age, patient_gender, symptoms, status, estimated_time,
                notify_sms, notify_whatsapp, called_at, served_at, cancelled_at,
                cancellation_reason, actual_wait_time, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                      ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
            params![
                token.id,
                token.token_number,
                token.booking_date.to_string(),
                token.patient_name,
                token.patient_phone,
                token.patient_age,
                token.patient_gender.as_str(),
                token.symptoms,
                token.status.as_str(),
                token.estimated_time,
                token.notifications.sms,
                token.notifications.whatsapp,
                token.called_at,
                token.served_at,
                token.cancelled_at,
                token.cancellation_reason,
                token.actual_wait_time,
                token.created_at,
                token.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Update an existing token's mutable fields.
    pub fn update_token(&self, token: &Token) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE tokens SET
                status = ?2,
                estimated_time = ?3,
                called_at = ?4,
                served_at = ?5,
                cancelled_at = ?6,
                cancellation_reason = ?7,
                actual_wait_time = ?8,
                updated_at = ?9
            WHERE id = ?1
            "#,
            params![
                token.id,
                token.status.as_str(),
                token.estimated_time,
                token.called_at,
                token.served_at,
                token.cancelled_at,
                token.cancellation_reason,
                token.actual_wait_time,
                token.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a token by ID.
    pub fn get_token(&self, id: &str) -> DbResult<Option<Token>> {
        self.conn
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?"),
                [id],
                map_token_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Get a token by number, scoped to bookings on or after `from`.
    pub fn get_token_by_number_from(
        &self,
        number: u32,
        from: NaiveDate,
    ) -> DbResult<Option<Token>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens
                     WHERE token_number = ?1 AND booking_date >= ?2
                     ORDER BY booking_date ASC
                     LIMIT 1"
                ),
                params![number, from.to_string()],
                map_token_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Most recent booking for a phone on or after `from`.
    pub fn latest_token_by_phone_from(
        &self,
        phone: &str,
        from: NaiveDate,
    ) -> DbResult<Option<Token>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens
                     WHERE patient_phone = ?1 AND booking_date >= ?2
                     ORDER BY created_at DESC
                     LIMIT 1"
                ),
                params![phone, from.to_string()],
                map_token_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Highest token number assigned for a date, any status.
    pub fn max_token_number(&self, date: NaiveDate) -> DbResult<Option<u32>> {
        let max: Option<u32> = self.conn.query_row(
            "SELECT MAX(token_number) FROM tokens WHERE booking_date = ?",
            [date.to_string()],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// All tokens for a date in queue order.
    pub fn list_tokens_for_date(&self, date: NaiveDate) -> DbResult<Vec<Token>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens
             WHERE booking_date = ?
             ORDER BY token_number ASC"
        ))?;

        let rows = stmt.query_map([date.to_string()], map_token_row)?;
        collect_tokens(rows)
    }

    /// Waiting tokens for a date in queue order.
    pub fn list_waiting_tokens(&self, date: NaiveDate) -> DbResult<Vec<Token>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens
             WHERE booking_date = ? AND status = 'waiting'
             ORDER BY token_number ASC"
        ))?;

        let rows = stmt.query_map([date.to_string()], map_token_row)?;
        collect_tokens(rows)
    }

    /// Count tokens with a given status for a date.
    pub fn count_with_status(&self, date: NaiveDate, status: TokenStatus) -> DbResult<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE booking_date = ?1 AND status = ?2",
            params![date.to_string(), status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Tokens counting against the daily capacity (waiting + served).
    pub fn booked_count(&self, date: NaiveDate) -> DbResult<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM tokens
             WHERE booking_date = ? AND status IN ('waiting', 'served')",
            [date.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Waiting tokens ahead of `number` on a date.
    pub fn count_waiting_before(&self, date: NaiveDate, number: u32) -> DbResult<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM tokens
             WHERE booking_date = ?1 AND status = 'waiting' AND token_number < ?2",
            params![date.to_string(), number],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// The token currently in the `called` slot for a date, if any.
    pub fn current_called(&self, date: NaiveDate) -> DbResult<Option<Token>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens
                     WHERE booking_date = ? AND status = 'called'
                     ORDER BY called_at DESC
                     LIMIT 1"
                ),
                [date.to_string()],
                map_token_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Lowest-numbered waiting token for a date.
    pub fn first_waiting(&self, date: NaiveDate) -> DbResult<Option<Token>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens
                     WHERE booking_date = ? AND status = 'waiting'
                     ORDER BY token_number ASC
                     LIMIT 1"
                ),
                [date.to_string()],
                map_token_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Most recently served token for a date.
    pub fn latest_served(&self, date: NaiveDate) -> DbResult<Option<Token>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens
                     WHERE booking_date = ? AND status = 'served'
                     ORDER BY served_at DESC
                     LIMIT 1"
                ),
                [date.to_string()],
                map_token_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Revert every `called` token for a date back to `waiting`.
    ///
    /// Enforces the single-`called`-slot invariant before a new call.
    pub fn revert_called(&self, date: NaiveDate, updated_at: &str) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            "UPDATE tokens SET status = 'waiting', called_at = NULL, updated_at = ?2
             WHERE booking_date = ?1 AND status = 'called'",
            params![date.to_string(), updated_at],
        )?;
        Ok(rows_affected)
    }

    /// Persist a recomputed estimate display value.
    pub fn set_estimated_time(&self, id: &str, value: &str, updated_at: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE tokens SET estimated_time = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, value, updated_at],
        )?;
        Ok(rows_affected > 0)
    }

    /// Average actual wait among the day's served tokens, minutes.
    pub fn avg_served_wait(&self, date: NaiveDate) -> DbResult<Option<f64>> {
        let avg: Option<f64> = self.conn.query_row(
            "SELECT AVG(actual_wait_time) FROM tokens
             WHERE booking_date = ? AND status = 'served' AND actual_wait_time IS NOT NULL",
            [date.to_string()],
            |row| row.get(0),
        )?;
        Ok(avg)
    }
}

/// Intermediate row struct for database mapping.
struct TokenRow {
    id: String,
    token_number: u32,
    booking_date: String,
    patient_name: String,
    patient_phone: String,
    patient_age: u32,
    patient_gender: String,
    symptoms: String,
    status: String,
    estimated_time: String,
    notify_sms: bool,
    notify_whatsapp: bool,
    called_at: Option<String>,
    served_at: Option<String>,
    cancelled_at: Option<String>,
    cancellation_reason: Option<String>,
    actual_wait_time: Option<i64>,
    created_at: String,
    updated_at: String,
}

fn map_token_row(row: &Row<'_>) -> rusqlite::Result<TokenRow> {
    Ok(TokenRow {
        id: row.get(0)?,
        token_number: row.get(1)?,
        booking_date: row.get(2)?,
        patient_name: row.get(3)?,
        patient_phone: row.get(4)?,
        patient_age: row.get(5)?,
        patient_gender: row.get(6)?,
        symptoms: row.get(7)?,
        status: row.get(8)?,
        estimated_time: row.get(9)?,
        notify_sms: row.get(10)?,
        notify_whatsapp: row.get(11)?,
        called_at: row.get(12)?,
        served_at: row.get(13)?,
        cancelled_at: row.get(14)?,
        cancellation_reason: row.get(15)?,
        actual_wait_time: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn collect_tokens(
    rows: impl Iterator<Item = rusqlite::Result<TokenRow>>,
) -> DbResult<Vec<Token>> {
    let mut tokens = Vec::new();
    for row in rows {
        tokens.push(row?.try_into()?);
    }
    Ok(tokens)
}

impl TryFrom<TokenRow> for Token {
    type Error = DbError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let booking_date: NaiveDate = row
            .booking_date
            .parse()
            .map_err(|_| DbError::Constraint(format!("Bad booking date: {}", row.booking_date)))?;

        Ok(Token {
            id: row.id,
            token_number: row.token_number,
            booking_date,
            patient_name: row.patient_name,
            patient_phone: row.patient_phone,
            patient_age: row.patient_age,
            patient_gender: string_to_gender(&row.patient_gender)?,
            symptoms: row.symptoms,
            status: string_to_status(&row.status)?,
            estimated_time: row.estimated_time,
            notifications: NotificationPrefs {
                sms: row.notify_sms,
                whatsapp: row.notify_whatsapp,
            },
            called_at: row.called_at,
            served_at: row.served_at,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            actual_wait_time: row.actual_wait_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn string_to_status(s: &str) -> Result<TokenStatus, DbError> {
    match s {
        "waiting" => Ok(TokenStatus::Waiting),
        "called" => Ok(TokenStatus::Called),
        "served" => Ok(TokenStatus::Served),
        "skipped" => Ok(TokenStatus::Skipped),
        "cancelled" => Ok(TokenStatus::Cancelled),
        _ => Err(DbError::Constraint(format!("Unknown token status: {}", s))),
    }
}

fn string_to_gender(s: &str) -> Result<Gender, DbError> {
    match s {
        "male" => Ok(Gender::Male),
        "female" => Ok(Gender::Female),
        "other" => Ok(Gender::Other),
        _ => Err(DbError::Constraint(format!("Unknown gender: {}", s))),
    }
}
