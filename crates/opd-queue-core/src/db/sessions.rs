//! Session database operations.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Session, SessionStatus, Shift};

const SESSION_COLUMNS: &str = "id, date, shift, status, start_time, end_time, paused_at, \
     delay_minutes, total_patients, served_patients, skipped_patients, \
     cancelled_patients, avg_wait_time, notes, created_at, updated_at";

impl Database {
    /// Insert a new session.
    pub fn insert_session(&self, session: &Session) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO sessions (
                id, date, shift, status, start_time, end_time, paused_at,
                delay_minutes, total_patients, served_patients, skipped_patients,
                cancelled_patients, avg_wait_time, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                session.id,
                session.date.to_string(),
                session.shift.as_str(),
                session.status.as_str(),
                session.start_time,
                session.end_time,
                session.paused_at,
                session.delay_minutes,
                session.total_patients,
                session.served_patients,
                session.skipped_patients,
                session.cancelled_patients,
                session.avg_wait_time,
                session.notes,
                session.created_at,
                session.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Update an existing session.
    pub fn update_session(&self, session: &Session) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE sessions SET
                status = ?2,
                start_time = ?3,
                end_time = ?4,
                paused_at = ?5,
                delay_minutes = ?6,
                total_patients = ?7,
                served_patients = ?8,
                skipped_patients = ?9,
                cancelled_patients = ?10,
                avg_wait_time = ?11,
                notes = ?12,
                updated_at = ?13
            WHERE id = ?1
            "#,
            params![
                session.id,
                session.status.as_str(),
                session.start_time,
                session.end_time,
                session.paused_at,
                session.delay_minutes,
                session.total_patients,
                session.served_patients,
                session.skipped_patients,
                session.cancelled_patients,
                session.avg_wait_time,
                session.notes,
                session.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get the session for a date.
    pub fn get_session_by_date(&self, date: NaiveDate) -> DbResult<Option<Session>> {
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE date = ?"),
                [date.to_string()],
                map_session_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }
}

/// Intermediate row struct for database mapping.
struct SessionRow {
    id: String,
    date: String,
    shift: String,
    status: String,
    start_time: Option<String>,
    end_time: Option<String>,
    paused_at: Option<String>,
    delay_minutes: i64,
    total_patients: u32,
    served_patients: u32,
    skipped_patients: u32,
    cancelled_patients: u32,
    avg_wait_time: i64,
    notes: String,
    created_at: String,
    updated_at: String,
}

fn map_session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        date: row.get(1)?,
        shift: row.get(2)?,
        status: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        paused_at: row.get(6)?,
        delay_minutes: row.get(7)?,
        total_patients: row.get(8)?,
        served_patients: row.get(9)?,
        skipped_patients: row.get(10)?,
        cancelled_patients: row.get(11)?,
        avg_wait_time: row.get(12)?,
        notes: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

impl TryFrom<SessionRow> for Session {
    type Error = DbError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let date: NaiveDate = row
            .date
            .parse()
            .map_err(|_| DbError::Constraint(format!("Bad session date: {}", row.date)))?;

        Ok(Session {
            id: row.id,
            date,
            shift: string_to_shift(&row.shift)?,
            status: string_to_status(&row.status)?,
            start_time: row.start_time,
            end_time: row.end_time,
            paused_at: row.paused_at,
            delay_minutes: row.delay_minutes,
            total_patients: row.total_patients,
            served_patients: row.served_patients,
            skipped_patients: row.skipped_patients,
            cancelled_patients: row.cancelled_patients,
            avg_wait_time: row.avg_wait_time,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn string_to_status(s: &str) -> Result<SessionStatus, DbError> {
    match s {
        "scheduled" => Ok(SessionStatus::Scheduled),
        "active" => Ok(SessionStatus::Active),
        "paused" => Ok(SessionStatus::Paused),
        "ended" => Ok(SessionStatus::Ended),
        "cancelled" => Ok(SessionStatus::Cancelled),
        _ => Err(DbError::Constraint(format!("Unknown session status: {}", s))),
    }
}

fn string_to_shift(s: &str) -> Result<Shift, DbError> {
    match s {
        "morning" => Ok(Shift::Morning),
        "evening" => Ok(Shift::Evening),
        "full-day" => Ok(Shift::FullDay),
        _ => Err(DbError::Constraint(format!("Unknown shift: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let session = Session::new(date(), Shift::Morning);
        db.insert_session(&session).unwrap();

        let retrieved = db.get_session_by_date(date()).unwrap().unwrap();
        assert_eq!(retrieved.id, session.id);
        assert!(matches!(retrieved.status, SessionStatus::Scheduled));
        assert!(matches!(retrieved.shift, Shift::Morning));
    }

    #[test]
    fn test_one_session_per_date() {
        let db = setup_db();
        db.insert_session(&Session::new(date(), Shift::Morning))
            .unwrap();

        let result = db.insert_session(&Session::new(date(), Shift::Evening));
        assert!(result.is_err());
    }

    #[test]
    fn test_update_session() {
        let db = setup_db();
        let mut session = Session::new(date(), Shift::FullDay);
        db.insert_session(&session).unwrap();

        session.status = SessionStatus::Active;
        session.start_time = Some(chrono::Utc::now().to_rfc3339());
        session.delay_minutes = 20;
        assert!(db.update_session(&session).unwrap());

        let retrieved = db.get_session_by_date(date()).unwrap().unwrap();
        assert!(matches!(retrieved.status, SessionStatus::Active));
        assert_eq!(retrieved.delay_minutes, 20);
        assert!(matches!(retrieved.shift, Shift::FullDay));
    }
}
