//! Leave database operations.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Leave, LeaveKind};

const LEAVE_COLUMNS: &str = "id, date, reason, kind, notes, created_at";

impl Database {
    /// Insert a new leave record.
    pub fn insert_leave(&self, leave: &Leave) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO leaves (id, date, reason, kind, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                leave.id,
                leave.date.to_string(),
                leave.reason,
                leave.kind.as_str(),
                leave.notes,
                leave.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get the leave for a date, if one exists.
    pub fn get_leave_by_date(&self, date: NaiveDate) -> DbResult<Option<Leave>> {
        self.conn
            .query_row(
                &format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE date = ?"),
                [date.to_string()],
                map_leave_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Leaves on or after a date, soonest first.
    pub fn list_leaves_from(&self, from: NaiveDate) -> DbResult<Vec<Leave>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LEAVE_COLUMNS} FROM leaves WHERE date >= ? ORDER BY date ASC"
        ))?;

        let rows = stmt.query_map([from.to_string()], map_leave_row)?;
        let mut leaves = Vec::new();
        for row in rows {
            leaves.push(row?.try_into()?);
        }
        Ok(leaves)
    }
}

/// Intermediate row struct for database mapping.
struct LeaveRow {
    id: String,
    date: String,
    reason: String,
    kind: String,
    notes: Option<String>,
    created_at: String,
}

fn map_leave_row(row: &Row<'_>) -> rusqlite::Result<LeaveRow> {
    Ok(LeaveRow {
        id: row.get(0)?,
        date: row.get(1)?,
        reason: row.get(2)?,
        kind: row.get(3)?,
        notes: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl TryFrom<LeaveRow> for Leave {
    type Error = DbError;

    fn try_from(row: LeaveRow) -> Result<Self, Self::Error> {
        let date: NaiveDate = row
            .date
            .parse()
            .map_err(|_| DbError::Constraint(format!("Bad leave date: {}", row.date)))?;
        let kind = match row.kind.as_str() {
            "planned" => LeaveKind::Planned,
            "emergency" => LeaveKind::Emergency,
            other => {
                return Err(DbError::Constraint(format!("Unknown leave kind: {}", other)))
            }
        };

        Ok(Leave {
            id: row.id,
            date,
            reason: row.reason,
            kind,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let date = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        let leave = Leave::new(date, "conference".into(), LeaveKind::Planned, None);
        db.insert_leave(&leave).unwrap();

        let retrieved = db.get_leave_by_date(date).unwrap().unwrap();
        assert_eq!(retrieved.reason, "conference");
        assert!(matches!(retrieved.kind, LeaveKind::Planned));

        let other = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
        assert!(db.get_leave_by_date(other).unwrap().is_none());
    }

    #[test]
    fn test_list_leaves_from() {
        let db = setup_db();
        for day in [3, 10, 17] {
            let date = NaiveDate::from_ymd_opt(2025, 6, day).unwrap();
            db.insert_leave(&Leave::new(date, "off".into(), LeaveKind::Planned, None))
                .unwrap();
        }

        let from = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        let upcoming = db.list_leaves_from(from).unwrap();
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].date.to_string(), "2025-06-10");
    }
}
