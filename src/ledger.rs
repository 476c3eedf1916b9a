//! Grade ledger: the only component with a standing invariant. A grade is
//! either a live row in `grades` or an immutable copy in `canceled_grades`,
//! never both and never neither once recorded. There is no edit-in-place.

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::db;

pub const GRADE_MIN: i64 = 1;
pub const GRADE_MAX: i64 = 5;

#[derive(Debug)]
pub enum LedgerError {
    /// Grade value outside [1, 5].
    BadValue(i64),
    /// Unknown or already-canceled grade id.
    NotFound,
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Db(e)
    }
}

#[derive(Debug, Clone)]
pub struct GradeRow {
    pub id: String,
    pub student_user_id: String,
    pub subject_id: String,
    pub value: i64,
    pub manager_mode: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CanceledGradeRow {
    pub id: String,
    pub student_user_id: String,
    pub subject_id: String,
    pub value: i64,
    pub created_at: String,
    pub canceled_at: String,
}

/// Insert a live grade. Caller is responsible for resolving the student and
/// subject first and for wrapping the call in the request transaction.
pub fn record_grade(
    conn: &Connection,
    student_user_id: &str,
    subject_id: &str,
    value: i64,
    manager_mode: bool,
) -> Result<GradeRow, LedgerError> {
    if !(GRADE_MIN..=GRADE_MAX).contains(&value) {
        return Err(LedgerError::BadValue(value));
    }

    let row = GradeRow {
        id: Uuid::new_v4().to_string(),
        student_user_id: student_user_id.to_string(),
        subject_id: subject_id.to_string(),
        value,
        manager_mode,
        created_at: db::now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO grades(id, student_user_id, subject_id, value, manager_mode, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &row.id,
            &row.student_user_id,
            &row.subject_id,
            row.value,
            row.manager_mode as i64,
            &row.created_at,
        ),
    )?;
    Ok(row)
}

/// Move a live grade to the canceled table: delete the original and insert
/// an immutable copy carrying the original value and creation date. Both
/// writes happen on the caller's transaction, so a failure leaves the live
/// row in place.
pub fn cancel_grade(conn: &Connection, grade_id: &str) -> Result<CanceledGradeRow, LedgerError> {
    let live: Option<GradeRow> = conn
        .query_row(
            "SELECT id, student_user_id, subject_id, value, manager_mode, created_at
             FROM grades WHERE id = ?",
            [grade_id],
            |r| {
                Ok(GradeRow {
                    id: r.get(0)?,
                    student_user_id: r.get(1)?,
                    subject_id: r.get(2)?,
                    value: r.get(3)?,
                    manager_mode: r.get::<_, i64>(4)? != 0,
                    created_at: r.get(5)?,
                })
            },
        )
        .optional()?;

    let Some(live) = live else {
        return Err(LedgerError::NotFound);
    };

    let canceled = CanceledGradeRow {
        id: Uuid::new_v4().to_string(),
        student_user_id: live.student_user_id,
        subject_id: live.subject_id,
        value: live.value,
        created_at: live.created_at,
        canceled_at: db::now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO canceled_grades(id, student_user_id, subject_id, value, created_at, canceled_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &canceled.id,
            &canceled.student_user_id,
            &canceled.subject_id,
            canceled.value,
            &canceled.created_at,
            &canceled.canceled_at,
        ),
    )?;
    conn.execute("DELETE FROM grades WHERE id = ?", [grade_id])?;
    Ok(canceled)
}
