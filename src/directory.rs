//! Read-only lookups over the identity tables. Everything the dispatcher
//! needs to expand an audience goes through here; no mutation surface.

use rusqlite::{Connection, OptionalExtension, Result};

#[derive(Debug, Clone)]
pub struct PersonRef {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
}

impl PersonRef {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub unique_code: String,
    pub name: String,
    pub year: i64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct SubjectRow {
    pub id: String,
    pub unique_code: String,
    pub name: String,
    pub class_id: String,
}

pub fn class_by_code(conn: &Connection, unique_code: &str) -> Result<Option<ClassRow>> {
    conn.query_row(
        "SELECT id, unique_code, name, year, active
         FROM school_classes WHERE unique_code = ?",
        [unique_code],
        |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                unique_code: r.get(1)?,
                name: r.get(2)?,
                year: r.get(3)?,
                active: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
}

pub fn subject_by_code(conn: &Connection, unique_code: &str) -> Result<Option<SubjectRow>> {
    conn.query_row(
        "SELECT id, unique_code, name, class_id FROM subjects WHERE unique_code = ?",
        [unique_code],
        |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                unique_code: r.get(1)?,
                name: r.get(2)?,
                class_id: r.get(3)?,
            })
        },
    )
    .optional()
}

pub fn subject_name(conn: &Connection, subject_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM subjects WHERE id = ?",
        [subject_id],
        |r| r.get(0),
    )
    .optional()
}

pub fn user_by_id(conn: &Connection, user_id: &str) -> Result<Option<PersonRef>> {
    conn.query_row(
        "SELECT id, first_name, last_name FROM users WHERE id = ?",
        [user_id],
        person_ref,
    )
    .optional()
}

pub fn student_by_user(conn: &Connection, user_id: &str) -> Result<Option<PersonRef>> {
    conn.query_row(
        "SELECT u.id, u.first_name, u.last_name
         FROM students s JOIN users u ON u.id = s.user_id
         WHERE s.user_id = ?",
        [user_id],
        person_ref,
    )
    .optional()
}

pub fn student_class_id(conn: &Connection, user_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT class_id FROM students WHERE user_id = ?",
        [user_id],
        |r| r.get(0),
    )
    .optional()
}

pub fn teacher_by_user(conn: &Connection, user_id: &str) -> Result<Option<PersonRef>> {
    conn.query_row(
        "SELECT u.id, u.first_name, u.last_name
         FROM teachers t JOIN users u ON u.id = t.user_id
         WHERE t.user_id = ?",
        [user_id],
        person_ref,
    )
    .optional()
}

pub fn students_of_class(conn: &Connection, class_id: &str) -> Result<Vec<PersonRef>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.first_name, u.last_name
         FROM students s JOIN users u ON u.id = s.user_id
         WHERE s.class_id = ?
         ORDER BY u.last_name, u.first_name",
    )?;
    let rows = stmt.query_map([class_id], person_ref)?;
    rows.collect()
}

pub fn parents_of_student(conn: &Connection, student_user_id: &str) -> Result<Vec<PersonRef>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.first_name, u.last_name
         FROM parents p JOIN users u ON u.id = p.user_id
         WHERE p.student_user_id = ?
         ORDER BY u.id",
    )?;
    let rows = stmt.query_map([student_user_id], person_ref)?;
    rows.collect()
}

pub fn teachers_of_subject(conn: &Connection, subject_id: &str) -> Result<Vec<PersonRef>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.first_name, u.last_name
         FROM subject_teachers st JOIN users u ON u.id = st.teacher_user_id
         WHERE st.subject_id = ?
         ORDER BY u.last_name, u.first_name",
    )?;
    let rows = stmt.query_map([subject_id], person_ref)?;
    rows.collect()
}

pub fn managers(conn: &Connection) -> Result<Vec<PersonRef>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name FROM users
         WHERE role = 'manager' AND active = 1
         ORDER BY username",
    )?;
    let rows = stmt.query_map([], person_ref)?;
    rows.collect()
}

fn person_ref(r: &rusqlite::Row<'_>) -> Result<PersonRef> {
    Ok(PersonRef {
        user_id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
    })
}
