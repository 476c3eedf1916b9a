//! Message dispatcher: expands a recipient selector into concrete users via
//! the directory and persists the whole fan-out. One message produces one
//! sender row, one recipient + inbox row per resolved user, and exactly one
//! sent record carrying a snapshot label of the audience. The caller wraps
//! `deliver` in a transaction; a failure mid-fan-out must roll back every row.

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::db;
use crate::directory::{self, PersonRef};

/// The seven addressing modes of the system. Targets are the stable codes
/// the rest of the IPC surface already uses: class and subject unique codes,
/// user ids for students and teachers.
#[derive(Debug, Clone)]
pub enum Selector {
    Class { class_code: String },
    ClassParents { class_code: String },
    SubjectTeachers { subject_code: String },
    Student { user_id: String },
    StudentParents { user_id: String },
    Managers,
    Teacher { user_id: String },
}

#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
pub enum SendError {
    /// The sender or the selector's target entity does not resolve.
    NotFound(&'static str),
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for SendError {
    fn from(e: rusqlite::Error) -> Self {
        SendError::Db(e)
    }
}

#[derive(Debug)]
pub struct Delivery {
    pub message_id: String,
    pub recipient_count: usize,
    pub recipient_label: String,
}

#[derive(Debug)]
pub enum SendOutcome {
    Delivered(Delivery),
    /// The target resolved but expanded to nobody (class with no students,
    /// student with no parents, ...). Nothing was written; the caller
    /// decides whether that is an error.
    EmptyAudience { recipient_label: String },
}

pub fn deliver(
    conn: &Connection,
    sender_user_id: &str,
    draft: &MessageDraft,
    selector: &Selector,
) -> Result<SendOutcome, SendError> {
    if directory::user_by_id(conn, sender_user_id)?.is_none() {
        return Err(SendError::NotFound("sender"));
    }

    let (recipient_label, audience) = expand(conn, selector)?;
    if audience.is_empty() {
        return Ok(SendOutcome::EmptyAudience { recipient_label });
    }

    let message_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO messages(id, subject, body, created_at) VALUES(?, ?, ?, ?)",
        (&message_id, &draft.subject, &draft.body, db::now_rfc3339()),
    )?;

    let sender_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO senders(id, user_id, message_id) VALUES(?, ?, ?)",
        (&sender_id, sender_user_id, &message_id),
    )?;

    for person in &audience {
        let recipient_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO recipients(id, user_id, message_id) VALUES(?, ?, ?)",
            (&recipient_id, &person.user_id, &message_id),
        )?;
        conn.execute(
            "INSERT INTO mailbox_received(id, sender_id, recipient_id, message_id, read)
             VALUES(?, ?, ?, ?, 0)",
            (
                Uuid::new_v4().to_string(),
                &sender_id,
                &recipient_id,
                &message_id,
            ),
        )?;
    }

    // The label is a snapshot of who was addressed at send time. The live
    // relations may grow or shrink later; the sent record must not.
    conn.execute(
        "INSERT INTO mailbox_sent(id, sender_id, message_id, recipient_label)
         VALUES(?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &sender_id,
            &message_id,
            &recipient_label,
        ),
    )?;

    Ok(SendOutcome::Delivered(Delivery {
        message_id,
        recipient_count: audience.len(),
        recipient_label,
    }))
}

fn expand(
    conn: &Connection,
    selector: &Selector,
) -> Result<(String, Vec<PersonRef>), SendError> {
    match selector {
        Selector::Class { class_code } => {
            let class = directory::class_by_code(conn, class_code)?
                .ok_or(SendError::NotFound("class"))?;
            let students = directory::students_of_class(conn, &class.id)?;
            Ok((class.name, students))
        }
        Selector::ClassParents { class_code } => {
            let class = directory::class_by_code(conn, class_code)?
                .ok_or(SendError::NotFound("class"))?;
            let mut parents = Vec::new();
            for student in directory::students_of_class(conn, &class.id)? {
                parents.extend(directory::parents_of_student(conn, &student.user_id)?);
            }
            Ok((format!("{} parents", class.name), parents))
        }
        Selector::SubjectTeachers { subject_code } => {
            let subject = directory::subject_by_code(conn, subject_code)?
                .ok_or(SendError::NotFound("subject"))?;
            let teachers = directory::teachers_of_subject(conn, &subject.id)?;
            Ok((format!("{} teachers", subject.name), teachers))
        }
        Selector::Student { user_id } => {
            let student = directory::student_by_user(conn, user_id)?
                .ok_or(SendError::NotFound("student"))?;
            let label = student.display_name();
            Ok((label, vec![student]))
        }
        Selector::StudentParents { user_id } => {
            let student = directory::student_by_user(conn, user_id)?
                .ok_or(SendError::NotFound("student"))?;
            let parents = directory::parents_of_student(conn, &student.user_id)?;
            Ok((format!("{} parents", student.display_name()), parents))
        }
        Selector::Managers => {
            let managers = directory::managers(conn)?;
            Ok(("Managers".to_string(), managers))
        }
        Selector::Teacher { user_id } => {
            let teacher = directory::teacher_by_user(conn, user_id)?
                .ok_or(SendError::NotFound("teacher"))?;
            let label = teacher.display_name();
            Ok((label, vec![teacher]))
        }
    }
}

#[derive(Debug)]
pub enum ReadError {
    NotFound,
    /// The requesting user is not the entry's recipient.
    Forbidden,
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for ReadError {
    fn from(e: rusqlite::Error) -> Self {
        ReadError::Db(e)
    }
}

#[derive(Debug)]
pub struct ReadReceipt {
    pub already_read: bool,
}

/// Flip an inbox entry's read flag false -> true. Only the entry's own
/// recipient may open it; re-opening an already-read entry is a no-op.
pub fn mark_read(
    conn: &Connection,
    entry_id: &str,
    requesting_user_id: &str,
) -> Result<ReadReceipt, ReadError> {
    let row: Option<(String, bool)> = conn
        .query_row(
            "SELECT r.user_id, mr.read
             FROM mailbox_received mr
             JOIN recipients r ON r.id = mr.recipient_id
             WHERE mr.id = ?",
            [entry_id],
            |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0)),
        )
        .optional()?;

    let Some((owner_user_id, already_read)) = row else {
        return Err(ReadError::NotFound);
    };
    if owner_user_id != requesting_user_id {
        return Err(ReadError::Forbidden);
    }
    if !already_read {
        conn.execute("UPDATE mailbox_received SET read = 1 WHERE id = ?", [entry_id])?;
    }
    Ok(ReadReceipt { already_read })
}
