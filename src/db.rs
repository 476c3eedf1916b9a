use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_classes(
            id TEXT PRIMARY KEY,
            unique_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            year INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            user_id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            birthday TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(class_id) REFERENCES school_classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            user_id TEXT PRIMARY KEY,
            student_user_id TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(student_user_id) REFERENCES students(user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parents_student ON parents(student_user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            user_id TEXT PRIMARY KEY,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            unique_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            class_id TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES school_classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_teachers(
            subject_id TEXT NOT NULL,
            teacher_user_id TEXT NOT NULL,
            PRIMARY KEY(subject_id, teacher_user_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_user_id) REFERENCES teachers(user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_teachers_teacher
         ON subject_teachers(teacher_user_id)",
        [],
    )?;

    // Timetable slot: one (day, lesson) pair may appear once per subject.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_slots(
            subject_id TEXT NOT NULL,
            day TEXT NOT NULL,
            lesson INTEGER NOT NULL,
            PRIMARY KEY(subject_id, day, lesson),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_user_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            value INTEGER NOT NULL,
            manager_mode INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_user_id) REFERENCES students(user_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_subject ON grades(subject_id)",
        [],
    )?;

    // Append-only audit trail: a canceled grade keeps its original value and
    // creation date, never mutated after insert.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS canceled_grades(
            id TEXT PRIMARY KEY,
            student_user_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            value INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            canceled_at TEXT NOT NULL,
            FOREIGN KEY(student_user_id) REFERENCES students(user_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_canceled_grades_subject
         ON canceled_grades(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS senders(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL UNIQUE,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(message_id) REFERENCES messages(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recipients(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(message_id) REFERENCES messages(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recipients_message ON recipients(message_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mailbox_received(
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(sender_id) REFERENCES senders(id),
            FOREIGN KEY(recipient_id) REFERENCES recipients(id),
            FOREIGN KEY(message_id) REFERENCES messages(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mailbox_received_message
         ON mailbox_received(message_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mailbox_sent(
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            message_id TEXT NOT NULL UNIQUE,
            recipient_label TEXT NOT NULL,
            FOREIGN KEY(sender_id) REFERENCES senders(id),
            FOREIGN KEY(message_id) REFERENCES messages(id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
