use crate::directory;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::util::{require_i64, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const DAYS: [&str; 6] = ["Mo", "Tu", "We", "Th", "Fr", "St"];
const LESSON_MIN: i64 = 1;
const LESSON_MAX: i64 = 8;

fn resolve_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<directory::SubjectRow, HandlerErr> {
    let code = require_str(params, "subjectCode")?;
    directory::subject_by_code(conn, &code)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found("subject"))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_code = match require_str(&req.params, "classCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = match require_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let shortcut = match require_str(&req.params, "shortcut") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let class = match directory::class_by_code(conn, &class_code) {
        Ok(Some(c)) => c,
        Ok(None) => return HandlerErr::not_found("class").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Subject code = shortcut + class code, unique across the school.
    let unique_code = format!("{}{}", shortcut, class.unique_code);
    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, unique_code, name, class_id) VALUES(?, ?, ?, ?)",
        (&subject_id, &unique_code, &name, &class.id),
    ) {
        if matches!(
            e.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        ) {
            return err(
                &req.id,
                "conflict",
                "a subject with this shortcut already exists for the class",
                Some(json!({ "subjectCode": unique_code })),
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(
        &req.id,
        json!({ "subjectId": subject_id, "subjectCode": unique_code, "name": name }),
    )
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_code = match require_str(&req.params, "classCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let class = match directory::class_by_code(conn, &class_code) {
        Ok(Some(c)) => c,
        Ok(None) => return HandlerErr::not_found("class").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.unique_code, s.name,
           (SELECT COUNT(*) FROM subject_teachers st WHERE st.subject_id = s.id),
           (SELECT COUNT(*) FROM subject_slots sl WHERE sl.subject_id = s.id)
         FROM subjects s WHERE s.class_id = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class.id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subjectCode": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "teacherCount": row.get::<_, i64>(3)?,
                "slotCount": row.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(
            &req.id,
            json!({ "classCode": class.unique_code, "subjects": subjects }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match resolve_subject(conn, &req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps = || -> Result<(), rusqlite::Error> {
        tx.execute(
            "DELETE FROM subject_slots WHERE subject_id = ?",
            [&subject.id],
        )?;
        tx.execute(
            "DELETE FROM subject_teachers WHERE subject_id = ?",
            [&subject.id],
        )?;
        tx.execute("DELETE FROM grades WHERE subject_id = ?", [&subject.id])?;
        tx.execute(
            "DELETE FROM canceled_grades WHERE subject_id = ?",
            [&subject.id],
        )?;
        tx.execute("DELETE FROM subjects WHERE id = ?", [&subject.id])?;
        Ok(())
    };
    if let Err(e) = steps() {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": true }))
}

fn handle_subject_teachers_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match resolve_subject(conn, &req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let teacher_user_id = match require_str(&req.params, "teacherUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match directory::teacher_by_user(conn, &teacher_user_id) {
        Ok(Some(_)) => {}
        Ok(None) => return HandlerErr::not_found("teacher").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Re-assigning an already assigned teacher is a no-op.
    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO subject_teachers(subject_id, teacher_user_id) VALUES(?, ?)",
        (&subject.id, &teacher_user_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "subjectCode": subject.unique_code, "teacherUserId": teacher_user_id }),
    )
}

fn handle_subject_teachers_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match resolve_subject(conn, &req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let teacher_user_id = match require_str(&req.params, "teacherUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let removed = match conn.execute(
        "DELETE FROM subject_teachers WHERE subject_id = ? AND teacher_user_id = ?",
        (&subject.id, &teacher_user_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if removed == 0 {
        return HandlerErr::not_found("subject teacher").response(&req.id);
    }

    ok(&req.id, json!({ "removed": true }))
}

fn handle_subject_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match resolve_subject(conn, &req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match directory::teachers_of_subject(conn, &subject.id) {
        Ok(teachers) => ok(
            &req.id,
            json!({
                "subjectCode": subject.unique_code,
                "teachers": teachers.iter().map(|t| json!({
                    "userId": t.user_id,
                    "name": t.display_name()
                })).collect::<Vec<_>>()
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_slot(params: &serde_json::Value) -> Result<(String, i64), HandlerErr> {
    let day = require_str(params, "day")?;
    if !DAYS.contains(&day.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "day must be one of {}",
            DAYS.join(", ")
        )));
    }
    let lesson = require_i64(params, "lesson")?;
    if !(LESSON_MIN..=LESSON_MAX).contains(&lesson) {
        return Err(HandlerErr::bad_params(format!(
            "lesson must be in {}..={}",
            LESSON_MIN, LESSON_MAX
        )));
    }
    Ok((day, lesson))
}

fn handle_schedule_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match resolve_subject(conn, &req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let (day, lesson) = match parse_slot(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO subject_slots(subject_id, day, lesson) VALUES(?, ?, ?)",
        (&subject.id, &day, lesson),
    ) {
        if matches!(
            e.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        ) {
            return err(
                &req.id,
                "conflict",
                "this slot is already scheduled for the subject",
                Some(json!({ "day": day, "lesson": lesson })),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "subjectCode": subject.unique_code, "day": day, "lesson": lesson }),
    )
}

fn handle_schedule_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match resolve_subject(conn, &req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let (day, lesson) = match parse_slot(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let removed = match conn.execute(
        "DELETE FROM subject_slots WHERE subject_id = ? AND day = ? AND lesson = ?",
        (&subject.id, &day, lesson),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if removed == 0 {
        return HandlerErr::not_found("slot").response(&req.id);
    }

    ok(&req.id, json!({ "removed": true }))
}

fn handle_schedule_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject = match resolve_subject(conn, &req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT day, lesson FROM subject_slots WHERE subject_id = ? ORDER BY lesson, day",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&subject.id], |row| {
            Ok(json!({
                "day": row.get::<_, String>(0)?,
                "lesson": row.get::<_, i64>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(slots) => ok(
            &req.id,
            json!({ "subjectCode": subject.unique_code, "slots": slots }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.teachers.add" => Some(handle_subject_teachers_add(state, req)),
        "subjects.teachers.remove" => Some(handle_subject_teachers_remove(state, req)),
        "subjects.teachers.list" => Some(handle_subject_teachers_list(state, req)),
        "subjects.schedule.add" => Some(handle_schedule_add(state, req)),
        "subjects.schedule.remove" => Some(handle_schedule_remove(state, req)),
        "subjects.schedule.list" => Some(handle_schedule_list(state, req)),
        _ => None,
    }
}
