use crate::directory;
use crate::dispatch::{self, SendError, SendOutcome};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::util::{opt_bool, require_i64, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, LedgerError, GRADE_MAX, GRADE_MIN};
use crate::notify::{self, GradeEvent};
use rusqlite::Connection;
use serde_json::json;

fn ledger_err(e: LedgerError) -> HandlerErr {
    match e {
        LedgerError::BadValue(v) => HandlerErr {
            code: "validation_failed",
            message: format!("grade value must be in [{}, {}]", GRADE_MIN, GRADE_MAX),
            details: Some(json!({ "value": v })),
        },
        LedgerError::NotFound => HandlerErr::not_found("grade"),
        LedgerError::Db(e) => HandlerErr::db(e),
    }
}

fn send_err(e: SendError) -> HandlerErr {
    match e {
        SendError::NotFound(what) => HandlerErr::not_found(what),
        SendError::Db(e) => HandlerErr::db(e),
    }
}

fn notification_json(outcome: &SendOutcome) -> serde_json::Value {
    match outcome {
        SendOutcome::Delivered(d) => json!({
            "messageId": d.message_id,
            "delivered": d.recipient_count,
            "recipientLabel": d.recipient_label
        }),
        SendOutcome::EmptyAudience { recipient_label } => json!({
            "delivered": 0,
            "emptyAudience": true,
            "recipientLabel": recipient_label
        }),
    }
}

fn handle_grades_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor_user_id = match require_str(&req.params, "actorUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let student_user_id = match require_str(&req.params, "studentUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_code = match require_str(&req.params, "subjectCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let value = match require_i64(&req.params, "value") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let manager_mode = opt_bool(&req.params, "managerMode").unwrap_or(false);

    let subject = match directory::subject_by_code(conn, &subject_code) {
        Ok(Some(s)) => s,
        Ok(None) => return HandlerErr::not_found("subject").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_class = match directory::student_class_id(conn, &student_user_id) {
        Ok(Some(c)) => c,
        Ok(None) => return HandlerErr::not_found("student").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_class != subject.class_id {
        return err(
            &req.id,
            "validation_failed",
            "student is not enrolled in the subject's class",
            Some(json!({ "subjectCode": subject.unique_code })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Ledger write and notification fan-out are one unit of work: a student
    // never sees a grade without its inbox entry or vice versa.
    let grade = match ledger::record_grade(&tx, &student_user_id, &subject.id, value, manager_mode)
    {
        Ok(g) => g,
        Err(e) => {
            let _ = tx.rollback();
            return ledger_err(e).response(&req.id);
        }
    };
    let (draft, selector) = notify::for_event(&GradeEvent::Added {
        student_user_id: &student_user_id,
        subject_name: &subject.name,
        value,
    });
    let outcome = match dispatch::deliver(&tx, &actor_user_id, &draft, &selector) {
        Ok(o) => o,
        Err(e) => {
            let _ = tx.rollback();
            return send_err(e).response(&req.id);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "gradeId": grade.id,
            "value": grade.value,
            "managerMode": grade.manager_mode,
            "createdAt": grade.created_at,
            "notification": notification_json(&outcome)
        }),
    )
}

fn handle_grades_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor_user_id = match require_str(&req.params, "actorUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let grade_id = match require_str(&req.params, "gradeId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let canceled = match ledger::cancel_grade(&tx, &grade_id) {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.rollback();
            return ledger_err(e).response(&req.id);
        }
    };
    let subject_name = match directory::subject_name(&tx, &canceled.subject_id) {
        Ok(Some(n)) => n,
        Ok(None) => {
            let _ = tx.rollback();
            return HandlerErr::not_found("subject").response(&req.id);
        }
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    let (draft, selector) = notify::for_event(&GradeEvent::Canceled {
        student_user_id: &canceled.student_user_id,
        subject_name: &subject_name,
        value: canceled.value,
    });
    let outcome = match dispatch::deliver(&tx, &actor_user_id, &draft, &selector) {
        Ok(o) => o,
        Err(e) => {
            let _ = tx.rollback();
            return send_err(e).response(&req.id);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "canceledGradeId": canceled.id,
            "value": canceled.value,
            "createdAt": canceled.created_at,
            "canceledAt": canceled.canceled_at,
            "notification": notification_json(&outcome)
        }),
    )
}

fn grade_rows(
    conn: &Connection,
    subject_id: &str,
    student_user_id: Option<&str>,
    manager_mode: Option<bool>,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT g.id, g.student_user_id, u.first_name, u.last_name, g.value,
                g.manager_mode, g.created_at
         FROM grades g JOIN users u ON u.id = g.student_user_id
         WHERE g.subject_id = ?1",
    );
    if student_user_id.is_some() {
        sql.push_str(" AND g.student_user_id = ?2");
    }
    if let Some(mode) = manager_mode {
        sql.push_str(if mode {
            " AND g.manager_mode = 1"
        } else {
            " AND g.manager_mode = 0"
        });
    }
    sql.push_str(" ORDER BY g.created_at");

    let mut stmt = conn.prepare(&sql)?;
    let map = |row: &rusqlite::Row<'_>| {
        Ok(json!({
            "gradeId": row.get::<_, String>(0)?,
            "studentUserId": row.get::<_, String>(1)?,
            "studentName": format!(
                "{} {}",
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?
            ),
            "value": row.get::<_, i64>(4)?,
            "managerMode": row.get::<_, i64>(5)? != 0,
            "createdAt": row.get::<_, String>(6)?
        }))
    };
    let rows = match student_user_id {
        Some(sid) => stmt.query_map((subject_id, sid), map)?.collect(),
        None => stmt.query_map([subject_id], map)?.collect(),
    };
    rows
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_code = match require_str(&req.params, "subjectCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject = match directory::subject_by_code(conn, &subject_code) {
        Ok(Some(s)) => s,
        Ok(None) => return HandlerErr::not_found("subject").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_user_id = req
        .params
        .get("studentUserId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let manager_mode = opt_bool(&req.params, "managerMode");

    match grade_rows(conn, &subject.id, student_user_id.as_deref(), manager_mode) {
        Ok(grades) => ok(
            &req.id,
            json!({ "subjectCode": subject.unique_code, "grades": grades }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(50)
        .clamp(1, 500);

    let manager_grades = {
        let mut stmt = match conn.prepare(
            "SELECT g.id, g.student_user_id, s.name, g.value, g.created_at
             FROM grades g JOIN subjects s ON s.id = g.subject_id
             WHERE g.manager_mode = 1
             ORDER BY g.created_at DESC LIMIT ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([limit], |row| {
                Ok(json!({
                    "gradeId": row.get::<_, String>(0)?,
                    "studentUserId": row.get::<_, String>(1)?,
                    "subjectName": row.get::<_, String>(2)?,
                    "value": row.get::<_, i64>(3)?,
                    "createdAt": row.get::<_, String>(4)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let canceled = {
        let mut stmt = match conn.prepare(
            "SELECT c.id, c.student_user_id, s.name, c.value, c.created_at, c.canceled_at
             FROM canceled_grades c JOIN subjects s ON s.id = c.subject_id
             ORDER BY c.canceled_at DESC LIMIT ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([limit], |row| {
                Ok(json!({
                    "canceledGradeId": row.get::<_, String>(0)?,
                    "studentUserId": row.get::<_, String>(1)?,
                    "subjectName": row.get::<_, String>(2)?,
                    "value": row.get::<_, i64>(3)?,
                    "createdAt": row.get::<_, String>(4)?,
                    "canceledAt": row.get::<_, String>(5)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    ok(
        &req.id,
        json!({ "managerGrades": manager_grades, "canceledGrades": canceled }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.record" => Some(handle_grades_record(state, req)),
        "grades.cancel" => Some(handle_grades_cancel(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.history" => Some(handle_grades_history(state, req)),
        _ => None,
    }
}
