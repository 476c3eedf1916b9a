use crate::directory;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::util::{create_user, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const MAX_PARENTS: usize = 2;

struct ParentInput {
    first_name: String,
    last_name: String,
}

fn parse_parents(params: &serde_json::Value) -> Result<Vec<ParentInput>, HandlerErr> {
    let Some(list) = params.get("parents").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    if list.len() > MAX_PARENTS {
        return Err(HandlerErr::bad_params(format!(
            "a student may have at most {} parents",
            MAX_PARENTS
        )));
    }
    let mut out = Vec::new();
    for (i, entry) in list.iter().enumerate() {
        let first = entry.get("firstName").and_then(|v| v.as_str()).unwrap_or("");
        let last = entry.get("lastName").and_then(|v| v.as_str()).unwrap_or("");
        if first.trim().is_empty() || last.trim().is_empty() {
            return Err(HandlerErr::bad_params(format!(
                "parents[{}] needs firstName and lastName",
                i
            )));
        }
        out.push(ParentInput {
            first_name: first.trim().to_string(),
            last_name: last.trim().to_string(),
        });
    }
    Ok(out)
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_code = match require_str(&req.params, "classCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let first_name = match require_str(&req.params, "firstName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let last_name = match require_str(&req.params, "lastName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let birthday = req
        .params
        .get("birthday")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let parents = match parse_parents(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let class = match directory::class_by_code(conn, &class_code) {
        Ok(Some(c)) => c,
        Ok(None) => return HandlerErr::not_found("class").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Student user plus all parent users land together or not at all.
    let student_user_id = match create_user(&tx, &first_name, &last_name, "student") {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
    };
    if let Err(e) = tx.execute(
        "INSERT INTO students(user_id, class_id, birthday) VALUES(?, ?, ?)",
        (&student_user_id, &class.id, &birthday),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    let mut parent_user_ids = Vec::new();
    for parent in &parents {
        let parent_user_id = match create_user(&tx, &parent.first_name, &parent.last_name, "parent")
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return e.response(&req.id);
            }
        };
        if let Err(e) = tx.execute(
            "INSERT INTO parents(user_id, student_user_id) VALUES(?, ?)",
            (&parent_user_id, &student_user_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "parents" })),
            );
        }
        parent_user_ids.push(parent_user_id);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "studentUserId": student_user_id,
            "parentUserIds": parent_user_ids,
            "classCode": class.unique_code
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT u.id, u.username, u.first_name, u.last_name, s.birthday
         FROM students s JOIN users u ON u.id = s.user_id
         WHERE s.class_id = ?
         ORDER BY u.last_name, u.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut students = Vec::new();
    for (user_id, username, first_name, last_name, birthday) in rows {
        let parents = match directory::parents_of_student(conn, &user_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        students.push(json!({
            "userId": user_id,
            "username": username,
            "firstName": first_name,
            "lastName": last_name,
            "birthday": birthday,
            "parents": parents.iter().map(|p| json!({
                "userId": p.user_id,
                "name": p.display_name()
            })).collect::<Vec<_>>()
        }));
    }

    ok(
        &req.id,
        json!({ "classCode": class.unique_code, "students": students }),
    )
}

fn delete_user_mail(tx: &Connection, user_id: &str) -> Result<(), rusqlite::Error> {
    tx.execute(
        "DELETE FROM mailbox_received
         WHERE recipient_id IN (SELECT id FROM recipients WHERE user_id = ?)
            OR sender_id IN (SELECT id FROM senders WHERE user_id = ?)",
        [user_id, user_id],
    )?;
    tx.execute(
        "DELETE FROM mailbox_sent
         WHERE sender_id IN (SELECT id FROM senders WHERE user_id = ?)",
        [user_id],
    )?;
    tx.execute("DELETE FROM recipients WHERE user_id = ?", [user_id])?;
    tx.execute("DELETE FROM senders WHERE user_id = ?", [user_id])?;
    Ok(())
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_user_id = match require_str(&req.params, "studentUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match directory::student_by_user(conn, &student_user_id) {
        Ok(Some(_)) => {}
        Ok(None) => return HandlerErr::not_found("student").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let parent_ids: Vec<String> = match directory::parents_of_student(conn, &student_user_id) {
        Ok(v) => v.into_iter().map(|p| p.user_id).collect(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let steps = || -> Result<(), rusqlite::Error> {
        for parent_id in &parent_ids {
            delete_user_mail(&tx, parent_id)?;
            tx.execute("DELETE FROM parents WHERE user_id = ?", [parent_id])?;
            tx.execute("DELETE FROM users WHERE id = ?", [parent_id])?;
        }
        delete_user_mail(&tx, &student_user_id)?;
        tx.execute(
            "DELETE FROM grades WHERE student_user_id = ?",
            [&student_user_id],
        )?;
        tx.execute(
            "DELETE FROM canceled_grades WHERE student_user_id = ?",
            [&student_user_id],
        )?;
        tx.execute(
            "DELETE FROM students WHERE user_id = ?",
            [&student_user_id],
        )?;
        tx.execute("DELETE FROM users WHERE id = ?", [&student_user_id])?;
        Ok(())
    };
    if let Err(e) = steps() {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "deleted": true, "parentUserIds": parent_ids }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
