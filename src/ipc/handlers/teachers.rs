use crate::directory;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::util::{create_user, opt_bool, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let first_name = match require_str(&req.params, "firstName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let last_name = match require_str(&req.params, "lastName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let user_id = match create_user(&tx, &first_name, &last_name, "teacher") {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
    };
    if let Err(e) = tx.execute("INSERT INTO teachers(user_id) VALUES(?)", [&user_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "teacherUserId": user_id }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };
    let include_inactive = opt_bool(&req.params, "includeInactive").unwrap_or(false);

    let sql = format!(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.active,
           (SELECT COUNT(*) FROM subject_teachers st WHERE st.teacher_user_id = u.id)
         FROM teachers t JOIN users u ON u.id = t.user_id
         {}
         ORDER BY u.last_name, u.first_name",
        if include_inactive {
            ""
        } else {
            "WHERE u.active = 1"
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "userId": row.get::<_, String>(0)?,
                "username": row.get::<_, String>(1)?,
                "firstName": row.get::<_, String>(2)?,
                "lastName": row.get::<_, String>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
                "subjectCount": row.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_user_id = match require_str(&req.params, "teacherUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let active = match req.params.get("active").and_then(|v| v.as_bool()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing active", None),
    };

    match directory::teacher_by_user(conn, &teacher_user_id) {
        Ok(Some(_)) => {}
        Ok(None) => return HandlerErr::not_found("teacher").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE users SET active = ? WHERE id = ?",
        (active as i64, &teacher_user_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "teacherUserId": teacher_user_id, "active": active }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.setActive" => Some(handle_teachers_set_active(state, req)),
        _ => None,
    }
}
