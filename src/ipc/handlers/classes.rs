use crate::directory;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::util::{opt_bool, require_i64, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    let include_inactive = opt_bool(&req.params, "includeInactive").unwrap_or(false);

    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let sql = format!(
        "SELECT
           c.id,
           c.unique_code,
           c.name,
           c.year,
           c.active,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM subjects sub WHERE sub.class_id = c.id) AS subject_count
         FROM school_classes c
         {}
         ORDER BY c.year DESC, c.name",
        if include_inactive {
            ""
        } else {
            "WHERE c.active = 1"
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "classCode": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "year": row.get::<_, i64>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
                "studentCount": row.get::<_, i64>(5)?,
                "subjectCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match require_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let year = match require_i64(&req.params, "year") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !(1800..=9999).contains(&year) {
        return err(
            &req.id,
            "validation_failed",
            "year must be a four-digit school year",
            Some(json!({ "year": year })),
        );
    }

    // Code format mirrors the enrollment convention: class name + year.
    let unique_code = format!("{}{}", name, year);
    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO school_classes(id, unique_code, name, year, active)
         VALUES(?, ?, ?, ?, 1)",
        (&class_id, &unique_code, &name, year),
    ) {
        if matches!(
            e.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        ) {
            return err(
                &req.id,
                "conflict",
                "a class with this code already exists",
                Some(json!({ "classCode": unique_code })),
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "school_classes" })),
        );
    }

    ok(
        &req.id,
        json!({ "classId": class_id, "classCode": unique_code, "name": name, "year": year }),
    )
}

fn handle_classes_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_code = match require_str(&req.params, "classCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let active = match req.params.get("active").and_then(|v| v.as_bool()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing active", None),
    };

    let class = match directory::class_by_code(conn, &class_code) {
        Ok(Some(c)) => c,
        Ok(None) => return HandlerErr::not_found("class").response(&req.id),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = conn.execute(
        "UPDATE school_classes SET active = ? WHERE id = ?",
        (active as i64, &class.id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "classCode": class.unique_code, "active": active }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.setActive" => Some(handle_classes_set_active(state, req)),
        _ => None,
    }
}
