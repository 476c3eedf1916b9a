use crate::directory;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::util::{create_user, require_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

// Managers are plain user rows holding the manager role; they have no
// satellite table and no class/subject relations.

fn handle_managers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match create_user(conn, &first_name, &last_name, "manager") {
        Ok(user_id) => ok(&req.id, json!({ "managerUserId": user_id })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_managers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "managers": [] }));
    };
    match directory::managers(conn) {
        Ok(managers) => ok(
            &req.id,
            json!({
                "managers": managers.iter().map(|m| json!({
                    "userId": m.user_id,
                    "name": m.display_name()
                })).collect::<Vec<_>>()
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "managers.create" => Some(handle_managers_create(state, req)),
        "managers.list" => Some(handle_managers_list(state, req)),
        _ => None,
    }
}
