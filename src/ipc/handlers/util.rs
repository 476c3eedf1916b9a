use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::err;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(what: &str) -> Self {
        HandlerErr {
            code: "not_found",
            message: format!("{} not found", what),
            details: None,
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn require_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn require_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_bool(params: &serde_json::Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

/// Create a user row with a username derived from the person's name,
/// disambiguated with a numeric suffix when taken. Passwords are not
/// managed here; authentication lives outside this daemon.
pub fn create_user(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    role: &str,
) -> Result<String, HandlerErr> {
    let base = format!("{}.{}", first_name, last_name)
        .to_lowercase()
        .replace(char::is_whitespace, "");

    let mut username = base.clone();
    let mut numbering = 2u32;
    loop {
        let taken: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?",
                [&username],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?;
        if taken == 0 {
            break;
        }
        username = format!("{}{}", base, numbering);
        numbering += 1;
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, first_name, last_name, role, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &username,
            first_name,
            last_name,
            role,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;
    Ok(user_id)
}
