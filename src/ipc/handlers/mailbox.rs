use crate::dispatch::{self, MessageDraft, ReadError, Selector, SendError, SendOutcome};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::util::{require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const MAX_SUBJECT_CHARS: usize = 128;
const MAX_BODY_CHARS: usize = 1024;

fn parse_selector(params: &serde_json::Value) -> Result<Selector, HandlerErr> {
    let Some(selector) = params.get("selector") else {
        return Err(HandlerErr::bad_params("missing selector"));
    };
    let kind = selector
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing selector.kind"))?;

    let field = |key: &str| -> Result<String, HandlerErr> {
        selector
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| HandlerErr::bad_params(format!("missing selector.{}", key)))
    };

    match kind {
        "class" => Ok(Selector::Class {
            class_code: field("classCode")?,
        }),
        "classParents" => Ok(Selector::ClassParents {
            class_code: field("classCode")?,
        }),
        "subjectTeachers" => Ok(Selector::SubjectTeachers {
            subject_code: field("subjectCode")?,
        }),
        "singleStudent" => Ok(Selector::Student {
            user_id: field("studentUserId")?,
        }),
        "studentParents" => Ok(Selector::StudentParents {
            user_id: field("studentUserId")?,
        }),
        "allManagers" => Ok(Selector::Managers),
        "singleTeacher" => Ok(Selector::Teacher {
            user_id: field("teacherUserId")?,
        }),
        other => Err(HandlerErr {
            code: "bad_params",
            message: "selector.kind must be one of: class, classParents, subjectTeachers, \
                      singleStudent, studentParents, allManagers, singleTeacher"
                .to_string(),
            details: Some(json!({ "kind": other })),
        }),
    }
}

fn handle_mailbox_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor_user_id = match require_str(&req.params, "actorUserId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject = match require_str(&req.params, "subject") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let text = match require_str(&req.params, "text") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if subject.chars().count() > MAX_SUBJECT_CHARS {
        return err(
            &req.id,
            "validation_failed",
            format!("subject exceeds {} characters", MAX_SUBJECT_CHARS),
            None,
        );
    }
    if text.chars().count() > MAX_BODY_CHARS {
        return err(
            &req.id,
            "validation_failed",
            format!("text exceeds {} characters", MAX_BODY_CHARS),
            None,
        );
    }
    let selector = match parse_selector(&req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    let draft = MessageDraft {
        subject,
        body: text,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let outcome = match dispatch::deliver(&tx, &actor_user_id, &draft, &selector) {
        Ok(o) => o,
        Err(SendError::NotFound(what)) => {
            let _ = tx.rollback();
            return HandlerErr::not_found(what).response(&req.id);
        }
        Err(SendError::Db(e)) => {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match outcome {
        SendOutcome::Delivered(d) => ok(
            &req.id,
            json!({
                "messageId": d.message_id,
                "delivered": d.recipient_count,
                "recipientLabel": d.recipient_label
            }),
        ),
        // Nothing was written; the caller decides whether an empty audience
        // is worth reporting to the user.
        SendOutcome::EmptyAudience { recipient_label } => ok(
            &req.id,
            json!({
                "delivered": 0,
                "emptyAudience": true,
                "recipientLabel": recipient_label
            }),
        ),
    }
}

fn handle_received_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT mr.id, m.id, m.subject, m.body, m.created_at, mr.read,
                su.first_name, su.last_name
         FROM mailbox_received mr
         JOIN recipients r ON r.id = mr.recipient_id
         JOIN messages m ON m.id = mr.message_id
         JOIN senders sn ON sn.id = mr.sender_id
         JOIN users su ON su.id = sn.user_id
         WHERE r.user_id = ?
         ORDER BY m.created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&user_id], |row| {
            Ok(json!({
                "entryId": row.get::<_, String>(0)?,
                "messageId": row.get::<_, String>(1)?,
                "subject": row.get::<_, String>(2)?,
                "text": row.get::<_, String>(3)?,
                "createdAt": row.get::<_, String>(4)?,
                "read": row.get::<_, i64>(5)? != 0,
                "senderName": format!(
                    "{} {}",
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?
                )
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(received) => ok(&req.id, json!({ "received": received })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sent_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT ms.id, m.id, m.subject, m.body, m.created_at, ms.recipient_label
         FROM mailbox_sent ms
         JOIN senders sn ON sn.id = ms.sender_id
         JOIN messages m ON m.id = ms.message_id
         WHERE sn.user_id = ?
         ORDER BY m.created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&user_id], |row| {
            Ok(json!({
                "sentId": row.get::<_, String>(0)?,
                "messageId": row.get::<_, String>(1)?,
                "subject": row.get::<_, String>(2)?,
                "text": row.get::<_, String>(3)?,
                "createdAt": row.get::<_, String>(4)?,
                "recipientLabel": row.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sent) => ok(&req.id, json!({ "sent": sent })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_unread_count(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let count: Result<i64, _> = conn.query_row(
        "SELECT COUNT(*)
         FROM mailbox_received mr
         JOIN recipients r ON r.id = mr.recipient_id
         WHERE r.user_id = ? AND mr.read = 0",
        [&user_id],
        |r| r.get(0),
    );
    match count {
        Ok(unread) => ok(&req.id, json!({ "unread": unread })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let entry_id = match require_str(&req.params, "entryId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match dispatch::mark_read(conn, &entry_id, &user_id) {
        Ok(receipt) => ok(
            &req.id,
            json!({ "read": true, "alreadyRead": receipt.already_read }),
        ),
        Err(ReadError::NotFound) => HandlerErr::not_found("inbox entry").response(&req.id),
        Err(ReadError::Forbidden) => err(
            &req.id,
            "forbidden",
            "only the recipient may open this entry",
            None,
        ),
        Err(ReadError::Db(e)) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "mailbox.send" => Some(handle_mailbox_send(state, req)),
        "mailbox.received.list" => Some(handle_received_list(state, req)),
        "mailbox.sent.list" => Some(handle_sent_list(state, req)),
        "mailbox.unreadCount" => Some(handle_unread_count(state, req)),
        "mailbox.markRead" => Some(handle_mark_read(state, req)),
        _ => None,
    }
}
