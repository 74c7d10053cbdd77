use crate::ipc::error::{err, ok};
use crate::ipc::helpers::now_stamp;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_messages_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut fields = Vec::with_capacity(6);
    for key in [
        "senderId",
        "senderRole",
        "recipientId",
        "recipientRole",
        "subject",
        "body",
    ] {
        match req.params.get(key).and_then(|v| v.as_str()) {
            Some(v) => fields.push(v.to_string()),
            None => return err(&req.id, "bad_params", format!("missing {}", key), None),
        }
    }

    let message_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO messages(id, sender_id, sender_role, recipient_id, recipient_role,
                              subject, body, sent_on, read)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0)",
        (
            &message_id,
            &fields[0],
            &fields[1],
            &fields[2],
            &fields[3],
            &fields[4],
            &fields[5],
            &now_stamp(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "messages" })),
        );
    }

    ok(&req.id, json!({ "messageId": message_id }))
}

fn handle_messages_inbox(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let recipient_role = match req.params.get("recipientRole").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing recipientRole", None),
    };
    let recipient_id = match req.params.get("recipientId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing recipientId", None),
    };
    let unread_only = req
        .params
        .get("unreadOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if unread_only {
        "SELECT id, sender_id, sender_role, subject, body, sent_on, read
         FROM messages
         WHERE recipient_role = ? AND recipient_id = ? AND read = 0
         ORDER BY sent_on DESC, id"
    } else {
        "SELECT id, sender_id, sender_role, subject, body, sent_on, read
         FROM messages
         WHERE recipient_role = ? AND recipient_id = ?
         ORDER BY sent_on DESC, id"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&recipient_role, &recipient_id), |r| {
            let id: String = r.get(0)?;
            let sender_id: String = r.get(1)?;
            let sender_role: String = r.get(2)?;
            let subject: String = r.get(3)?;
            let body: String = r.get(4)?;
            let sent_on: String = r.get(5)?;
            let read: i64 = r.get(6)?;
            Ok(json!({
                "id": id,
                "senderId": sender_id,
                "senderRole": sender_role,
                "subject": subject,
                "body": body,
                "sentOn": sent_on,
                "read": read != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(messages) => ok(&req.id, json!({ "messages": messages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_messages_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let message_id = match req.params.get("messageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing messageId", None),
    };

    // Marking twice is harmless; only a missing id is an error.
    match conn.execute("UPDATE messages SET read = 1 WHERE id = ?", [&message_id]) {
        Ok(0) => err(&req.id, "not_found", "message not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "messages" })),
        ),
    }
}

fn handle_messages_unread_count(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let recipient_role = match req.params.get("recipientRole").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing recipientRole", None),
    };
    let recipient_id = match req.params.get("recipientId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing recipientId", None),
    };

    match conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE recipient_role = ? AND recipient_id = ? AND read = 0",
        (&recipient_role, &recipient_id),
        |r| r.get::<_, i64>(0),
    ) {
        Ok(count) => ok(&req.id, json!({ "unread": count })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.send" => Some(handle_messages_send(state, req)),
        "messages.inbox" => Some(handle_messages_inbox(state, req)),
        "messages.markRead" => Some(handle_messages_mark_read(state, req)),
        "messages.unreadCount" => Some(handle_messages_unread_count(state, req)),
        _ => None,
    }
}
