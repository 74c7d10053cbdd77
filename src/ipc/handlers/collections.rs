use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn handle_collections_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let key = match req.params.get("key").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing key", None),
    };

    match store::load_collection(conn, &key) {
        Ok(loaded) => ok(
            &req.id,
            json!({ "items": loaded.items, "version": loaded.version }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_collections_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let key = match req.params.get("key").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing key", None),
    };
    let Some(items) = req.params.get("items").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "items must be an array", None);
    };
    let expected = req.params.get("expectedVersion").and_then(|v| v.as_i64());

    match store::save_collection(conn, &key, items, expected) {
        Ok(store::SaveOutcome::Saved { version }) => ok(&req.id, json!({ "version": version })),
        Ok(store::SaveOutcome::Conflict { expected, actual }) => err(
            &req.id,
            "version_conflict",
            "collection changed since it was loaded",
            Some(json!({ "expected": expected, "actual": actual })),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "collections.load" => Some(handle_collections_load(state, req)),
        "collections.save" => Some(handle_collections_save(state, req)),
        _ => None,
    }
}
