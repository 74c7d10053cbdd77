use crate::ipc::error::{err, ok};
use crate::ipc::helpers::now_stamp;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_faculty_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Include slot counts so the admin dashboard can show live duty load.
    let mut stmt = match conn.prepare(
        "SELECT
           f.id,
           f.name,
           f.department,
           f.designation,
           f.email,
           (SELECT COUNT(*) FROM assignment_slots sl WHERE sl.faculty_id = f.id) AS slot_count,
           (SELECT COUNT(*) FROM student_assignments sa
              JOIN assignment_slots sl ON sl.id = sa.slot_id
             WHERE sl.faculty_id = f.id) AS student_count
         FROM faculty f
         ORDER BY f.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let department: String = row.get(2)?;
            let designation: Option<String> = row.get(3)?;
            let email: Option<String> = row.get(4)?;
            let slot_count: i64 = row.get(5)?;
            let student_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "department": department,
                "designation": designation,
                "email": email,
                "slotCount": slot_count,
                "assignedStudentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(faculty) => ok(&req.id, json!({ "faculty": faculty })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_faculty_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let department = match req.params.get("department").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing department", None),
    };
    let designation = req
        .params
        .get("designation")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let faculty_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO faculty(id, name, department, designation, email, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &faculty_id,
            &name,
            &department,
            &designation,
            &email,
            &now_stamp(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "faculty" })),
        );
    }

    ok(&req.id, json!({ "facultyId": faculty_id, "name": name }))
}

fn handle_faculty_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let faculty_id = match req.params.get("facultyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing facultyId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM faculty WHERE id = ?", [&faculty_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "faculty not found", None);
    }

    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    for (key, column) in [
        ("name", "name"),
        ("department", "department"),
        ("designation", "designation"),
        ("email", "email"),
    ] {
        if let Some(v) = patch.get(key).and_then(|v| v.as_str()) {
            sets.push(format!("{} = ?", column));
            binds.push(v.to_string());
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }
    binds.push(faculty_id.clone());
    let sql = format!("UPDATE faculty SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(binds.iter())) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "faculty" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_faculty_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let faculty_id = match req.params.get("facultyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing facultyId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM faculty WHERE id = ?", [&faculty_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "faculty not found", None);
    }

    // Slots must be removed first so assigned students are not orphaned
    // silently; the UI prompts for reassignment before calling this.
    let slots: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM assignment_slots WHERE faculty_id = ?",
        [&faculty_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if slots > 0 {
        return err(
            &req.id,
            "invalid_state",
            "faculty still holds assignment slots",
            Some(json!({ "slotCount": slots })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM faculty WHERE id = ?", [&faculty_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "faculty" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.list" => Some(handle_faculty_list(state, req)),
        "faculty.create" => Some(handle_faculty_create(state, req)),
        "faculty.update" => Some(handle_faculty_update(state, req)),
        "faculty.delete" => Some(handle_faculty_delete(state, req)),
        _ => None,
    }
}
