use crate::ipc::error::{err, ok};
use crate::ipc::helpers::now_stamp;
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let hall_ticket: String = r.get(1)?;
    let name: String = r.get(2)?;
    let year: String = r.get(3)?;
    let section: String = r.get(4)?;
    let branch: String = r.get(5)?;
    let cgpa: Option<f64> = r.get(6)?;
    let attendance_percent: Option<f64> = r.get(7)?;
    let status: String = r.get(8)?;
    Ok(json!({
        "id": id,
        "hallTicket": hall_ticket,
        "name": name,
        "year": year,
        "section": section,
        "branch": branch,
        "cgpa": cgpa,
        "attendancePercent": attendance_percent,
        "status": status
    }))
}

const STUDENT_COLS: &str =
    "id, hall_ticket, name, year, section, branch, cgpa, attendance_percent, status";

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    for (key, column) in [
        ("year", "year"),
        ("section", "section"),
        ("branch", "branch"),
        ("status", "status"),
    ] {
        if let Some(v) = req.params.get(key).and_then(|v| v.as_str()) {
            clauses.push(column);
            binds.push(v.to_string());
        }
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = clauses.iter().map(|c| format!("{} = ?", c)).collect();
        format!(" WHERE {}", parts.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM students{} ORDER BY hall_ticket",
        STUDENT_COLS, where_sql
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |r| student_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS);
    let row = conn
        .query_row(&sql, [&student_id], |r| student_row_json(r))
        .optional();
    match row {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut fields = Vec::with_capacity(5);
    for key in ["hallTicket", "name", "year", "section", "branch"] {
        match req.params.get(key).and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => fields.push(v.trim().to_string()),
            _ => return err(&req.id, "bad_params", format!("missing {}", key), None),
        }
    }
    let cgpa = req.params.get("cgpa").and_then(|v| v.as_f64());
    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("active")
        .to_string();

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE hall_ticket = ?",
            [&fields[0]],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "duplicate",
            "hall ticket already registered",
            Some(json!({ "hallTicket": fields[0] })),
        );
    }

    let student_id = Uuid::new_v4().to_string();
    let stamp = now_stamp();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, hall_ticket, name, year, section, branch, cgpa, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &fields[0],
            &fields[1],
            &fields[2],
            &fields[3],
            &fields[4],
            cgpa,
            &status,
            &stamp,
            &stamp,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "hallTicket": fields[0] }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Some(new_ticket) = patch.get("hallTicket").and_then(|v| v.as_str()) {
        let taken: Option<String> = match conn
            .query_row(
                "SELECT id FROM students WHERE hall_ticket = ?",
                [new_ticket],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if taken.map(|owner| owner != student_id).unwrap_or(false) {
            return err(
                &req.id,
                "duplicate",
                "hall ticket already registered",
                Some(json!({ "hallTicket": new_ticket })),
            );
        }
    }

    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    for (key, column) in [
        ("hallTicket", "hall_ticket"),
        ("name", "name"),
        ("year", "year"),
        ("section", "section"),
        ("branch", "branch"),
        ("status", "status"),
    ] {
        if let Some(v) = patch.get(key).and_then(|v| v.as_str()) {
            sets.push(format!("{} = ?", column));
            binds.push(rusqlite::types::Value::Text(v.to_string()));
        }
    }
    if let Some(v) = patch.get("cgpa") {
        if v.is_null() {
            sets.push("cgpa = NULL".to_string());
        } else if let Some(n) = v.as_f64() {
            sets.push("cgpa = ?".to_string());
            binds.push(rusqlite::types::Value::Real(n));
        } else {
            return err(&req.id, "bad_params", "cgpa must be numeric or null", None);
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    sets.push("updated_at = ?".to_string());
    binds.push(rusqlite::types::Value::Text(now_stamp()));
    binds.push(rusqlite::types::Value::Text(student_id.clone()));
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(binds.iter())) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for (sql, table) in [
        (
            "DELETE FROM student_assignments WHERE student_id = ?",
            "student_assignments",
        ),
        (
            "DELETE FROM attendance_sessions WHERE student_id = ?",
            "attendance_sessions",
        ),
        (
            "DELETE FROM exam_results WHERE student_id = ?",
            "exam_results",
        ),
        (
            "DELETE FROM certificates WHERE student_id = ?",
            "certificates",
        ),
        (
            "DELETE FROM leave_requests WHERE applicant_kind = 'student' AND applicant_id = ?",
            "leave_requests",
        ),
        (
            "DELETE FROM messages
             WHERE (recipient_role = 'student' AND recipient_id = ?1)
                OR (sender_role = 'student' AND sender_id = ?1)",
            "messages",
        ),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
