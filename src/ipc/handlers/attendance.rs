use crate::calc::{attendance_percent, round1};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, student_exists, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const DEFAULT_SHORTFALL_THRESHOLD: f64 = 75.0;

fn counts_for_student(conn: &Connection, student_id: &str) -> Result<(i64, i64), HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(present), 0)
         FROM attendance_sessions WHERE student_id = ?",
        [student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .map_err(HandlerErr::db)
}

/// The student row carries a derived percent so list views never join the
/// session ledger; it is refreshed on every mark that touches the student.
fn refresh_student_percent(conn: &Connection, student_id: &str) -> Result<f64, HandlerErr> {
    let (held, attended) = counts_for_student(conn, student_id)?;
    let percent = round1(attendance_percent(attended, held));
    conn.execute(
        "UPDATE students SET attendance_percent = ? WHERE id = ?",
        (percent, student_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(percent)
}

fn mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_str(params, "date")?;
    let subject = get_required_str(params, "subject")?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries"));
    };
    if entries.is_empty() {
        return Err(HandlerErr::new("bad_params", "entries must not be empty"));
    }

    let mut parsed: Vec<(String, bool)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new("bad_params", "entry missing studentId"));
        };
        let Some(present) = entry.get("present").and_then(|v| v.as_bool()) else {
            return Err(HandlerErr::new("bad_params", "entry missing present"));
        };
        parsed.push((student_id.to_string(), present));
    }

    for (student_id, _) in &parsed {
        if !student_exists(conn, student_id)? {
            return Err(HandlerErr::with_details(
                "not_found",
                "student not found",
                json!({ "studentId": student_id }),
            ));
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (student_id, present) in &parsed {
        // Re-marking the same day replaces, never double-counts.
        tx.execute(
            "INSERT INTO attendance_sessions(student_id, date, subject, present)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, date, subject) DO UPDATE SET
               present = excluded.present",
            (student_id, &date, &subject, *present as i64),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "attendance_sessions" }),
            )
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let mut touched: Vec<&str> = parsed.iter().map(|(s, _)| s.as_str()).collect();
    touched.sort_unstable();
    touched.dedup();
    for student_id in &touched {
        refresh_student_percent(conn, student_id)?;
    }

    Ok(json!({ "marked": parsed.len(), "studentsTouched": touched.len() }))
}

fn summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let (held, attended) = counts_for_student(conn, &student_id)?;
    let percent = round1(attendance_percent(attended, held));

    // Per-subject breakdown for the student dashboard tile.
    let mut stmt = conn
        .prepare(
            "SELECT subject, COUNT(*), COALESCE(SUM(present), 0)
             FROM attendance_sessions
             WHERE student_id = ?
             GROUP BY subject
             ORDER BY subject",
        )
        .map_err(HandlerErr::db)?;
    let subjects = stmt
        .query_map([&student_id], |r| {
            let subject: String = r.get(0)?;
            let held: i64 = r.get(1)?;
            let attended: i64 = r.get(2)?;
            Ok(json!({
                "subject": subject,
                "held": held,
                "attended": attended,
                "percent": round1(attendance_percent(attended, held))
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({
        "studentId": student_id,
        "held": held,
        "attended": attended,
        "percent": percent,
        "subjects": subjects
    }))
}

fn shortfall(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = get_opt_str(params, "year");
    let threshold = params
        .get("threshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_SHORTFALL_THRESHOLD);

    // Students with no recorded sessions are skipped: no ledger, no verdict.
    let mut sql = String::from(
        "SELECT st.id, st.hall_ticket, st.name, st.year,
                COUNT(a.student_id), COALESCE(SUM(a.present), 0)
         FROM students st
         JOIN attendance_sessions a ON a.student_id = st.id",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(y) = year {
        sql.push_str(" WHERE st.year = ?");
        binds.push(y);
    }
    sql.push_str(" GROUP BY st.id ORDER BY st.hall_ticket");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows: Vec<(String, String, String, String, i64, i64)> = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter_map(|(id, hall_ticket, name, year, held, attended)| {
            let percent = round1(attendance_percent(attended, held));
            if percent < threshold {
                Some(json!({
                    "studentId": id,
                    "hallTicket": hall_ticket,
                    "name": name,
                    "year": year,
                    "held": held,
                    "attended": attended,
                    "percent": percent
                }))
            } else {
                None
            }
        })
        .collect();

    Ok(json!({ "threshold": threshold, "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_db(state, req, mark)),
        "attendance.summary" => Some(with_db(state, req, summary)),
        "attendance.shortfall" => Some(with_db(state, req, shortfall)),
        _ => None,
    }
}
