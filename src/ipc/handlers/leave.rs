use crate::calc::{leave_days_inclusive, leave_transition, LeaveAction, LeaveStatus, Transition};
use crate::ipc::helpers::{
    faculty_exists, get_opt_str, get_required_date, get_required_str, student_exists, today,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn leave_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let applicant_id: String = r.get(1)?;
    let applicant_kind: String = r.get(2)?;
    let leave_type: String = r.get(3)?;
    let from_date: String = r.get(4)?;
    let to_date: String = r.get(5)?;
    let days: i64 = r.get(6)?;
    let reason: String = r.get(7)?;
    let documents_raw: String = r.get(8)?;
    let status: String = r.get(9)?;
    let applied_on: String = r.get(10)?;
    let approved_by: Option<String> = r.get(11)?;
    let approved_on: Option<String> = r.get(12)?;
    let documents: serde_json::Value =
        serde_json::from_str(&documents_raw).unwrap_or_else(|_| json!([]));
    Ok(json!({
        "id": id,
        "applicantId": applicant_id,
        "applicantKind": applicant_kind,
        "leaveType": leave_type,
        "fromDate": from_date,
        "toDate": to_date,
        "days": days,
        "reason": reason,
        "documents": documents,
        "status": status,
        "appliedOn": applied_on,
        "approvedBy": approved_by,
        "approvedDate": approved_on
    }))
}

const LEAVE_COLS: &str = "id, applicant_id, applicant_kind, leave_type, from_date, to_date, \
                          days, reason, documents, status, applied_on, approved_by, approved_on";

fn apply(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let applicant_id = get_required_str(params, "applicantId")?;
    let applicant_kind = get_required_str(params, "applicantKind")?;
    let leave_type = get_required_str(params, "leaveType")?;
    let from = get_required_date(params, "fromDate")?;
    let to = get_required_date(params, "toDate")?;
    let reason = get_required_str(params, "reason")?;

    match applicant_kind.as_str() {
        "student" => {
            if !student_exists(conn, &applicant_id)? {
                return Err(HandlerErr::new("not_found", "student not found"));
            }
        }
        "faculty" => {
            if !faculty_exists(conn, &applicant_id)? {
                return Err(HandlerErr::new("not_found", "faculty not found"));
            }
        }
        _ => {
            return Err(HandlerErr::new(
                "bad_params",
                "applicantKind must be student or faculty",
            ));
        }
    }

    if to < from {
        return Err(HandlerErr::new("bad_params", "toDate is before fromDate"));
    }
    let days = leave_days_inclusive(from, to);

    let documents: Vec<String> = params
        .get("documents")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let documents_json = serde_json::to_string(&documents)
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;

    let leave_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO leave_requests(
            id, applicant_id, applicant_kind, leave_type, from_date, to_date,
            days, reason, documents, status, applied_on
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &leave_id,
            &applicant_id,
            &applicant_kind,
            &leave_type,
            from.format("%Y-%m-%d").to_string(),
            to.format("%Y-%m-%d").to_string(),
            days,
            &reason,
            &documents_json,
            LeaveStatus::Pending.as_str(),
            today(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "leave_requests" }),
        )
    })?;

    Ok(json!({
        "leaveId": leave_id,
        "days": days,
        "status": LeaveStatus::Pending.as_str()
    }))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(kind) = get_opt_str(params, "applicantKind") {
        clauses.push("applicant_kind = ?");
        binds.push(kind);
    }
    if let Some(applicant) = get_opt_str(params, "applicantId") {
        clauses.push("applicant_id = ?");
        binds.push(applicant);
    }
    if let Some(status) = get_opt_str(params, "status") {
        if LeaveStatus::parse(&status).is_none() {
            return Err(HandlerErr::new("bad_params", "unknown leave status"));
        }
        clauses.push("status = ?");
        binds.push(status);
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM leave_requests{} ORDER BY applied_on DESC, id",
        LEAVE_COLS, where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let leaves = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            leave_row_json(r)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "leaves": leaves }))
}

fn load_status(conn: &Connection, leave_id: &str) -> Result<LeaveStatus, HandlerErr> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM leave_requests WHERE id = ?",
            [leave_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(raw) = raw else {
        return Err(HandlerErr::new("not_found", "leave request not found"));
    };
    LeaveStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::new("db_query_failed", format!("corrupt status: {}", raw)))
}

/// Approve and reject share everything but the target status and are the
/// only transitions that stamp the approver fields.
fn decide(
    conn: &Connection,
    params: &serde_json::Value,
    action: LeaveAction,
) -> Result<serde_json::Value, HandlerErr> {
    let leave_id = get_required_str(params, "leaveId")?;
    let approved_by = get_required_str(params, "approvedBy")?;
    let current = load_status(conn, &leave_id)?;

    match leave_transition(current, action) {
        Transition::Applied => {}
        Transition::NoChange => {
            return Ok(json!({ "status": current.as_str(), "changed": false }));
        }
        Transition::Invalid => {
            return Err(HandlerErr::with_details(
                "invalid_state",
                format!("cannot {:?} a {} request", action, current.as_str()),
                json!({ "status": current.as_str() }),
            ));
        }
    }

    let target = action.target();
    conn.execute(
        "UPDATE leave_requests SET status = ?, approved_by = ?, approved_on = ? WHERE id = ?",
        (target.as_str(), &approved_by, today(), &leave_id),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "leave_requests" }),
        )
    })?;

    Ok(json!({ "status": target.as_str(), "changed": true }))
}

fn cancel(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let leave_id = get_required_str(params, "leaveId")?;
    let current = load_status(conn, &leave_id)?;

    match leave_transition(current, LeaveAction::Cancel) {
        Transition::Applied => {}
        Transition::NoChange => {
            return Ok(json!({ "status": current.as_str(), "changed": false }));
        }
        Transition::Invalid => {
            return Err(HandlerErr::with_details(
                "invalid_state",
                format!("cannot cancel a {} request", current.as_str()),
                json!({ "status": current.as_str() }),
            ));
        }
    }

    // Applicant-initiated; approver fields stay empty.
    conn.execute(
        "UPDATE leave_requests SET status = ? WHERE id = ?",
        (LeaveStatus::Cancelled.as_str(), &leave_id),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "leave_requests" }),
        )
    })?;

    Ok(json!({ "status": LeaveStatus::Cancelled.as_str(), "changed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "leave.apply" => Some(with_db(state, req, apply)),
        "leave.list" => Some(with_db(state, req, list)),
        "leave.approve" => Some(with_db(state, req, |c, p| {
            decide(c, p, LeaveAction::Approve)
        })),
        "leave.reject" => Some(with_db(state, req, |c, p| decide(c, p, LeaveAction::Reject))),
        "leave.cancel" => Some(with_db(state, req, cancel)),
        _ => None,
    }
}
