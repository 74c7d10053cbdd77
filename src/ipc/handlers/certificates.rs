use crate::calc::{review_transition, ReviewStatus, Transition};
use crate::ipc::helpers::{
    digest_file, get_opt_str, get_required_str, student_exists, today, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn certificate_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let student_id: String = r.get(1)?;
    let title: String = r.get(2)?;
    let organization: String = r.get(3)?;
    let issued_on: String = r.get(4)?;
    let expires_on: Option<String> = r.get(5)?;
    let status: String = r.get(6)?;
    let rejection_reason: Option<String> = r.get(7)?;
    let reviewed_by: Option<String> = r.get(8)?;
    let reviewed_on: Option<String> = r.get(9)?;
    let file_name: Option<String> = r.get(10)?;
    let file_size: Option<i64> = r.get(11)?;
    let sha256: Option<String> = r.get(12)?;
    let submitted_on: String = r.get(13)?;
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "title": title,
        "organization": organization,
        "issuedOn": issued_on,
        "expiresOn": expires_on,
        "status": status,
        "rejectionReason": rejection_reason,
        "reviewedBy": reviewed_by,
        "reviewedOn": reviewed_on,
        "fileName": file_name,
        "fileSize": file_size,
        "sha256": sha256,
        "submittedOn": submitted_on
    }))
}

const CERT_COLS: &str = "id, student_id, title, organization, issued_on, expires_on, status, \
                         rejection_reason, reviewed_by, reviewed_on, file_name, file_size, \
                         sha256, submitted_on";

fn submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let title = get_required_str(params, "title")?;
    let organization = get_required_str(params, "organization")?;
    let issued_on = get_required_str(params, "issuedOn")?;
    let expires_on = get_opt_str(params, "expiresOn");
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let digest = match get_opt_str(params, "filePath") {
        Some(path) => Some(digest_file(&PathBuf::from(path))?),
        None => None,
    };

    let certificate_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO certificates(
            id, student_id, title, organization, issued_on, expires_on,
            status, file_name, file_size, sha256, submitted_on
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &certificate_id,
            &student_id,
            &title,
            &organization,
            &issued_on,
            &expires_on,
            ReviewStatus::Pending.as_str(),
            digest.as_ref().map(|d| d.file_name.clone()),
            digest.as_ref().map(|d| d.size),
            digest.as_ref().map(|d| d.sha256.clone()),
            today(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "certificates" }),
        )
    })?;

    Ok(json!({
        "certificateId": certificate_id,
        "status": ReviewStatus::Pending.as_str(),
        "sha256": digest.map(|d| d.sha256)
    }))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(student_id) = get_opt_str(params, "studentId") {
        clauses.push("student_id = ?");
        binds.push(student_id);
    }
    if let Some(status) = get_opt_str(params, "status") {
        if ReviewStatus::parse(&status).is_none() {
            return Err(HandlerErr::new("bad_params", "unknown certificate status"));
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
        "SELECT {} FROM certificates{} ORDER BY submitted_on DESC, id",
        CERT_COLS, where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let certificates = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            certificate_row_json(r)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "certificates": certificates }))
}

fn load_status(conn: &Connection, certificate_id: &str) -> Result<ReviewStatus, HandlerErr> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM certificates WHERE id = ?",
            [certificate_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(raw) = raw else {
        return Err(HandlerErr::new("not_found", "certificate not found"));
    };
    ReviewStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::new("db_query_failed", format!("corrupt status: {}", raw)))
}

fn review(
    conn: &Connection,
    params: &serde_json::Value,
    approve: bool,
) -> Result<serde_json::Value, HandlerErr> {
    let certificate_id = get_required_str(params, "certificateId")?;
    let reviewed_by = get_required_str(params, "reviewedBy")?;
    let reason = if approve {
        None
    } else {
        Some(get_required_str(params, "reason")?)
    };

    let current = load_status(conn, &certificate_id)?;
    match review_transition(current, approve) {
        Transition::Applied => {}
        Transition::NoChange => {
            return Ok(json!({ "status": current.as_str(), "changed": false }));
        }
        Transition::Invalid => {
            return Err(HandlerErr::with_details(
                "invalid_state",
                format!("certificate already {}", current.as_str()),
                json!({ "status": current.as_str() }),
            ));
        }
    }

    let target = if approve {
        ReviewStatus::Approved
    } else {
        ReviewStatus::Rejected
    };
    conn.execute(
        "UPDATE certificates
         SET status = ?, rejection_reason = ?, reviewed_by = ?, reviewed_on = ?
         WHERE id = ?",
        (
            target.as_str(),
            &reason,
            &reviewed_by,
            today(),
            &certificate_id,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "certificates" }),
        )
    })?;

    Ok(json!({ "status": target.as_str(), "changed": true }))
}

/// Verification answers two questions: what did the review decide, and,
/// when the caller re-presents the document, is it byte-identical to the
/// one that was reviewed.
fn verify(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let certificate_id = get_required_str(params, "certificateId")?;
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT status, sha256 FROM certificates WHERE id = ?",
            [&certificate_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((status, recorded_sha)) = row else {
        return Err(HandlerErr::new("not_found", "certificate not found"));
    };

    let digest_match = match (get_opt_str(params, "filePath"), recorded_sha.as_ref()) {
        (Some(path), Some(recorded)) => {
            let digest = digest_file(&PathBuf::from(path))?;
            Some(digest.sha256 == *recorded)
        }
        (Some(_), None) => Some(false),
        (None, _) => None,
    };

    Ok(json!({
        "certificateId": certificate_id,
        "status": status,
        "sha256": recorded_sha,
        "digestMatch": digest_match
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "certificates.submit" => Some(with_db(state, req, submit)),
        "certificates.list" => Some(with_db(state, req, list)),
        "certificates.approve" => Some(with_db(state, req, |c, p| review(c, p, true))),
        "certificates.reject" => Some(with_db(state, req, |c, p| review(c, p, false))),
        "certificates.verify" => Some(with_db(state, req, verify)),
        _ => None,
    }
}
