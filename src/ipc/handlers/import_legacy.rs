use crate::calc::{leave_days_inclusive, LeaveStatus, ReviewStatus};
use crate::ipc::helpers::{
    get_required_str, now_stamp, parse_date, today, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::legacy::{self, LegacyLeave};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Default)]
struct ImportCounts {
    students: usize,
    faculty: usize,
    student_leaves: usize,
    faculty_leaves: usize,
    certificates: usize,
    materials: usize,
    messages: usize,
    passthrough_keys: usize,
    dropped_rows: usize,
}

// The browser edition stored leave statuses in whatever case the page that
// wrote them used.
fn normalize_leave_status(raw: &str) -> Option<LeaveStatus> {
    LeaveStatus::parse(raw).or(match raw {
        "pending" => Some(LeaveStatus::Pending),
        "approved" => Some(LeaveStatus::Approved),
        "rejected" => Some(LeaveStatus::Rejected),
        "cancelled" | "cancel" => Some(LeaveStatus::Cancelled),
        _ => None,
    })
}

fn resolve_student_ref(conn: &Connection, reference: &str) -> Result<Option<String>, HandlerErr> {
    let by_ticket: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE hall_ticket = ?",
            [reference],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if by_ticket.is_some() {
        return Ok(by_ticket);
    }
    conn.query_row("SELECT id FROM students WHERE id = ?", [reference], |r| {
        r.get(0)
    })
    .optional()
    .map_err(HandlerErr::db)
}

fn import_leave(
    conn: &Connection,
    leave: &LegacyLeave,
    applicant_kind: &str,
    applicant_id: &str,
    counts: &mut ImportCounts,
) -> Result<bool, HandlerErr> {
    let Some(status) = normalize_leave_status(&leave.status) else {
        counts.dropped_rows += 1;
        return Ok(false);
    };
    let (Ok(from), Ok(to)) = (
        parse_date(&leave.from_date, "fromDate"),
        parse_date(&leave.to_date, "toDate"),
    ) else {
        counts.dropped_rows += 1;
        return Ok(false);
    };
    if to < from {
        counts.dropped_rows += 1;
        return Ok(false);
    }

    let documents_json =
        serde_json::to_string(&leave.documents).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO leave_requests(
            id, applicant_id, applicant_kind, leave_type, from_date, to_date,
            days, reason, documents, status, applied_on, approved_by, approved_on
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            applicant_id,
            applicant_kind,
            &leave.leave_type,
            &leave.from_date,
            &leave.to_date,
            leave_days_inclusive(from, to),
            &leave.reason,
            &documents_json,
            status.as_str(),
            today(),
            &leave.approved_by,
            &leave.approved_date,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "leave_requests" }),
        )
    })?;
    Ok(true)
}

fn import_dump(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let path = get_required_str(params, "path")?;
    let dump = legacy::parse_storage_dump_file(&PathBuf::from(&path))
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;

    let mut counts = ImportCounts::default();
    let stamp = now_stamp();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    for s in &dump.students {
        if s.hall_ticket.is_empty() {
            counts.dropped_rows += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO students(id, hall_ticket, name, year, section, branch, cgpa,
                                  attendance_percent, status, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(hall_ticket) DO UPDATE SET
               name = excluded.name,
               year = excluded.year,
               section = excluded.section,
               branch = excluded.branch,
               cgpa = excluded.cgpa,
               attendance_percent = excluded.attendance_percent,
               status = excluded.status,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &s.hall_ticket,
                &s.name,
                &s.year,
                &s.section,
                &s.branch,
                s.cgpa,
                s.attendance,
                s.status.as_deref().unwrap_or("active"),
                &stamp,
                &stamp,
            ),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "students" }),
            )
        })?;
        counts.students += 1;
    }

    for f in &dump.faculty {
        if f.name.is_empty() {
            counts.dropped_rows += 1;
            continue;
        }
        // The shared `users` key also held student logins; only staff rows
        // belong in the faculty table.
        if matches!(f.role.as_deref(), Some("student")) {
            continue;
        }
        // The dump has no stable faculty key; (name, department) is the
        // closest thing the portal ever had.
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM faculty WHERE name = ? AND department = ?",
                (&f.name, &f.department),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE faculty SET designation = ?, email = ? WHERE id = ?",
                    (&f.designation, &f.email, &id),
                )
                .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            }
            None => {
                tx.execute(
                    "INSERT INTO faculty(id, name, department, designation, email, created_at)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &f.name,
                        &f.department,
                        &f.designation,
                        &f.email,
                        &stamp,
                    ),
                )
                .map_err(|e| {
                    HandlerErr::with_details(
                        "db_insert_failed",
                        e.to_string(),
                        json!({ "table": "faculty" }),
                    )
                })?;
            }
        }
        counts.faculty += 1;
    }

    for leave in &dump.student_leaves {
        // Student references in the dump are hall tickets; keep the raw
        // reference when no student matches so history is not lost.
        let applicant = resolve_student_ref(&tx, &leave.applicant_id)?
            .unwrap_or_else(|| leave.applicant_id.clone());
        if import_leave(&tx, leave, "student", &applicant, &mut counts)? {
            counts.student_leaves += 1;
        }
    }
    for leave in &dump.faculty_leaves {
        let applicant = leave.applicant_id.clone();
        if import_leave(&tx, leave, "faculty", &applicant, &mut counts)? {
            counts.faculty_leaves += 1;
        }
    }

    for (student_key, certs) in &dump.certificates {
        let Some(student_id) = resolve_student_ref(&tx, student_key)? else {
            counts.dropped_rows += certs.len();
            continue;
        };
        for c in certs {
            let Some(status) = ReviewStatus::parse(&c.status) else {
                counts.dropped_rows += 1;
                continue;
            };
            tx.execute(
                "INSERT INTO certificates(
                    id, student_id, title, organization, issued_on, expires_on,
                    status, rejection_reason, file_name, submitted_on
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &student_id,
                    &c.title,
                    &c.organization,
                    &c.issued_on,
                    &c.expires_on,
                    status.as_str(),
                    &c.rejection_reason,
                    &c.file_name,
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
            counts.certificates += 1;
        }
    }

    for m in &dump.materials {
        tx.execute(
            "INSERT INTO study_materials(
                id, uploader_id, title, subject, year, semester,
                file_name, file_size, sha256, uploaded_on, downloads
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &m.uploader_id,
                &m.title,
                &m.subject,
                &m.year,
                &m.semester,
                &m.file_name,
                m.file_size,
                today(),
                m.downloads.unwrap_or(0),
            ),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "study_materials" }),
            )
        })?;
        counts.materials += 1;
    }

    for m in &dump.messages {
        tx.execute(
            "INSERT INTO messages(id, sender_id, sender_role, recipient_id, recipient_role,
                                  subject, body, sent_on, read)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &m.sender_id,
                &m.sender_role,
                &m.recipient_id,
                &m.recipient_role,
                &m.subject,
                &m.body,
                m.sent_on.as_deref().unwrap_or(&stamp),
                m.read as i64,
            ),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "messages" }),
            )
        })?;
        counts.messages += 1;
    }

    for (key, items) in &dump.passthrough {
        store::save_collection(&tx, key, items, None)
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        counts.passthrough_keys += 1;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "students": counts.students,
        "faculty": counts.faculty,
        "studentLeaves": counts.student_leaves,
        "facultyLeaves": counts.faculty_leaves,
        "certificates": counts.certificates,
        "materials": counts.materials,
        "messages": counts.messages,
        "passthroughKeys": counts.passthrough_keys,
        "droppedRows": counts.dropped_rows,
        "malformedKeys": dump.malformed_keys
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "portal.importLegacy" => Some(with_db(state, req, import_dump)),
        _ => None,
    }
}
