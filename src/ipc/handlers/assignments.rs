use crate::calc::{plan_auto_assign, AutoAssignPlan, SlotLoad};
use crate::ipc::helpers::{
    faculty_exists, get_required_i64, get_required_str, get_str_array, now_stamp, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 2] = ["coordinator", "counsellor"];

fn require_role(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let role = get_required_str(params, "role")?;
    if !ROLES.contains(&role.as_str()) {
        return Err(HandlerErr::new(
            "bad_params",
            "role must be coordinator or counsellor",
        ));
    }
    Ok(role)
}

#[derive(Debug, Clone)]
struct Slot {
    id: String,
    faculty_id: String,
    year: String,
    role: String,
    max_students: i64,
}

fn find_slot(
    conn: &Connection,
    faculty_id: &str,
    year: &str,
    role: &str,
) -> Result<Option<Slot>, HandlerErr> {
    conn.query_row(
        "SELECT id, faculty_id, year, role, max_students
         FROM assignment_slots
         WHERE faculty_id = ? AND year = ? AND role = ?",
        (faculty_id, year, role),
        |r| {
            Ok(Slot {
                id: r.get(0)?,
                faculty_id: r.get(1)?,
                year: r.get(2)?,
                role: r.get(3)?,
                max_students: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn slot_assigned_count(conn: &Connection, slot_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM student_assignments WHERE slot_id = ?",
        [slot_id],
        |r| r.get(0),
    )
    .map_err(HandlerErr::db)
}

fn define_slot(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let faculty_id = get_required_str(params, "facultyId")?;
    let year = get_required_str(params, "year")?;
    let role = require_role(params)?;
    let max_students = get_required_i64(params, "maxStudents")?;
    if max_students <= 0 {
        return Err(HandlerErr::new("bad_params", "maxStudents must be positive"));
    }
    if !faculty_exists(conn, &faculty_id)? {
        return Err(HandlerErr::new("not_found", "faculty not found"));
    }

    // One slot per (faculty, year); redefining adjusts the role tag and
    // ceiling in place.
    let slot_id = match find_slot_any_role(conn, &faculty_id, &year)? {
        Some(existing) => {
            // Assignment rows are keyed by role; a role change under live
            // students would strand them.
            if existing.role != role && slot_assigned_count(conn, &existing.id)? > 0 {
                return Err(HandlerErr::new(
                    "invalid_state",
                    "slot has students attached; detach them before changing role",
                ));
            }
            conn.execute(
                "UPDATE assignment_slots SET role = ?, max_students = ? WHERE id = ?",
                (&role, max_students, &existing.id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            existing.id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO assignment_slots(id, faculty_id, year, role, max_students)
                 VALUES(?, ?, ?, ?, ?)",
                (&id, &faculty_id, &year, &role, max_students),
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "assignment_slots" }),
                )
            })?;
            id
        }
    };

    Ok(json!({ "slotId": slot_id }))
}

fn find_slot_any_role(
    conn: &Connection,
    faculty_id: &str,
    year: &str,
) -> Result<Option<Slot>, HandlerErr> {
    conn.query_row(
        "SELECT id, faculty_id, year, role, max_students
         FROM assignment_slots
         WHERE faculty_id = ? AND year = ?",
        (faculty_id, year),
        |r| {
            Ok(Slot {
                id: r.get(0)?,
                faculty_id: r.get(1)?,
                year: r.get(2)?,
                role: r.get(3)?,
                max_students: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn list_slots(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = params.get("year").and_then(|v| v.as_str());
    let role = params.get("role").and_then(|v| v.as_str());

    let mut sql = String::from(
        "SELECT sl.id, sl.faculty_id, f.name, sl.year, sl.role, sl.max_students,
                (SELECT COUNT(*) FROM student_assignments sa WHERE sa.slot_id = sl.id)
         FROM assignment_slots sl
         JOIN faculty f ON f.id = sl.faculty_id",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(y) = year {
        clauses.push("sl.year = ?");
        binds.push(y.to_string());
    }
    if let Some(r) = role {
        clauses.push("sl.role = ?");
        binds.push(r.to_string());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY f.name, sl.year");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let slots = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            let id: String = r.get(0)?;
            let faculty_id: String = r.get(1)?;
            let faculty_name: String = r.get(2)?;
            let year: String = r.get(3)?;
            let role: String = r.get(4)?;
            let max_students: i64 = r.get(5)?;
            let assigned: i64 = r.get(6)?;
            Ok(json!({
                "slotId": id,
                "facultyId": faculty_id,
                "facultyName": faculty_name,
                "year": year,
                "role": role,
                "maxStudents": max_students,
                "assignedCount": assigned
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "slots": slots }))
}

fn remove_slot(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM assignment_slots WHERE id = ?",
            [&slot_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "slot not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let detached = tx
        .execute(
            "DELETE FROM student_assignments WHERE slot_id = ?",
            [&slot_id],
        )
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    tx.execute("DELETE FROM assignment_slots WHERE id = ?", [&slot_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "detachedStudents": detached }))
}

/// Shared tail of manual and range assignment: validate the candidates,
/// enforce the ceiling, then upsert every placement in one transaction.
fn attach_students(
    conn: &Connection,
    slot: &Slot,
    student_ids: &[String],
) -> Result<serde_json::Value, HandlerErr> {
    if student_ids.is_empty() {
        return Err(HandlerErr::new("bad_params", "no students selected"));
    }

    let mut newcomers = 0i64;
    for student_id in student_ids {
        let year: Option<String> = conn
            .query_row(
                "SELECT year FROM students WHERE id = ?",
                [student_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        let Some(year) = year else {
            return Err(HandlerErr::with_details(
                "not_found",
                "student not found",
                json!({ "studentId": student_id }),
            ));
        };
        if year != slot.year {
            return Err(HandlerErr::with_details(
                "bad_params",
                "student is not in the slot's year",
                json!({ "studentId": student_id, "studentYear": year, "slotYear": slot.year }),
            ));
        }
        let already_here: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM student_assignments WHERE student_id = ? AND role = ? AND slot_id = ?",
                (student_id, &slot.role, &slot.id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        if already_here.is_none() {
            newcomers += 1;
        }
    }

    let assigned = slot_assigned_count(conn, &slot.id)?;
    if assigned + newcomers > slot.max_students {
        return Err(HandlerErr::with_details(
            "capacity_exceeded",
            "slot cannot take the selected students",
            json!({
                "maxStudents": slot.max_students,
                "assigned": assigned,
                "selected": newcomers
            }),
        ));
    }

    let stamp = now_stamp();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for student_id in student_ids {
        // A student already under another faculty for this role is moved;
        // the browser edition overwrote silently and the UI depends on it.
        tx.execute(
            "INSERT INTO student_assignments(student_id, role, slot_id, assigned_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, role) DO UPDATE SET
               slot_id = excluded.slot_id,
               assigned_at = excluded.assigned_at",
            (student_id, &slot.role, &slot.id, &stamp),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "student_assignments" }),
            )
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "slotId": slot.id,
        "facultyId": slot.faculty_id,
        "assignedCount": assigned + newcomers
    }))
}

fn resolve_slot(conn: &Connection, params: &serde_json::Value) -> Result<Slot, HandlerErr> {
    let faculty_id = get_required_str(params, "facultyId")?;
    let year = get_required_str(params, "year")?;
    let role = require_role(params)?;
    find_slot(conn, &faculty_id, &year, &role)?.ok_or_else(|| {
        HandlerErr::with_details(
            "not_found",
            "no slot for faculty/year/role",
            json!({ "facultyId": faculty_id, "year": year, "role": role }),
        )
    })
}

fn assign(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot = resolve_slot(conn, params)?;
    let student_ids = get_str_array(params, "studentIds")?;
    attach_students(conn, &slot, &student_ids)
}

fn assign_range(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot = resolve_slot(conn, params)?;
    let from = get_required_str(params, "hallTicketFrom")?;
    let to = get_required_str(params, "hallTicketTo")?;
    if from > to {
        return Err(HandlerErr::new(
            "bad_params",
            "hallTicketFrom must not sort after hallTicketTo",
        ));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id FROM students
             WHERE year = ? AND hall_ticket BETWEEN ? AND ?
             ORDER BY hall_ticket",
        )
        .map_err(HandlerErr::db)?;
    let student_ids: Vec<String> = stmt
        .query_map((&slot.year, &from, &to), |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    if student_ids.is_empty() {
        return Err(HandlerErr::new(
            "not_found",
            "no students in the hall ticket range",
        ));
    }

    attach_students(conn, &slot, &student_ids)
}

fn auto_assign(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = get_required_str(params, "year")?;
    let role = require_role(params)?;

    let mut stmt = conn
        .prepare(
            "SELECT sl.id, sl.faculty_id, f.name, sl.max_students,
                    (SELECT COUNT(*) FROM student_assignments sa
                       JOIN students st ON st.id = sa.student_id
                      WHERE sa.slot_id = sl.id AND st.year = sl.year)
             FROM assignment_slots sl
             JOIN faculty f ON f.id = sl.faculty_id
             WHERE sl.year = ? AND sl.role = ?",
        )
        .map_err(HandlerErr::db)?;
    let mut slots: Vec<SlotLoad> = stmt
        .query_map((&year, &role), |r| {
            Ok(SlotLoad {
                slot_id: r.get(0)?,
                faculty_id: r.get(1)?,
                faculty_name: r.get(2)?,
                max_students: r.get(3)?,
                assigned: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    if slots.is_empty() {
        return Err(HandlerErr::with_details(
            "not_found",
            "no slots defined for year/role",
            json!({ "year": year, "role": role }),
        ));
    }

    // Students of the year with no placement for this role yet, in
    // hall-ticket order so reruns place the same students the same way.
    let mut stmt = conn
        .prepare(
            "SELECT st.id FROM students st
             WHERE st.year = ?
               AND NOT EXISTS (
                 SELECT 1 FROM student_assignments sa
                  JOIN assignment_slots sl ON sl.id = sa.slot_id
                 WHERE sa.student_id = st.id AND sa.role = ? AND sl.year = st.year
               )
             ORDER BY st.hall_ticket",
        )
        .map_err(HandlerErr::db)?;
    let unassigned: Vec<String> = stmt
        .query_map((&year, &role), |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let placements = match plan_auto_assign(&unassigned, &mut slots) {
        AutoAssignPlan::Placements(p) => p,
        AutoAssignPlan::CapacityExceeded { unplaced } => {
            return Err(HandlerErr::with_details(
                "capacity_exceeded",
                "not enough slot capacity for the year",
                json!({ "unplaced": unplaced }),
            ));
        }
    };

    let stamp = now_stamp();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (student_id, slot_id) in &placements {
        tx.execute(
            "INSERT INTO student_assignments(student_id, role, slot_id, assigned_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, role) DO UPDATE SET
               slot_id = excluded.slot_id,
               assigned_at = excluded.assigned_at",
            (student_id, &role, slot_id, &stamp),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "student_assignments" }),
            )
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let loads: Vec<serde_json::Value> = slots
        .iter()
        .map(|s| {
            json!({
                "slotId": s.slot_id,
                "facultyId": s.faculty_id,
                "facultyName": s.faculty_name,
                "assignedCount": s.assigned,
                "maxStudents": s.max_students
            })
        })
        .collect();

    Ok(json!({
        "placed": placements.len(),
        "slots": loads
    }))
}

fn list_for_faculty(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let faculty_id = get_required_str(params, "facultyId")?;
    if !faculty_exists(conn, &faculty_id)? {
        return Err(HandlerErr::new("not_found", "faculty not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT sl.id, sl.year, sl.role, st.id, st.hall_ticket, st.name
             FROM assignment_slots sl
             JOIN student_assignments sa ON sa.slot_id = sl.id
             JOIN students st ON st.id = sa.student_id
             WHERE sl.faculty_id = ?
             ORDER BY sl.year, sl.role, st.hall_ticket",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&faculty_id], |r| {
            let slot_id: String = r.get(0)?;
            let year: String = r.get(1)?;
            let role: String = r.get(2)?;
            let student_id: String = r.get(3)?;
            let hall_ticket: String = r.get(4)?;
            let name: String = r.get(5)?;
            Ok(json!({
                "slotId": slot_id,
                "year": year,
                "role": role,
                "studentId": student_id,
                "hallTicket": hall_ticket,
                "name": name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "assignments": rows }))
}

fn for_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT sa.role, sl.id, sl.year, f.id, f.name
             FROM student_assignments sa
             JOIN assignment_slots sl ON sl.id = sa.slot_id
             JOIN faculty f ON f.id = sl.faculty_id
             WHERE sa.student_id = ?
             ORDER BY sa.role",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let role: String = r.get(0)?;
            let slot_id: String = r.get(1)?;
            let year: String = r.get(2)?;
            let faculty_id: String = r.get(3)?;
            let faculty_name: String = r.get(4)?;
            Ok(json!({
                "role": role,
                "slotId": slot_id,
                "year": year,
                "facultyId": faculty_id,
                "facultyName": faculty_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "assignments": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.defineSlot" => Some(with_db(state, req, define_slot)),
        "assignments.listSlots" => Some(with_db(state, req, list_slots)),
        "assignments.removeSlot" => Some(with_db(state, req, remove_slot)),
        "assignments.assign" => Some(with_db(state, req, assign)),
        "assignments.assignRange" => Some(with_db(state, req, assign_range)),
        "assignments.autoAssign" => Some(with_db(state, req, auto_assign)),
        "assignments.listForFaculty" => Some(with_db(state, req, list_for_faculty)),
        "assignments.forStudent" => Some(with_db(state, req, for_student)),
        _ => None,
    }
}
