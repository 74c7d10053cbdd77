use crate::calc::{grade_for_percent, grade_point, percent, round1};
use crate::ipc::helpers::{
    get_opt_str, get_required_f64, get_required_str, student_exists, today, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const PASS_PERCENT: f64 = 35.0;

fn record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exam = get_required_str(params, "exam")?;
    let subject = get_required_str(params, "subject")?;
    let marks = get_required_f64(params, "marks")?;
    let max_marks = get_required_f64(params, "maxMarks")?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    if max_marks <= 0.0 {
        return Err(HandlerErr::new("bad_params", "maxMarks must be positive"));
    }
    if marks < 0.0 || marks > max_marks {
        return Err(HandlerErr::with_details(
            "bad_params",
            "marks must be between 0 and maxMarks",
            json!({ "marks": marks, "maxMarks": max_marks }),
        ));
    }

    // One row per (student, exam, subject); re-entering marks corrects it.
    conn.execute(
        "INSERT INTO exam_results(id, student_id, exam, subject, marks, max_marks, recorded_on)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, exam, subject) DO UPDATE SET
           marks = excluded.marks,
           max_marks = excluded.max_marks,
           recorded_on = excluded.recorded_on",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &exam,
            &subject,
            marks,
            max_marks,
            today(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "exam_results" }),
        )
    })?;

    let p = percent(marks, max_marks);
    Ok(json!({
        "percent": round1(p),
        "grade": grade_for_percent(p)
    }))
}

fn student_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exam = get_opt_str(params, "exam");
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let mut sql = String::from(
        "SELECT exam, subject, marks, max_marks
         FROM exam_results WHERE student_id = ?",
    );
    let mut binds: Vec<String> = vec![student_id.clone()];
    if let Some(e) = exam {
        sql.push_str(" AND exam = ?");
        binds.push(e);
    }
    sql.push_str(" ORDER BY exam, subject");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows: Vec<(String, String, f64, f64)> = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut total_marks = 0.0;
    let mut total_max = 0.0;
    let mut grade_points = 0.0;
    let subjects: Vec<serde_json::Value> = rows
        .iter()
        .map(|(exam, subject, marks, max_marks)| {
            let p = percent(*marks, *max_marks);
            total_marks += marks;
            total_max += max_marks;
            grade_points += grade_point(p);
            json!({
                "exam": exam,
                "subject": subject,
                "marks": marks,
                "maxMarks": max_marks,
                "percent": round1(p),
                "grade": grade_for_percent(p)
            })
        })
        .collect();

    let aggregate_percent = percent(total_marks, total_max);
    let sgpa = if rows.is_empty() {
        0.0
    } else {
        round1(grade_points / rows.len() as f64)
    };

    Ok(json!({
        "studentId": student_id,
        "subjects": subjects,
        "aggregatePercent": round1(aggregate_percent),
        "aggregateGrade": grade_for_percent(aggregate_percent),
        "sgpa": sgpa
    }))
}

fn class_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year = get_required_str(params, "year")?;
    let exam = get_required_str(params, "exam")?;

    let mut stmt = conn
        .prepare(
            "SELECT st.id, st.hall_ticket, st.name,
                    SUM(er.marks), SUM(er.max_marks),
                    MIN(100.0 * er.marks / er.max_marks)
             FROM students st
             JOIN exam_results er ON er.student_id = st.id
             WHERE st.year = ? AND er.exam = ?
             GROUP BY st.id",
        )
        .map_err(HandlerErr::db)?;
    let mut rows: Vec<(String, String, String, f64, f64, f64)> = stmt
        .query_map((&year, &exam), |r| {
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

    rows.sort_by(|a, b| {
        let pa = percent(a.3, a.4);
        let pb = percent(b.3, b.4);
        crate::calc::rank_order((pa, a.1.as_str()), (pb, b.1.as_str()))
    });

    let students: Vec<serde_json::Value> = rows
        .iter()
        .enumerate()
        .map(|(i, (id, hall_ticket, name, marks, max, worst_subject))| {
            let p = percent(*marks, *max);
            json!({
                "rank": i + 1,
                "studentId": id,
                "hallTicket": hall_ticket,
                "name": name,
                "percent": round1(p),
                "grade": grade_for_percent(p),
                "passed": *worst_subject >= PASS_PERCENT
            })
        })
        .collect();

    Ok(json!({
        "year": year,
        "exam": exam,
        "students": students
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.record" => Some(with_db(state, req, record)),
        "results.studentSummary" => Some(with_db(state, req, student_summary)),
        "results.classSummary" => Some(with_db(state, req, class_summary)),
        _ => None,
    }
}
