use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match req.params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => match state.workspace.clone() {
            Some(p) => p,
            None => return err(&req.id, "no_workspace", "select a workspace first", None),
        },
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace = match req.params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => match state.workspace.clone() {
            Some(p) => p,
            None => return err(&req.id, "no_workspace", "select a workspace first", None),
        },
    };

    // The open handle would otherwise keep serving the replaced database.
    state.db = None;

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "io_failed", format!("{e:#}"), None),
    };

    match db::open_db(&workspace) {
        Ok(conn) => {
            state.workspace = Some(workspace);
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "bundleFormatDetected": summary.bundle_format_detected }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn handle_export_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let year = req.params.get("year").and_then(|v| v.as_str());

    let mut sql = String::from(
        "SELECT hall_ticket, name, year, section, branch, cgpa, attendance_percent, status
         FROM students",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(y) = year {
        sql.push_str(" WHERE year = ?");
        binds.push(y.to_string());
    }
    sql.push_str(" ORDER BY hall_ticket");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            let hall_ticket: String = r.get(0)?;
            let name: String = r.get(1)?;
            let year: String = r.get(2)?;
            let section: String = r.get(3)?;
            let branch: String = r.get(4)?;
            let cgpa: Option<f64> = r.get(5)?;
            let attendance: Option<f64> = r.get(6)?;
            let status: String = r.get(7)?;
            Ok(format!(
                "{},{},{},{},{},{},{},{}",
                csv_escape(&hall_ticket),
                csv_escape(&name),
                csv_escape(&year),
                csv_escape(&section),
                csv_escape(&branch),
                cgpa.map(|v| v.to_string()).unwrap_or_default(),
                attendance.map(|v| v.to_string()).unwrap_or_default(),
                csv_escape(&status)
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let lines = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let write = || -> std::io::Result<()> {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::File::create(&out_path)?;
        writeln!(
            f,
            "hallTicket,name,year,section,branch,cgpa,attendancePercent,status"
        )?;
        for line in &lines {
            writeln!(f, "{}", line)?;
        }
        f.flush()
    };
    if let Err(e) = write() {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "rows": lines.len(),
            "outPath": out_path.to_string_lossy()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        "exchange.exportStudentsCsv" => Some(handle_export_students_csv(state, req)),
        _ => None,
    }
}
