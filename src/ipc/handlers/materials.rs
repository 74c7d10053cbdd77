use crate::ipc::helpers::{
    digest_file, get_opt_str, get_required_str, today, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn upload(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let uploader_id = get_required_str(params, "uploaderId")?;
    let title = get_required_str(params, "title")?;
    let subject = get_required_str(params, "subject")?;
    let year = get_required_str(params, "year")?;
    let semester = get_required_str(params, "semester")?;
    let file_path = get_required_str(params, "filePath")?;

    let digest = digest_file(&PathBuf::from(&file_path))?;

    let material_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO study_materials(
            id, uploader_id, title, subject, year, semester,
            file_name, file_size, sha256, uploaded_on
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &material_id,
            &uploader_id,
            &title,
            &subject,
            &year,
            &semester,
            &digest.file_name,
            digest.size,
            &digest.sha256,
            today(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "study_materials" }),
        )
    })?;

    Ok(json!({
        "materialId": material_id,
        "fileName": digest.file_name,
        "fileSize": digest.size,
        "sha256": digest.sha256
    }))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    for (key, column) in [
        ("subject", "subject"),
        ("year", "year"),
        ("semester", "semester"),
        ("uploaderId", "uploader_id"),
    ] {
        if let Some(v) = get_opt_str(params, key) {
            clauses.push(column);
            binds.push(v);
        }
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = clauses.iter().map(|c| format!("{} = ?", c)).collect();
        format!(" WHERE {}", parts.join(" AND "))
    };
    let sql = format!(
        "SELECT id, uploader_id, title, subject, year, semester, file_name, file_size,
                sha256, uploaded_on, downloads
         FROM study_materials{} ORDER BY uploaded_on DESC, title",
        where_sql
    );

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let materials = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            let id: String = r.get(0)?;
            let uploader_id: String = r.get(1)?;
            let title: String = r.get(2)?;
            let subject: String = r.get(3)?;
            let year: String = r.get(4)?;
            let semester: String = r.get(5)?;
            let file_name: String = r.get(6)?;
            let file_size: Option<i64> = r.get(7)?;
            let sha256: Option<String> = r.get(8)?;
            let uploaded_on: String = r.get(9)?;
            let downloads: i64 = r.get(10)?;
            Ok(json!({
                "id": id,
                "uploaderId": uploader_id,
                "title": title,
                "subject": subject,
                "year": year,
                "semester": semester,
                "fileName": file_name,
                "fileSize": file_size,
                "sha256": sha256,
                "uploadedOn": uploaded_on,
                "downloads": downloads
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "materials": materials }))
}

fn record_download(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let material_id = get_required_str(params, "materialId")?;
    let updated = conn
        .execute(
            "UPDATE study_materials SET downloads = downloads + 1 WHERE id = ?",
            [&material_id],
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "material not found"));
    }
    let downloads: i64 = conn
        .query_row(
            "SELECT downloads FROM study_materials WHERE id = ?",
            [&material_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    Ok(json!({ "materialId": material_id, "downloads": downloads }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let material_id = get_required_str(params, "materialId")?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM study_materials WHERE id = ?",
            [&material_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "material not found"));
    }
    conn.execute("DELETE FROM study_materials WHERE id = ?", [&material_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "study_materials" }),
            )
        })?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "materials.upload" => Some(with_db(state, req, upload)),
        "materials.list" => Some(with_db(state, req, list)),
        "materials.recordDownload" => Some(with_db(state, req, record_download)),
        "materials.delete" => Some(with_db(state, req, delete)),
        _ => None,
    }
}
