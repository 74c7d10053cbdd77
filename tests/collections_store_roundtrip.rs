use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn save_then_load_returns_the_same_items() {
    let workspace = temp_dir("campus-collections-roundtrip");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let timetable = json!([
        { "year": "2", "day": "Mon", "periods": ["DBMS", "OS", "CN"] },
        { "year": "2", "day": "Tue", "periods": ["M3", "DBMS", "OS"] }
    ]);
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "collections.save",
        json!({ "key": "admin_timetables", "items": timetable }),
    );
    assert_eq!(saved.get("version").and_then(|v| v.as_i64()), Some(1));

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "collections.load",
        json!({ "key": "admin_timetables" }),
    );
    assert_eq!(loaded.get("items").unwrap(), &timetable);
    assert_eq!(loaded.get("version").and_then(|v| v.as_i64()), Some(1));

    // An unknown key is just an empty collection at version 0.
    let missing = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "collections.load",
        json!({ "key": "never_written" }),
    );
    assert!(missing.get("items").and_then(|v| v.as_array()).unwrap().is_empty());
    assert_eq!(missing.get("version").and_then(|v| v.as_i64()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn guarded_save_detects_lost_updates() {
    let workspace = temp_dir("campus-collections-conflict");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "collections.save",
        json!({ "key": "dashboard_cards", "items": [{ "card": "a" }] }),
    );
    // Tab one loads at version 1, tab two writes version 2 underneath it.
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "collections.save",
        json!({ "key": "dashboard_cards", "items": [{ "card": "b" }], "expectedVersion": 1 }),
    );

    let stale = request(
        &mut stdin,
        &mut reader,
        "4",
        "collections.save",
        json!({ "key": "dashboard_cards", "items": [{ "card": "stale" }], "expectedVersion": 1 }),
    );
    assert_eq!(stale.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        stale
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("version_conflict")
    );

    // The losing write changed nothing.
    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "collections.load",
        json!({ "key": "dashboard_cards" }),
    );
    assert_eq!(loaded.get("version").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        loaded.get("items").and_then(|v| v.as_array()).unwrap()[0]
            .get("card")
            .and_then(|v| v.as_str()),
        Some("b")
    );

    // An unguarded save keeps the browser edition's last-write-wins.
    let forced = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "collections.save",
        json!({ "key": "dashboard_cards", "items": [] }),
    );
    assert_eq!(forced.get("version").and_then(|v| v.as_i64()), Some(3));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_payload_degrades_to_empty_list() {
    let workspace = temp_dir("campus-collections-malformed");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "collections.save",
        json!({ "key": "admin_timetables", "items": [{ "year": "2" }] }),
    );

    // Corrupt the stored payload the way a broken writer would have.
    {
        let conn = rusqlite::Connection::open(workspace.join("campus.sqlite3"))
            .expect("open workspace db");
        conn.execute(
            "UPDATE collections SET payload = '{not json' WHERE key = 'admin_timetables'",
            [],
        )
        .expect("corrupt payload");
    }

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "collections.load",
        json!({ "key": "admin_timetables" }),
    );
    assert!(loaded.get("items").and_then(|v| v.as_array()).unwrap().is_empty());
    // The version survives so a guarded overwrite can still replace it.
    assert_eq!(loaded.get("version").and_then(|v| v.as_i64()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
