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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn storage_dump_lands_in_typed_tables() {
    let workspace = temp_dir("campus-legacy-import");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let dump = json!({
        "students": [
            {
                "hallTicket": "20CS001",
                "name": "Asha Rao",
                "year": "2",
                "section": "A",
                "branch": "CSE",
                "cgpa": 8.4,
                "attendance": 81.5
            },
            {
                "hallTicket": "20CS002",
                "name": "Bala Nair",
                "year": "2",
                "section": "A",
                "branch": "CSE"
            }
        ],
        "users": [
            { "name": "K. Iyer", "department": "CSE", "role": "faculty" },
            { "name": "Ghost Student", "department": "", "role": "student" }
        ],
        "student_leaves_pending": [
            {
                "studentId": "20CS001",
                "type": "Medical",
                "fromDate": "2025-03-15",
                "toDate": "2025-03-17",
                "reason": "fever",
                "status": "pending"
            }
        ],
        "hod_faculty_leaves": [
            {
                "facultyId": "F-9",
                "type": "Casual",
                "fromDate": "2025-04-01",
                "toDate": "2025-04-01",
                "reason": "personal",
                "status": "approved",
                "approvedBy": "hod-cse"
            }
        ],
        "certificates_20CS001": [
            {
                "title": "NPTEL DSA",
                "organization": "NPTEL",
                "issuedOn": "2024-12-01",
                "status": "approved"
            }
        ],
        "faculty_messages": [
            {
                "senderId": "admin",
                "senderRole": "admin",
                "recipientId": "K. Iyer",
                "recipientRole": "faculty",
                "subject": "staff meeting",
                "body": "Friday 3pm",
                "read": false
            }
        ],
        "admin_timetables": [
            { "year": "2", "day": "Mon", "periods": ["DBMS", "OS"] }
        ],
        "broken_key": "this is not an array"
    });
    let dump_path = workspace.join("storage-dump.json");
    std::fs::write(&dump_path, serde_json::to_vec_pretty(&dump).unwrap()).expect("write dump");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "portal.importLegacy",
        json!({ "path": dump_path.to_string_lossy() }),
    );
    assert_eq!(report.get("students").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(report.get("faculty").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(report.get("studentLeaves").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(report.get("facultyLeaves").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(report.get("certificates").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(report.get("messages").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        report.get("passthroughKeys").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        report
            .get("malformedKeys")
            .and_then(|v| v.as_array())
            .unwrap(),
        &vec![json!("broken_key")]
    );

    // Imported students are queryable like natively-created ones.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.list",
        json!({ "year": "2" }),
    );
    let students = listed.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(students.len(), 2);
    assert_eq!(
        students[0].get("attendancePercent").and_then(|v| v.as_f64()),
        Some(81.5)
    );

    // The lowercase dump status was normalized to the canonical spelling.
    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "leave.list",
        json!({ "applicantKind": "student", "status": "Pending" }),
    );
    assert_eq!(
        pending
            .get("leaves")
            .and_then(|v| v.as_array())
            .unwrap()
            .len(),
        1
    );

    // Certificates were re-keyed from the hall ticket to the student id.
    let student_id = students[0]
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let certs = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "certificates.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        certs
            .get("certificates")
            .and_then(|v| v.as_array())
            .unwrap()
            .len(),
        1
    );

    // Unrecognized keys fall through to the collections store verbatim.
    let timetables = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "collections.load",
        json!({ "key": "admin_timetables" }),
    );
    assert_eq!(
        timetables
            .get("items")
            .and_then(|v| v.as_array())
            .unwrap()
            .len(),
        1
    );

    // Re-running the import upserts instead of duplicating students.
    let rerun = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "portal.importLegacy",
        json!({ "path": dump_path.to_string_lossy() }),
    );
    assert_eq!(rerun.get("students").and_then(|v| v.as_i64()), Some(2));
    let relisted = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({ "year": "2" }),
    );
    assert_eq!(
        relisted
            .get("students")
            .and_then(|v| v.as_array())
            .unwrap()
            .len(),
        2
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
