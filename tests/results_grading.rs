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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn seed_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    hall_ticket: &str,
    name: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        &format!("seed-{}", hall_ticket),
        "students.create",
        json!({
            "hallTicket": hall_ticket,
            "name": name,
            "year": "2",
            "section": "A",
            "branch": "CSE"
        }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn record(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    subject: &str,
    marks: f64,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "results.record",
        json!({
            "studentId": student_id,
            "exam": "mid1",
            "subject": subject,
            "marks": marks,
            "maxMarks": 100.0
        }),
    )
}

#[test]
fn grade_bands_on_the_wire() {
    let workspace = temp_dir("campus-results-bands");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let asha = seed_student(&mut stdin, &mut reader, "20CS001", "Asha Rao");

    for (i, (marks, grade)) in [
        (95.0, "A+"),
        (90.0, "A+"),
        (85.0, "A"),
        (72.0, "B+"),
        (60.0, "B"),
        (50.0, "C"),
        (49.0, "F"),
    ]
    .iter()
    .enumerate()
    {
        let result = record(
            &mut stdin,
            &mut reader,
            &format!("rec-{}", i),
            &asha,
            &format!("SUB{}", i),
            *marks,
        );
        assert_eq!(
            result.get("grade").and_then(|v| v.as_str()),
            Some(*grade),
            "marks {}",
            marks
        );
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_summary_aggregates_and_upserts() {
    let workspace = temp_dir("campus-results-summary");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let asha = seed_student(&mut stdin, &mut reader, "20CS001", "Asha Rao");

    record(&mut stdin, &mut reader, "2", &asha, "DBMS", 90.0);
    record(&mut stdin, &mut reader, "3", &asha, "OS", 70.0);
    // Correction overwrites the earlier DBMS entry.
    record(&mut stdin, &mut reader, "4", &asha, "DBMS", 80.0);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "results.studentSummary",
        json!({ "studentId": asha, "exam": "mid1" }),
    );
    let subjects = summary.get("subjects").and_then(|v| v.as_array()).unwrap();
    assert_eq!(subjects.len(), 2, "upsert must not duplicate subjects");
    assert_eq!(
        summary.get("aggregatePercent").and_then(|v| v.as_f64()),
        Some(75.0)
    );
    assert_eq!(
        summary.get("aggregateGrade").and_then(|v| v.as_str()),
        Some("B+")
    );
    // A (9 points) and B+ (8 points) average to 8.5.
    assert_eq!(summary.get("sgpa").and_then(|v| v.as_f64()), Some(8.5));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "results.record",
        json!({
            "studentId": asha,
            "exam": "mid1",
            "subject": "DBMS",
            "marks": 120.0,
            "maxMarks": 100.0
        }),
    );
    assert_eq!(code, "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_summary_ranks_and_flags_failures() {
    let workspace = temp_dir("campus-results-class");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let asha = seed_student(&mut stdin, &mut reader, "20CS001", "Asha Rao");
    let bala = seed_student(&mut stdin, &mut reader, "20CS002", "Bala Nair");

    record(&mut stdin, &mut reader, "2", &asha, "DBMS", 80.0);
    record(&mut stdin, &mut reader, "3", &asha, "OS", 90.0);
    // Bala tops OS but fails DBMS outright.
    record(&mut stdin, &mut reader, "4", &bala, "DBMS", 20.0);
    record(&mut stdin, &mut reader, "5", &bala, "OS", 95.0);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "results.classSummary",
        json!({ "year": "2", "exam": "mid1" }),
    );
    let rows = summary.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        rows[0].get("hallTicket").and_then(|v| v.as_str()),
        Some("20CS001")
    );
    assert_eq!(rows[0].get("passed").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(rows[1].get("passed").and_then(|v| v.as_bool()), Some(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
