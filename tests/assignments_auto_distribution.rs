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

fn seed_students(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, n: usize) {
    for i in 0..n {
        request_ok(
            stdin,
            reader,
            &format!("seed-s{}", i),
            "students.create",
            json!({
                "hallTicket": format!("20CS{:03}", i + 1),
                "name": format!("Student {}", i + 1),
                "year": "2",
                "section": "A",
                "branch": "CSE"
            }),
        );
    }
}

fn seed_counsellor(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    name: &str,
    max_students: i64,
) -> String {
    let faculty = request_ok(
        stdin,
        reader,
        &format!("seed-f-{}", tag),
        "faculty.create",
        json!({ "name": name, "department": "CSE" }),
    );
    let faculty_id = faculty
        .get("facultyId")
        .and_then(|v| v.as_str())
        .expect("facultyId")
        .to_string();
    request_ok(
        stdin,
        reader,
        &format!("seed-slot-{}", tag),
        "assignments.defineSlot",
        json!({
            "facultyId": faculty_id,
            "year": "2",
            "role": "counsellor",
            "maxStudents": max_students
        }),
    );
    faculty_id
}

#[test]
fn distributes_year_evenly_across_counsellors() {
    let workspace = temp_dir("campus-auto-even");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students(&mut stdin, &mut reader, 10);
    seed_counsellor(&mut stdin, &mut reader, "a", "Anand Kumar", 20);
    seed_counsellor(&mut stdin, &mut reader, "b", "Bhavana Devi", 20);
    seed_counsellor(&mut stdin, &mut reader, "c", "Charan Teja", 20);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.autoAssign",
        json!({ "year": "2", "role": "counsellor" }),
    );
    assert_eq!(result.get("placed").and_then(|v| v.as_i64()), Some(10));

    let loads: Vec<i64> = result
        .get("slots")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|s| s.get("assignedCount").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(loads.iter().sum::<i64>(), 10);
    assert!(loads.iter().max().unwrap() - loads.iter().min().unwrap() <= 1);

    // Everyone already has a counsellor; a second run places nobody.
    let rerun = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.autoAssign",
        json!({ "year": "2", "role": "counsellor" }),
    );
    assert_eq!(rerun.get("placed").and_then(|v| v.as_i64()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn keeps_existing_placements_and_tops_up_light_slots() {
    let workspace = temp_dir("campus-auto-topup");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students(&mut stdin, &mut reader, 6);
    let faculty_a = seed_counsellor(&mut stdin, &mut reader, "a", "Anand Kumar", 20);
    let faculty_b = seed_counsellor(&mut stdin, &mut reader, "b", "Bhavana Devi", 20);

    // Hand three students to A first; auto-assign must route the rest to B
    // until the loads level out.
    let students = request_ok(&mut stdin, &mut reader, "2", "students.list", json!({}));
    let ids: Vec<String> = students
        .get("students")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|s| s.get("id").and_then(|v| v.as_str()).unwrap().to_string())
        .collect();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.assign",
        json!({
            "facultyId": faculty_a,
            "year": "2",
            "role": "counsellor",
            "studentIds": [ids[0], ids[1], ids[2]]
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assignments.autoAssign",
        json!({ "year": "2", "role": "counsellor" }),
    );
    assert_eq!(result.get("placed").and_then(|v| v.as_i64()), Some(3));
    for slot in result.get("slots").and_then(|v| v.as_array()).unwrap() {
        assert_eq!(slot.get("assignedCount").and_then(|v| v.as_i64()), Some(3));
        let fid = slot.get("facultyId").and_then(|v| v.as_str()).unwrap();
        assert!(fid == faculty_a || fid == faculty_b);
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reports_capacity_exhaustion_without_partial_writes() {
    let workspace = temp_dir("campus-auto-full");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students(&mut stdin, &mut reader, 5);
    seed_counsellor(&mut stdin, &mut reader, "a", "Anand Kumar", 2);
    seed_counsellor(&mut stdin, &mut reader, "b", "Bhavana Devi", 2);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.autoAssign",
        json!({ "year": "2", "role": "counsellor" }),
    );
    assert_eq!(code, "capacity_exceeded");

    // Failure leaves the year untouched.
    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.listSlots",
        json!({ "year": "2", "role": "counsellor" }),
    );
    for slot in slots.get("slots").and_then(|v| v.as_array()).unwrap() {
        assert_eq!(slot.get("assignedCount").and_then(|v| v.as_i64()), Some(0));
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
