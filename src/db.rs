use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("campus.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            hall_ticket TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            year TEXT NOT NULL,
            section TEXT NOT NULL,
            branch TEXT NOT NULL,
            cgpa REAL,
            attendance_percent REAL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_year ON students(year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_hall_ticket ON students(hall_ticket)",
        [],
    )?;

    // Existing workspaces may predate the derived attendance column. Add if needed.
    ensure_students_attendance_percent(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            designation TEXT,
            email TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_slots(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            year TEXT NOT NULL,
            role TEXT NOT NULL,
            max_students INTEGER NOT NULL,
            UNIQUE(faculty_id, year),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignment_slots_year_role ON assignment_slots(year, role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_assignments(
            student_id TEXT NOT NULL,
            role TEXT NOT NULL,
            slot_id TEXT NOT NULL,
            assigned_at TEXT,
            PRIMARY KEY(student_id, role),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(slot_id) REFERENCES assignment_slots(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_assignments_slot ON student_assignments(slot_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_requests(
            id TEXT PRIMARY KEY,
            applicant_id TEXT NOT NULL,
            applicant_kind TEXT NOT NULL,
            leave_type TEXT NOT NULL,
            from_date TEXT NOT NULL,
            to_date TEXT NOT NULL,
            days INTEGER NOT NULL,
            reason TEXT NOT NULL,
            documents TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            applied_on TEXT NOT NULL,
            approved_by TEXT,
            approved_on TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leave_requests_applicant ON leave_requests(applicant_kind, applicant_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leave_requests_status ON leave_requests(status)",
        [],
    )?;
    ensure_leave_requests_documents(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            organization TEXT NOT NULL,
            issued_on TEXT NOT NULL,
            expires_on TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            rejection_reason TEXT,
            reviewed_by TEXT,
            reviewed_on TEXT,
            file_name TEXT,
            file_size INTEGER,
            sha256 TEXT,
            submitted_on TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_student ON certificates(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_status ON certificates(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_materials(
            id TEXT PRIMARY KEY,
            uploader_id TEXT NOT NULL,
            title TEXT NOT NULL,
            subject TEXT NOT NULL,
            year TEXT NOT NULL,
            semester TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER,
            sha256 TEXT,
            uploaded_on TEXT NOT NULL,
            downloads INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_study_materials_subject ON study_materials(subject)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_study_materials_year_sem ON study_materials(year, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            subject TEXT NOT NULL,
            present INTEGER NOT NULL,
            PRIMARY KEY(student_id, date, subject),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_student ON attendance_sessions(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_date ON attendance_sessions(date, subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam TEXT NOT NULL,
            subject TEXT NOT NULL,
            marks REAL NOT NULL,
            max_marks REAL NOT NULL,
            recorded_on TEXT NOT NULL,
            UNIQUE(student_id, exam, subject),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_student ON exam_results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_exam ON exam_results(exam)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            sender_role TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            recipient_role TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_on TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_role, recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS collections(
            key TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // Migrate workspaces written by the browser edition to the canonical
    // leave status spelling:
    // - leaves used 'pending'/'approved'/... lowercase in some dumps
    // - 'cancel' was stored for applicant-withdrawn requests
    migrate_leave_statuses(&conn)?;

    Ok(conn)
}

fn ensure_students_attendance_percent(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "attendance_percent")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN attendance_percent REAL", [])?;
    Ok(())
}

fn ensure_leave_requests_documents(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "leave_requests", "documents")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE leave_requests ADD COLUMN documents TEXT NOT NULL DEFAULT '[]'",
        [],
    )?;
    Ok(())
}

fn migrate_leave_statuses(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE leave_requests SET status = 'Pending' WHERE status = 'pending'",
        [],
    )?;
    conn.execute(
        "UPDATE leave_requests SET status = 'Approved' WHERE status = 'approved'",
        [],
    )?;
    conn.execute(
        "UPDATE leave_requests SET status = 'Rejected' WHERE status = 'rejected'",
        [],
    )?;
    conn.execute(
        "UPDATE leave_requests SET status = 'Cancelled' WHERE status IN ('cancelled', 'cancel')",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
