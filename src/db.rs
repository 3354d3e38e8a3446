use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "studentd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role INTEGER NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            gender TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            profile_pic TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    // Workspaces created before push notifications have no token column.
    ensure_users_fcm_token(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_year TEXT NOT NULL,
            end_year TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            course_id INTEGER,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE SET NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            course_id INTEGER,
            session_id INTEGER,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE SET NULL,
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course_session ON students(course_id, session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            staff_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(staff_id) REFERENCES staff(id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_staff ON subjects(staff_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id) ON DELETE CASCADE,
            UNIQUE(subject_id, session_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_reports(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attendance_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            status INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(attendance_id) REFERENCES attendance(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            UNIQUE(attendance_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_reports_student ON attendance_reports(student_id)",
        [],
    )?;

    for (table, owner_table) in [
        ("leave_reports_staff", "staff"),
        ("leave_reports_student", "students"),
    ] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table}(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    message TEXT NOT NULL,
                    status INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    FOREIGN KEY(owner_id) REFERENCES {owner_table}(id) ON DELETE CASCADE
                )"
            ),
            [],
        )?;
    }

    for (table, owner_table) in [
        ("feedback_staff", "staff"),
        ("feedback_student", "students"),
    ] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table}(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    feedback TEXT NOT NULL,
                    reply TEXT NOT NULL DEFAULT '',
                    replied_at TEXT,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY(owner_id) REFERENCES {owner_table}(id) ON DELETE CASCADE
                )"
            ),
            [],
        )?;
    }

    for (table, owner_table) in [
        ("notifications_staff", "staff"),
        ("notifications_student", "students"),
    ] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table}(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    message TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY(owner_id) REFERENCES {owner_table}(id) ON DELETE CASCADE
                )"
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_results(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            test REAL NOT NULL DEFAULT 0,
            exam REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS login_sessions(
            key TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_login_sessions_user ON login_sessions(user_id)",
        [],
    )?;

    Ok(conn)
}

/// RFC 3339 timestamp used for every `*_at` column. Fixed width (whole
/// seconds, `Z` suffix) so the columns compare correctly as text.
pub fn now_ts() -> String {
    ts(chrono::Utc::now())
}

pub fn ts(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn ensure_users_fcm_token(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "fcm_token")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE users ADD COLUMN fcm_token TEXT NOT NULL DEFAULT ''",
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
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

    #[test]
    fn open_db_is_idempotent_and_adds_token_column() {
        let ws = temp_dir("studentd-db-open");
        {
            let conn = open_db(&ws).expect("first open");
            assert!(table_has_column(&conn, "users", "fcm_token").expect("pragma"));
        }
        let conn = open_db(&ws).expect("second open");
        assert!(table_has_column(&conn, "attendance", "session_id").expect("pragma"));
        assert!(!table_has_column(&conn, "attendance", "missing_col").expect("pragma"));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn legacy_users_table_gains_fcm_token() {
        let ws = temp_dir("studentd-db-migrate");
        {
            let conn = Connection::open(ws.join(DB_FILE)).expect("raw open");
            conn.execute(
                "CREATE TABLE users(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    role INTEGER NOT NULL,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    gender TEXT NOT NULL DEFAULT '',
                    address TEXT NOT NULL DEFAULT '',
                    profile_pic TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                [],
            )
            .expect("legacy users");
        }
        let conn = open_db(&ws).expect("open migrated");
        assert!(table_has_column(&conn, "users", "fcm_token").expect("pragma"));
        let _ = std::fs::remove_dir_all(ws);
    }
}
