use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "teachers.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS centers(
            center_code TEXT PRIMARY KEY,
            title TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            mobile TEXT NOT NULL DEFAULT '',
            field_of_study TEXT NOT NULL DEFAULT '',
            center_code TEXT NOT NULL,
            cooperation_type TEXT NOT NULL,
            academic_rank TEXT NOT NULL DEFAULT '',
            executive_position TEXT NOT NULL DEFAULT '',
            national_code TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(center_code) REFERENCES centers(center_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_cooperation ON teachers(cooperation_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_center ON teachers(center_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_calender(
            term TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            start_date TEXT NOT NULL DEFAULT '',
            end_date TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_term_calender_active(&conn)?;
    // At most one term may be active at a time; the partial index makes the
    // store reject a second active row no matter which code path writes it.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_term_calender_single_active
         ON term_calender(active) WHERE active = 1",
        [],
    )?;

    // Teacher-scoped rows reference teachers by business code, not by row id.
    // Historical rows must outlive the teacher record, so there is no foreign
    // key here; teacher codes are immutable after creation instead (enforced
    // in the teacher.update handler).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_terms(
            id TEXT PRIMARY KEY,
            teacher_code TEXT NOT NULL,
            term TEXT NOT NULL,
            is_neighbor_teaching INTEGER NOT NULL DEFAULT 0,
            neighbor_teaching TEXT NOT NULL DEFAULT '',
            neighbor_centers TEXT NOT NULL DEFAULT '',
            suggestion TEXT NOT NULL DEFAULT '',
            projector INTEGER NOT NULL DEFAULT 0,
            whiteboard2 INTEGER NOT NULL DEFAULT 0,
            UNIQUE(teacher_code, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_terms_term ON teacher_terms(term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_schedules(
            id TEXT PRIMARY KEY,
            teacher_code TEXT NOT NULL,
            term TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            center TEXT NOT NULL DEFAULT '',
            a TEXT NOT NULL DEFAULT '',
            b TEXT NOT NULL DEFAULT '',
            c TEXT NOT NULL DEFAULT '',
            d TEXT NOT NULL DEFAULT '',
            e TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            alternative_hours TEXT NOT NULL DEFAULT '',
            forbidden_hours TEXT NOT NULL DEFAULT '',
            UNIQUE(teacher_code, term, day_of_week)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_schedules_term ON weekly_schedules(term)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_schedules_teacher ON weekly_schedules(teacher_code)",
        [],
    )?;

    // A lock is presence-based: a row here means the (teacher, term, day)
    // schedule row is closed to self-service edits.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_locks(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            full_name TEXT NOT NULL,
            center_code TEXT NOT NULL,
            teacher_code TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            term TEXT NOT NULL,
            locked_at TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            UNIQUE(teacher_code, term, day_of_week)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_locks_term ON schedule_locks(term)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_locks_teacher ON schedule_locks(teacher_code)",
        [],
    )?;

    // Append-only. Rows are written by the audit tracker inside the same
    // transaction as the update they describe; nothing in this codebase may
    // UPDATE or DELETE them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS change_history(
            id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            day_of_week TEXT NOT NULL DEFAULT '',
            column_name TEXT NOT NULL,
            old_value TEXT NOT NULL,
            new_value TEXT NOT NULL,
            changed_by TEXT NOT NULL,
            changed_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_change_history_day_of_week(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_change_history_record ON change_history(table_name, record_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_change_history_changed_at ON change_history(changed_at)",
        [],
    )?;

    Ok(conn)
}

fn ensure_term_calender_active(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "term_calender", "active")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE term_calender ADD COLUMN active INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_change_history_day_of_week(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces recorded schedule changes without the weekday.
    if table_has_column(conn, "change_history", "day_of_week")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE change_history ADD COLUMN day_of_week TEXT NOT NULL DEFAULT ''",
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
