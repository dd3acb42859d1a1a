use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::week;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct TeacherRef {
    code: String,
    center_code: String,
}

fn list_teachers(conn: &Connection) -> rusqlite::Result<Vec<TeacherRef>> {
    let mut stmt = conn.prepare("SELECT code, center_code FROM teachers ORDER BY code")?;
    let rows = stmt.query_map([], |r| {
        Ok(TeacherRef {
            code: r.get(0)?,
            center_code: r.get(1)?,
        })
    })?;
    rows.collect()
}

/// One teacher's unit of work: a fresh term record plus one schedule row per
/// weekday. `ON CONFLICT DO NOTHING` leaves existing rows alone, so the same
/// statement serves both modes — after a reset wipe everything inserts, and
/// in incremental mode only the missing rows do. The composite unique keys
/// make this safe against a concurrent generation run as well.
fn materialize_teacher(
    conn: &Connection,
    teacher: &TeacherRef,
    term: &str,
) -> rusqlite::Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;

    let term_rows = tx.execute(
        "INSERT INTO teacher_terms(
            id, teacher_code, term, is_neighbor_teaching, neighbor_teaching,
            neighbor_centers, suggestion, projector, whiteboard2
         ) VALUES(?, ?, ?, 0, '', '', '', 0, 0)
         ON CONFLICT(teacher_code, term) DO NOTHING",
        (Uuid::new_v4().to_string(), &teacher.code, term),
    )?;

    let mut schedule_rows = 0;
    for day in week::WEEK_DAYS {
        schedule_rows += tx.execute(
            "INSERT INTO weekly_schedules(
                id, teacher_code, term, day_of_week, center,
                a, b, c, d, e, description, alternative_hours, forbidden_hours
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', '', '')
             ON CONFLICT(teacher_code, term, day_of_week) DO NOTHING",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                teacher.code,
                term,
                day,
                teacher.center_code,
                week::ABSENT_TEXT,
                week::ABSENT_TEXT,
                week::ABSENT_TEXT,
                week::ABSENT_TEXT,
                week::ABSENT_TEXT,
            ],
        )?;
    }

    tx.commit()?;
    Ok((term_rows, schedule_rows))
}

fn handle_term_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match req.params.get("term").and_then(|v| v.as_str()) {
        Some(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing term", None),
    };
    let reset = req
        .params
        .get("reset")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let term_known: Option<i64> = match conn
        .query_row("SELECT 1 FROM term_calender WHERE term = ?", [&term], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if term_known.is_none() {
        return err(
            &req.id,
            "not_found",
            "term not found in term calendar",
            Some(json!({ "term": term })),
        );
    }

    let teachers = match list_teachers(conn) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if reset {
        // Wipe the term's generated rows in one transaction, then rebuild
        // from scratch below.
        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };
        let wiped = tx
            .execute("DELETE FROM teacher_terms WHERE term = ?", [&term])
            .and_then(|_| tx.execute("DELETE FROM weekly_schedules WHERE term = ?", [&term]));
        if let Err(e) = wiped {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
        if let Err(e) = tx.commit() {
            return err(&req.id, "db_tx_failed", e.to_string(), None);
        }
    }

    // Each teacher commits independently; one bad teacher must not abort
    // the rest of the batch.
    let mut teacher_count = 0;
    let mut created_teacher_terms = 0;
    let mut created_schedules = 0;
    let mut error_count = 0;

    for teacher in &teachers {
        match materialize_teacher(conn, teacher, &term) {
            Ok((term_rows, schedule_rows)) => {
                teacher_count += 1;
                created_teacher_terms += term_rows;
                created_schedules += schedule_rows;
            }
            Err(_) => {
                error_count += 1;
            }
        }
    }

    ok(
        &req.id,
        json!({
            "term": term,
            "reset": reset,
            "teacherCount": teacher_count,
            "createdTeacherTerms": created_teacher_terms,
            "createdSchedules": created_schedules,
            "errorCount": error_count
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "term.generate" => Some(handle_term_generate(state, req)),
        _ => None,
    }
}
