use crate::audit;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::week;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use uuid::Uuid;

/// Cohort filter value meaning "every teacher, regardless of cooperation
/// type".
const ALL_TEACHERS: &str = "همه اساتید";

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn optional_str(params: &serde_json::Value, key: &str) -> String {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Resolves the cohort for a bulk operation: all teachers, or only those
/// with a matching cooperation type.
fn cohort_codes(conn: &Connection, cooperation_type: &str) -> Result<Vec<String>, HandlerErr> {
    let db_err = |e: rusqlite::Error| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    };

    if cooperation_type == ALL_TEACHERS {
        let mut stmt = conn
            .prepare("SELECT code FROM teachers ORDER BY code")
            .map_err(db_err)?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0)).map_err(db_err)?;
        return rows.collect::<Result<Vec<_>, _>>().map_err(db_err);
    }

    let mut stmt = conn
        .prepare("SELECT code FROM teachers WHERE cooperation_type = ? ORDER BY code")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([cooperation_type], |r| r.get::<_, String>(0))
        .map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

fn in_placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

fn handle_lock_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let teacher_code = req
        .params
        .get("teacherCode")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let sql = format!(
        "SELECT id, username, full_name, center_code, teacher_code, day_of_week,
                term, locked_at, description
         FROM schedule_locks
         WHERE term = ?{}",
        if teacher_code.is_some() {
            " AND teacher_code = ?"
        } else {
            ""
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let row_json = |r: &rusqlite::Row| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "lockId": r.get::<_, String>(0)?,
            "username": r.get::<_, String>(1)?,
            "fullName": r.get::<_, String>(2)?,
            "centerCode": r.get::<_, String>(3)?,
            "teacherCode": r.get::<_, String>(4)?,
            "dayOfWeek": r.get::<_, String>(5)?,
            "term": r.get::<_, String>(6)?,
            "lockedAt": r.get::<_, String>(7)?,
            "description": r.get::<_, String>(8)?,
        }))
    };

    let rows = match teacher_code {
        Some(code) => stmt
            .query_map((&term, &code), row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([&term], row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(locks) => ok(&req.id, json!({ "locks": locks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lock_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let teacher_code = match required_str(&req.params, "teacherCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let day_of_week = match required_str(&req.params, "dayOfWeek") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !week::is_week_day(&day_of_week) {
        return err(
            &req.id,
            "bad_params",
            "unknown day of week",
            Some(json!({ "dayOfWeek": day_of_week })),
        );
    }
    let username = audit::resolve_actor(req.params.get("username").and_then(|v| v.as_str()));

    let lock_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO schedule_locks(
            id, username, full_name, center_code, teacher_code, day_of_week,
            term, locked_at, description
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            lock_id,
            username,
            optional_str(&req.params, "fullName"),
            optional_str(&req.params, "centerCode"),
            teacher_code,
            day_of_week,
            term,
            Utc::now().to_rfc3339(),
            optional_str(&req.params, "description"),
        ],
    );

    match insert {
        Ok(_) => ok(&req.id, json!({ "lockId": lock_id })),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(
                &req.id,
                "conflict",
                "this day is already locked for the teacher and term",
                Some(json!({
                    "teacherCode": teacher_code,
                    "term": term,
                    "dayOfWeek": day_of_week
                })),
            )
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_lock_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lock_id = match required_str(&req.params, "lockId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match conn.execute("DELETE FROM schedule_locks WHERE id = ?", [&lock_id]) {
        Ok(0) => err(&req.id, "not_found", "lock not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": lock_id })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

// Replaces the cohort's locks for the term: any prior locks go first, then
// one row per teacher per weekday lands in the same transaction. Running it
// twice with the same arguments therefore never accumulates rows.
fn handle_lock_cohort(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cooperation_type = match required_str(&req.params, "cooperationType") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let username = match required_str(&req.params, "username") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let full_name = optional_str(&req.params, "fullName");
    let center_code = optional_str(&req.params, "centerCode");
    let description = optional_str(&req.params, "description");

    let codes = match cohort_codes(conn, &cooperation_type) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if codes.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no teachers match the cooperation type",
            Some(json!({ "cooperationType": cooperation_type })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let delete_sql = format!(
        "DELETE FROM schedule_locks WHERE term = ? AND teacher_code IN ({})",
        in_placeholders(codes.len())
    );
    let mut delete_params: Vec<Value> = Vec::with_capacity(codes.len() + 1);
    delete_params.push(Value::Text(term.clone()));
    delete_params.extend(codes.iter().map(|c| Value::Text(c.clone())));
    if let Err(e) = tx.execute(&delete_sql, params_from_iter(delete_params)) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    // Every row of one bulk lock shares a single timestamp.
    let locked_at = Utc::now().to_rfc3339();
    let mut locks_created = 0;
    for code in &codes {
        for day in week::WEEK_DAYS {
            let insert = tx.execute(
                "INSERT INTO schedule_locks(
                    id, username, full_name, center_code, teacher_code,
                    day_of_week, term, locked_at, description
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    username,
                    full_name,
                    center_code,
                    code,
                    day,
                    term,
                    locked_at,
                    description,
                ],
            );
            match insert {
                Ok(n) => locks_created += n,
                Err(e) => {
                    let _ = tx.rollback();
                    return err(&req.id, "db_insert_failed", e.to_string(), None);
                }
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "term": term,
            "locksCreated": locks_created,
            "teachersAffected": codes.len()
        }),
    )
}

fn handle_unlock_cohort(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cooperation_type = match required_str(&req.params, "cooperationType") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let codes = match cohort_codes(conn, &cooperation_type) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if codes.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no teachers match the cooperation type",
            Some(json!({ "cooperationType": cooperation_type })),
        );
    }

    let delete_sql = format!(
        "DELETE FROM schedule_locks WHERE term = ? AND teacher_code IN ({})",
        in_placeholders(codes.len())
    );
    let mut params: Vec<Value> = Vec::with_capacity(codes.len() + 1);
    params.push(Value::Text(term.clone()));
    params.extend(codes.iter().map(|c| Value::Text(c.clone())));

    match conn.execute(&delete_sql, params_from_iter(params)) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "no locks found for the cohort and term",
            Some(json!({ "term": term, "cooperationType": cooperation_type })),
        ),
        Ok(removed) => ok(&req.id, json!({ "term": term, "locksRemoved": removed })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lock.list" => Some(handle_lock_list(state, req)),
        "lock.create" => Some(handle_lock_create(state, req)),
        "lock.delete" => Some(handle_lock_delete(state, req)),
        "lock.lockCohort" => Some(handle_lock_cohort(state, req)),
        "lock.unlockCohort" => Some(handle_unlock_cohort(state, req)),
        _ => None,
    }
}
