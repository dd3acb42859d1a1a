use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
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

// Every teacher write path validates the center reference the same way;
// nothing substitutes a fallback center for an unknown code.
fn center_exists(conn: &Connection, center_code: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM centers WHERE center_code = ?",
        [center_code],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn teacher_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "teacherId": row.get::<_, String>(0)?,
        "code": row.get::<_, String>(1)?,
        "firstName": row.get::<_, String>(2)?,
        "lastName": row.get::<_, String>(3)?,
        "email": row.get::<_, String>(4)?,
        "mobile": row.get::<_, String>(5)?,
        "fieldOfStudy": row.get::<_, String>(6)?,
        "centerCode": row.get::<_, String>(7)?,
        "cooperationType": row.get::<_, String>(8)?,
        "academicRank": row.get::<_, String>(9)?,
        "executivePosition": row.get::<_, String>(10)?,
        "nationalCode": row.get::<_, String>(11)?,
    }))
}

const TEACHER_COLUMNS: &str = "id, code, first_name, last_name, email, mobile,
     field_of_study, center_code, cooperation_type, academic_rank,
     executive_position, national_code";

fn handle_teacher_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    // Optional cohort filter, same dimension the lock engine uses.
    let cooperation = req
        .params
        .get("cooperationType")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let sql = format!(
        "SELECT {} FROM teachers {} ORDER BY last_name, first_name",
        TEACHER_COLUMNS,
        if cooperation.is_some() {
            "WHERE cooperation_type = ?"
        } else {
            ""
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = match cooperation {
        Some(coop) => stmt
            .query_map([&coop], |row| teacher_json(row))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], |row| teacher_json(row))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teacher_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let code = match required_str(&req.params, "code") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let row = conn
        .query_row(
            &format!("SELECT {} FROM teachers WHERE code = ?", TEACHER_COLUMNS),
            [&code],
            |row| teacher_json(row),
        )
        .optional();

    match row {
        Ok(Some(t)) => ok(&req.id, t),
        Ok(None) => err(&req.id, "not_found", "teacher not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teacher_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match required_str(&req.params, "code") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let first_name = match required_str(&req.params, "firstName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let last_name = match required_str(&req.params, "lastName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let center_code = match required_str(&req.params, "centerCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cooperation_type = match required_str(&req.params, "cooperationType") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match center_exists(conn, &center_code) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "bad_params",
                "unknown center code",
                Some(json!({ "centerCode": center_code })),
            )
        }
        Err(e) => return e.response(&req.id),
    }

    let duplicate: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE code = ?", [&code], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate.is_some() {
        return err(
            &req.id,
            "conflict",
            "a teacher with this code already exists",
            Some(json!({ "code": code })),
        );
    }

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(
            id, code, first_name, last_name, email, mobile, field_of_study,
            center_code, cooperation_type, academic_rank, executive_position,
            national_code, password_hash
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            teacher_id,
            code,
            first_name,
            last_name,
            optional_str(&req.params, "email"),
            optional_str(&req.params, "mobile"),
            optional_str(&req.params, "fieldOfStudy"),
            center_code,
            cooperation_type,
            optional_str(&req.params, "academicRank"),
            optional_str(&req.params, "executivePosition"),
            optional_str(&req.params, "nationalCode"),
            optional_str(&req.params, "passwordHash"),
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "teacherId": teacher_id, "code": code }))
}

fn handle_teacher_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match required_str(&req.params, "teacherId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let stored_code: Option<String> = match conn
        .query_row("SELECT code FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(stored_code) = stored_code else {
        return err(&req.id, "not_found", "teacher not found", None);
    };

    // Schedules, term records, locks and history all key on the code by
    // value. Re-keying a teacher would orphan every one of those rows, so
    // the code is immutable after creation.
    if let Some(requested) = req.params.get("code").and_then(|v| v.as_str()) {
        if requested.trim() != stored_code {
            return err(
                &req.id,
                "conflict",
                "teacher code is immutable after creation",
                Some(json!({ "code": stored_code, "requested": requested.trim() })),
            );
        }
    }

    let first_name = match required_str(&req.params, "firstName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let last_name = match required_str(&req.params, "lastName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let center_code = match required_str(&req.params, "centerCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cooperation_type = match required_str(&req.params, "cooperationType") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match center_exists(conn, &center_code) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "bad_params",
                "unknown center code",
                Some(json!({ "centerCode": center_code })),
            )
        }
        Err(e) => return e.response(&req.id),
    }

    if let Err(e) = conn.execute(
        "UPDATE teachers SET
            first_name = ?, last_name = ?, email = ?, mobile = ?,
            field_of_study = ?, center_code = ?, cooperation_type = ?,
            academic_rank = ?, executive_position = ?, national_code = ?
         WHERE id = ?",
        rusqlite::params![
            first_name,
            last_name,
            optional_str(&req.params, "email"),
            optional_str(&req.params, "mobile"),
            optional_str(&req.params, "fieldOfStudy"),
            center_code,
            cooperation_type,
            optional_str(&req.params, "academicRank"),
            optional_str(&req.params, "executivePosition"),
            optional_str(&req.params, "nationalCode"),
            teacher_id,
        ],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "teacherId": teacher_id, "code": stored_code }))
}

fn handle_teacher_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match required_str(&req.params, "code") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Term records, schedules and history rows for the code survive the
    // teacher record; deletion only removes the directory entry.
    match conn.execute("DELETE FROM teachers WHERE code = ?", [&code]) {
        Ok(0) => err(&req.id, "not_found", "teacher not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": code })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teacher.list" => Some(handle_teacher_list(state, req)),
        "teacher.get" => Some(handle_teacher_get(state, req)),
        "teacher.create" => Some(handle_teacher_create(state, req)),
        "teacher.update" => Some(handle_teacher_update(state, req)),
        "teacher.delete" => Some(handle_teacher_delete(state, req)),
        _ => None,
    }
}
