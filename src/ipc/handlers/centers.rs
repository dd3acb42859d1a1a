use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_center_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "centers": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.center_code,
           c.title,
           (SELECT COUNT(*) FROM teachers t WHERE t.center_code = c.center_code) AS teacher_count
         FROM centers c
         ORDER BY c.center_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let center_code: String = row.get(0)?;
            let title: String = row.get(1)?;
            let teacher_count: i64 = row.get(2)?;
            Ok(json!({
                "centerCode": center_code,
                "title": title,
                "teacherCount": teacher_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(centers) => ok(&req.id, json!({ "centers": centers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_center_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let center_code = match req.params.get("centerCode").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing centerCode", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing title", None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM centers WHERE center_code = ?",
            [&center_code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(
            &req.id,
            "conflict",
            "a center with this code already exists",
            Some(json!({ "centerCode": center_code })),
        );
    }

    if let Err(e) = conn.execute(
        "INSERT INTO centers(center_code, title) VALUES(?, ?)",
        (&center_code, &title),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "centers" })),
        );
    }

    ok(&req.id, json!({ "centerCode": center_code, "title": title }))
}

fn handle_center_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let center_code = match req.params.get("centerCode").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing centerCode", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing title", None),
    };

    match conn.execute(
        "UPDATE centers SET title = ? WHERE center_code = ?",
        (&title, &center_code),
    ) {
        Ok(0) => err(&req.id, "not_found", "center not found", None),
        Ok(_) => ok(&req.id, json!({ "centerCode": center_code, "title": title })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_center_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let center_code = match req.params.get("centerCode").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing centerCode", None),
    };

    let referencing: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM teachers WHERE center_code = ?",
        [&center_code],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referencing > 0 {
        return err(
            &req.id,
            "conflict",
            "center is still referenced by teachers",
            Some(json!({ "teacherCount": referencing })),
        );
    }

    match conn.execute("DELETE FROM centers WHERE center_code = ?", [&center_code]) {
        Ok(0) => err(&req.id, "not_found", "center not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": center_code })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "center.list" => Some(handle_center_list(state, req)),
        "center.create" => Some(handle_center_create(state, req)),
        "center.update" => Some(handle_center_update(state, req)),
        "center.delete" => Some(handle_center_delete(state, req)),
        _ => None,
    }
}
