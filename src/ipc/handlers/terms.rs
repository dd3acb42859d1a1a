use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

fn term_row_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let term: String = row.get(0)?;
    let title: String = row.get(1)?;
    let start_date: String = row.get(2)?;
    let end_date: String = row.get(3)?;
    let active: i64 = row.get(4)?;
    Ok(json!({
        "term": term,
        "title": title,
        "startDate": start_date,
        "endDate": end_date,
        "active": active != 0
    }))
}

fn term_exists(conn: &Connection, term: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM term_calender WHERE term = ?", [term], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn handle_term_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "terms": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT term, title, start_date, end_date, active
         FROM term_calender
         ORDER BY term DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| term_row_json(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_term_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let row = conn
        .query_row(
            "SELECT term, title, start_date, end_date, active
             FROM term_calender WHERE term = ?",
            [&term],
            |row| term_row_json(row),
        )
        .optional();

    match row {
        Ok(Some(t)) => ok(&req.id, t),
        Ok(None) => err(&req.id, "not_found", "term not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_term_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (term, title) = match (
        required_str(&req.params, "term"),
        required_str(&req.params, "title"),
    ) {
        (Ok(term), Ok(title)) => (term, title),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };
    let start_date = optional_str(&req.params, "startDate").unwrap_or_default();
    let end_date = optional_str(&req.params, "endDate").unwrap_or_default();

    match term_exists(conn, &term) {
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "a term with this code already exists",
                Some(json!({ "term": term })),
            )
        }
        Ok(false) => {}
        Err(e) => return e.response(&req.id),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO term_calender(term, title, start_date, end_date, active)
         VALUES(?, ?, ?, ?, 0)",
        (&term, &title, &start_date, &end_date),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "term_calender" })),
        );
    }

    ok(&req.id, json!({ "term": term, "title": title }))
}

fn handle_term_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let title = match required_str(&req.params, "title") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let start_date = optional_str(&req.params, "startDate").unwrap_or_default();
    let end_date = optional_str(&req.params, "endDate").unwrap_or_default();

    match conn.execute(
        "UPDATE term_calender SET title = ?, start_date = ?, end_date = ? WHERE term = ?",
        (&title, &start_date, &end_date, &term),
    ) {
        Ok(0) => err(&req.id, "not_found", "term not found", None),
        Ok(_) => ok(&req.id, json!({ "term": term })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

// Flips the single active flag. Both updates commit together so there is
// never a window with two active terms; the partial unique index in db.rs
// backs this up at the storage layer.
fn handle_term_activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match term_exists(conn, &term) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return e.response(&req.id),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("UPDATE term_calender SET active = 0 WHERE active = 1", []) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "UPDATE term_calender SET active = 1 WHERE term = ?",
        [&term],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "term": term, "active": true }))
}

fn handle_term_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match conn.execute("DELETE FROM term_calender WHERE term = ?", [&term]) {
        Ok(0) => err(&req.id, "not_found", "term not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": term })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "term.list" => Some(handle_term_list(state, req)),
        "term.get" => Some(handle_term_get(state, req)),
        "term.create" => Some(handle_term_create(state, req)),
        "term.update" => Some(handle_term_update(state, req)),
        "term.activate" => Some(handle_term_activate(state, req)),
        "term.delete" => Some(handle_term_delete(state, req)),
        _ => None,
    }
}
