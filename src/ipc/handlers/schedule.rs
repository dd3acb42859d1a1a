use crate::audit;
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

/// The editable portion of one weekly-schedule row, in a fixed field order
/// shared by the snapshot, the incoming state, and the audit diff.
#[derive(Debug, Clone)]
struct ScheduleFields {
    center: String,
    a: String,
    b: String,
    c: String,
    d: String,
    e: String,
    description: String,
    alternative_hours: String,
    forbidden_hours: String,
}

impl ScheduleFields {
    fn as_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("center", self.center.clone()),
            ("a", self.a.clone()),
            ("b", self.b.clone()),
            ("c", self.c.clone()),
            ("d", self.d.clone()),
            ("e", self.e.clone()),
            ("description", self.description.clone()),
            ("alternative_hours", self.alternative_hours.clone()),
            ("forbidden_hours", self.forbidden_hours.clone()),
        ]
    }

    /// Applies the request on top of the snapshot; absent params keep the
    /// stored value, so a partial edit diffs only what it actually sends.
    fn merged(&self, params: &serde_json::Value) -> ScheduleFields {
        let pick = |key: &str, fallback: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| fallback.to_string())
        };
        ScheduleFields {
            center: pick("center", &self.center),
            a: pick("a", &self.a),
            b: pick("b", &self.b),
            c: pick("c", &self.c),
            d: pick("d", &self.d),
            e: pick("e", &self.e),
            description: pick("description", &self.description),
            alternative_hours: pick("alternativeHours", &self.alternative_hours),
            forbidden_hours: pick("forbiddenHours", &self.forbidden_hours),
        }
    }
}

struct ScheduleRow {
    teacher_code: String,
    term: String,
    day_of_week: String,
    fields: ScheduleFields,
}

fn load_schedule_row(conn: &Connection, schedule_id: &str) -> Result<Option<ScheduleRow>, HandlerErr> {
    conn.query_row(
        "SELECT teacher_code, term, day_of_week, center, a, b, c, d, e,
                description, alternative_hours, forbidden_hours
         FROM weekly_schedules WHERE id = ?",
        [schedule_id],
        |r| {
            Ok(ScheduleRow {
                teacher_code: r.get(0)?,
                term: r.get(1)?,
                day_of_week: r.get(2)?,
                fields: ScheduleFields {
                    center: r.get(3)?,
                    a: r.get(4)?,
                    b: r.get(5)?,
                    c: r.get(6)?,
                    d: r.get(7)?,
                    e: r.get(8)?,
                    description: r.get(9)?,
                    alternative_hours: r.get(10)?,
                    forbidden_hours: r.get(11)?,
                },
            })
        },
    )
    .optional()
    .map_err(db_err)
}

fn is_locked(conn: &Connection, row: &ScheduleRow) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM schedule_locks
         WHERE teacher_code = ? AND term = ? AND day_of_week = ?",
        (&row.teacher_code, &row.term, &row.day_of_week),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn handle_schedule_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (teacher_code, term) = match (
        required_str(&req.params, "teacherCode"),
        required_str(&req.params, "term"),
    ) {
        (Ok(code), Ok(term)) => (code, term),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, day_of_week, center, a, b, c, d, e, description,
                alternative_hours, forbidden_hours
         FROM weekly_schedules
         WHERE teacher_code = ? AND term = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&teacher_code, &term), |r| {
            Ok(json!({
                "scheduleId": r.get::<_, String>(0)?,
                "dayOfWeek": r.get::<_, String>(1)?,
                "center": r.get::<_, String>(2)?,
                "a": r.get::<_, String>(3)?,
                "b": r.get::<_, String>(4)?,
                "c": r.get::<_, String>(5)?,
                "d": r.get::<_, String>(6)?,
                "e": r.get::<_, String>(7)?,
                "description": r.get::<_, String>(8)?,
                "alternativeHours": r.get::<_, String>(9)?,
                "forbiddenHours": r.get::<_, String>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(schedules) => ok(
            &req.id,
            json!({ "teacherCode": teacher_code, "term": term, "schedules": schedules }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schedule_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let schedule_id = match required_str(&req.params, "scheduleId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let as_admin = req
        .params
        .get("asAdmin")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let actor = audit::resolve_actor(req.params.get("actor").and_then(|v| v.as_str()));

    let row = match load_schedule_row(conn, &schedule_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "schedule row not found", None),
        Err(e) => return e.response(&req.id),
    };

    // Presence of a lock row closes the day to self-service edits;
    // administrative edits go through regardless.
    if !as_admin {
        match is_locked(conn, &row) {
            Ok(true) => {
                return err(
                    &req.id,
                    "locked",
                    "schedule day is locked against self-service edits",
                    Some(json!({
                        "teacherCode": row.teacher_code,
                        "term": row.term,
                        "dayOfWeek": row.day_of_week
                    })),
                )
            }
            Ok(false) => {}
            Err(e) => return e.response(&req.id),
        }
    }

    let updated = row.fields.merged(&req.params);
    let changes = audit::diff_fields(&row.fields.as_pairs(), &updated.as_pairs());
    if changes.is_empty() {
        return ok(&req.id, json!({ "scheduleId": schedule_id, "changedFields": 0 }));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE weekly_schedules SET
            center = ?, a = ?, b = ?, c = ?, d = ?, e = ?,
            description = ?, alternative_hours = ?, forbidden_hours = ?
         WHERE id = ?",
        rusqlite::params![
            updated.center,
            updated.a,
            updated.b,
            updated.c,
            updated.d,
            updated.e,
            updated.description,
            updated.alternative_hours,
            updated.forbidden_hours,
            schedule_id,
        ],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    // History rows commit or roll back together with the update itself.
    if let Err(e) = audit::record_changes(
        &tx,
        audit::TrackedTable::WeeklySchedules,
        &schedule_id,
        &row.day_of_week,
        &changes,
        &actor,
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "scheduleId": schedule_id, "changedFields": changes.len() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.get" => Some(handle_schedule_get(state, req)),
        "schedule.update" => Some(handle_schedule_update(state, req)),
        _ => None,
    }
}
