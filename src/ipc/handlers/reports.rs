//! Read-only aggregations over the audit trail and schedule data. Changes
//! attributed to the bootstrap admin identity are excluded here by
//! convention; the rows themselves are stored like any other.

use crate::audit;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::week;
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

// Teachers with at least one non-admin change against a schedule row of the
// term. Shared by the summary and the completion split.
const CHANGED_CODES_SUBQUERY: &str = "
    SELECT DISTINCT ws.teacher_code
    FROM change_history ch
    JOIN weekly_schedules ws ON ws.id = ch.record_id
    WHERE ch.table_name = 'weekly_schedules'
      AND ch.changed_by <> ?
      AND ws.term = ?";

fn handle_weekly_changes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let sql = format!(
        "SELECT t.cooperation_type,
                SUM(CASE WHEN t.code IN ({}) THEN 1 ELSE 0 END) AS changed_count,
                COUNT(*) AS total_count
         FROM teachers t
         GROUP BY t.cooperation_type
         ORDER BY t.cooperation_type",
        CHANGED_CODES_SUBQUERY
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((audit::ADMIN_ACTOR, &term), |r| {
            Ok(json!({
                "cooperationType": r.get::<_, String>(0)?,
                "changedCount": r.get::<_, i64>(1)?,
                "totalCount": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(summary) => ok(&req.id, json!({ "term": term, "summary": summary })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teacher_changes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (term, teacher_code) = match (
        required_str(&req.params, "term"),
        required_str(&req.params, "teacherCode"),
    ) {
        (Ok(term), Ok(code)) => (term, code),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };

    let schedule_rows: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM weekly_schedules WHERE term = ? AND teacher_code = ?",
        (&term, &teacher_code),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if schedule_rows == 0 {
        return err(
            &req.id,
            "not_found",
            "no schedule rows for this teacher in this term",
            Some(json!({ "term": term, "teacherCode": teacher_code })),
        );
    }

    let mut stmt = match conn.prepare(
        "SELECT ch.record_id, ch.day_of_week, ch.column_name, ch.old_value,
                ch.new_value, ch.changed_by, ch.changed_at
         FROM change_history ch
         JOIN weekly_schedules ws ON ws.id = ch.record_id
         WHERE ch.table_name = 'weekly_schedules'
           AND ch.changed_by <> ?
           AND ws.term = ?
           AND ws.teacher_code = ?
         ORDER BY ch.changed_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((audit::ADMIN_ACTOR, &term, &teacher_code), |r| {
            Ok(json!({
                "recordId": r.get::<_, String>(0)?,
                "dayOfWeek": r.get::<_, String>(1)?,
                "columnName": r.get::<_, String>(2)?,
                "oldValue": r.get::<_, String>(3)?,
                "newValue": r.get::<_, String>(4)?,
                "changedBy": r.get::<_, String>(5)?,
                "changedAt": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(changes) => ok(
            &req.id,
            json!({ "term": term, "teacherCode": teacher_code, "changes": changes }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

// Splits one cooperation type's teachers into those who did / did not touch
// their term schedule, for follow-up by the administration.
fn handle_teachers_by_cooperation(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (term, cooperation_type) = match (
        required_str(&req.params, "term"),
        required_str(&req.params, "cooperationType"),
    ) {
        (Ok(term), Ok(coop)) => (term, coop),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };
    let completed = req
        .params
        .get("completed")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let sql = format!(
        "SELECT t.code, t.first_name, t.last_name, t.mobile, c.title,
                t.cooperation_type, t.national_code
         FROM teachers t
         JOIN centers c ON c.center_code = t.center_code
         WHERE t.cooperation_type = ?
           AND t.code {} ({})
         ORDER BY t.last_name, t.first_name",
        if completed { "IN" } else { "NOT IN" },
        CHANGED_CODES_SUBQUERY
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&cooperation_type, audit::ADMIN_ACTOR, &term), |r| {
            Ok(json!({
                "code": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "mobile": r.get::<_, String>(3)?,
                "centerTitle": r.get::<_, String>(4)?,
                "cooperationType": r.get::<_, String>(5)?,
                "nationalCode": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(
            &req.id,
            json!({ "term": term, "completed": completed, "teachers": teachers }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

// Who is actually present at a center on a given weekday: teachers of the
// cooperation type with at least one slot that is neither blank nor the
// absent sentinel.
fn handle_teachers_by_center_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = match required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let center_code = match required_str(&req.params, "centerCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let day_of_week = match required_str(&req.params, "dayOfWeek") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cooperation_type = match required_str(&req.params, "cooperationType") {
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

    let mut stmt = match conn.prepare(
        "SELECT t.code, t.first_name, t.last_name, t.mobile,
                ws.a, ws.b, ws.c, ws.d, ws.e
         FROM weekly_schedules ws
         JOIN teachers t ON t.code = ws.teacher_code
         WHERE ws.term = ? AND ws.center = ? AND ws.day_of_week = ?
           AND t.cooperation_type = ?
         ORDER BY t.last_name, t.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    struct PresenceRow {
        code: String,
        first_name: String,
        last_name: String,
        mobile: String,
        slots: [String; 5],
    }

    let rows = stmt
        .query_map(
            (&term, &center_code, &day_of_week, &cooperation_type),
            |r| {
                Ok(PresenceRow {
                    code: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                    mobile: r.get(3)?,
                    slots: [r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?, r.get(8)?],
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let teachers: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|row| row.slots.iter().any(|s| week::slot_has_presence(s)))
        .map(|row| {
            json!({
                "code": row.code,
                "firstName": row.first_name,
                "lastName": row.last_name,
                "mobile": row.mobile,
                "a": row.slots[0],
                "b": row.slots[1],
                "c": row.slots[2],
                "d": row.slots[3],
                "e": row.slots[4],
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "term": term,
            "centerCode": center_code,
            "dayOfWeek": day_of_week,
            "teachers": teachers
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.weeklyChanges" => Some(handle_weekly_changes(state, req)),
        "report.teacherChanges" => Some(handle_teacher_changes(state, req)),
        "report.teachersByCooperation" => Some(handle_teachers_by_cooperation(state, req)),
        "report.teachersByCenterDay" => Some(handle_teachers_by_center_day(state, req)),
        _ => None,
    }
}
