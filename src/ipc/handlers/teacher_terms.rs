use crate::audit;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn required_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Editable survey fields of one teacher-term row. Booleans stringify as
/// `true`/`false` for the audit diff so every history value is text.
#[derive(Debug, Clone)]
struct TermFields {
    is_neighbor_teaching: bool,
    neighbor_teaching: String,
    neighbor_centers: String,
    suggestion: String,
    projector: bool,
    whiteboard2: bool,
}

impl TermFields {
    fn as_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "is_neighbor_teaching",
                audit::bool_text(self.is_neighbor_teaching),
            ),
            ("neighbor_teaching", self.neighbor_teaching.clone()),
            ("neighbor_centers", self.neighbor_centers.clone()),
            ("suggestion", self.suggestion.clone()),
            ("projector", audit::bool_text(self.projector)),
            ("whiteboard2", audit::bool_text(self.whiteboard2)),
        ]
    }

    fn merged(&self, params: &serde_json::Value) -> TermFields {
        let pick_str = |key: &str, fallback: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| fallback.to_string())
        };
        let pick_bool = |key: &str, fallback: bool| {
            params.get(key).and_then(|v| v.as_bool()).unwrap_or(fallback)
        };
        TermFields {
            is_neighbor_teaching: pick_bool("isNeighborTeaching", self.is_neighbor_teaching),
            neighbor_teaching: pick_str("neighborTeaching", &self.neighbor_teaching),
            neighbor_centers: pick_str("neighborCenters", &self.neighbor_centers),
            suggestion: pick_str("suggestion", &self.suggestion),
            projector: pick_bool("projector", self.projector),
            whiteboard2: pick_bool("whiteboard2", self.whiteboard2),
        }
    }
}

fn handle_teacher_term_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(teacher_code) = required_str(&req.params, "teacherCode") else {
        return err(&req.id, "bad_params", "missing teacherCode", None);
    };
    let Some(term) = required_str(&req.params, "term") else {
        return err(&req.id, "bad_params", "missing term", None);
    };

    let row = conn
        .query_row(
            "SELECT id, is_neighbor_teaching, neighbor_teaching, neighbor_centers,
                    suggestion, projector, whiteboard2
             FROM teacher_terms WHERE teacher_code = ? AND term = ?",
            (&teacher_code, &term),
            |r| {
                Ok(json!({
                    "teacherTermId": r.get::<_, String>(0)?,
                    "teacherCode": teacher_code.clone(),
                    "term": term.clone(),
                    "isNeighborTeaching": r.get::<_, i64>(1)? != 0,
                    "neighborTeaching": r.get::<_, String>(2)?,
                    "neighborCenters": r.get::<_, String>(3)?,
                    "suggestion": r.get::<_, String>(4)?,
                    "projector": r.get::<_, i64>(5)? != 0,
                    "whiteboard2": r.get::<_, i64>(6)? != 0,
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(t)) => ok(&req.id, t),
        Ok(None) => err(&req.id, "not_found", "teacher term record not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teacher_term_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(teacher_term_id) = required_str(&req.params, "teacherTermId") else {
        return err(&req.id, "bad_params", "missing teacherTermId", None);
    };
    let actor = audit::resolve_actor(req.params.get("actor").and_then(|v| v.as_str()));

    let snapshot = conn
        .query_row(
            "SELECT is_neighbor_teaching, neighbor_teaching, neighbor_centers,
                    suggestion, projector, whiteboard2
             FROM teacher_terms WHERE id = ?",
            [&teacher_term_id],
            |r| {
                Ok(TermFields {
                    is_neighbor_teaching: r.get::<_, i64>(0)? != 0,
                    neighbor_teaching: r.get(1)?,
                    neighbor_centers: r.get(2)?,
                    suggestion: r.get(3)?,
                    projector: r.get::<_, i64>(4)? != 0,
                    whiteboard2: r.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional();
    let snapshot = match snapshot {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "teacher term record not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let updated = snapshot.merged(&req.params);
    let changes = audit::diff_fields(&snapshot.as_pairs(), &updated.as_pairs());
    if changes.is_empty() {
        return ok(
            &req.id,
            json!({ "teacherTermId": teacher_term_id, "changedFields": 0 }),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE teacher_terms SET
            is_neighbor_teaching = ?, neighbor_teaching = ?, neighbor_centers = ?,
            suggestion = ?, projector = ?, whiteboard2 = ?
         WHERE id = ?",
        rusqlite::params![
            updated.is_neighbor_teaching as i64,
            updated.neighbor_teaching,
            updated.neighbor_centers,
            updated.suggestion,
            updated.projector as i64,
            updated.whiteboard2 as i64,
            teacher_term_id,
        ],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = audit::record_changes(
        &tx,
        audit::TrackedTable::TeacherTerms,
        &teacher_term_id,
        "",
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
        json!({ "teacherTermId": teacher_term_id, "changedFields": changes.len() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teacherTerm.get" => Some(handle_teacher_term_get(state, req)),
        "teacherTerm.update" => Some(handle_teacher_term_update(state, req)),
        _ => None,
    }
}
