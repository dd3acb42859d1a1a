//! Field-level change auditing for schedule data.
//!
//! Only updates to the tables named in [`TrackedTable`] are audited; the set
//! is a closed enum so nothing becomes auditable by accident. Callers diff
//! the pre-update snapshot against the incoming state and write one
//! `change_history` row per differing field, inside the same transaction as
//! the update itself. History rows are append-only: no code path updates or
//! deletes them.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

/// Recorded as `changed_by` when a request carries no usable actor identity.
pub const ANONYMOUS_ACTOR: &str = "Anonymous";

/// Bootstrap identity whose changes reports exclude by convention. The rows
/// are still stored.
pub const ADMIN_ACTOR: &str = "admin";

/// The tables whose updates produce history rows. Inserts and deletes are
/// never audited, and no other table ever is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedTable {
    WeeklySchedules,
    TeacherTerms,
}

impl TrackedTable {
    pub fn table_name(self) -> &'static str {
        match self {
            TrackedTable::WeeklySchedules => "weekly_schedules",
            TrackedTable::TeacherTerms => "teacher_terms",
        }
    }
}

/// One differing scalar field between snapshot and incoming state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub column: &'static str,
    pub old: String,
    pub new: String,
}

/// Diffs two field lists of the same shape (same columns, same order).
/// Returns one entry per field whose value changed; equal lists diff empty.
pub fn diff_fields(
    snapshot: &[(&'static str, String)],
    current: &[(&'static str, String)],
) -> Vec<FieldChange> {
    debug_assert_eq!(snapshot.len(), current.len());
    snapshot
        .iter()
        .zip(current.iter())
        .filter_map(|(&(col, ref old), &(col2, ref new))| {
            debug_assert_eq!(col, col2);
            if old != new {
                Some(FieldChange {
                    column: col,
                    old: old.clone(),
                    new: new.clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Resolves the acting identity for one unit of work. A save never fails for
/// lack of an actor; it is attributed to [`ANONYMOUS_ACTOR`] instead.
pub fn resolve_actor(actor: Option<&str>) -> String {
    match actor.map(str::trim) {
        Some(a) if !a.is_empty() => a.to_string(),
        _ => ANONYMOUS_ACTOR.to_string(),
    }
}

/// `true`/`false` text for boolean survey fields, so old/new values compare
/// and render uniformly as strings.
pub fn bool_text(v: bool) -> String {
    if v { "true" } else { "false" }.to_string()
}

/// Inserts one history row per change. Must be called on a connection with
/// an open transaction containing the update being described; `record_id` is
/// the snapshot's primary key, and every row shares one timestamp and actor.
pub fn record_changes(
    conn: &Connection,
    table: TrackedTable,
    record_id: &str,
    day_of_week: &str,
    changes: &[FieldChange],
    actor: &str,
) -> rusqlite::Result<usize> {
    let changed_at = Utc::now().to_rfc3339();
    for change in changes {
        conn.execute(
            "INSERT INTO change_history(
                id, table_name, record_id, day_of_week, column_name,
                old_value, new_value, changed_by, changed_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                table.table_name(),
                record_id,
                day_of_week,
                change.column,
                &change.old,
                &change.new,
                actor,
                &changed_at,
            ),
        )?;
    }
    Ok(changes.len())
}
