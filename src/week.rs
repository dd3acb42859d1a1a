//! The canonical scheduling week and slot conventions.
//!
//! Weekly schedules, locks, and rollover all iterate the Persian week,
//! Saturday first. Slot cells that carry no teaching either stay blank or
//! hold the absent sentinel; both mean "not present" to reports.

/// The seven weekdays, in calendar order. Every teacher gets exactly one
/// weekly-schedule row per entry per term.
pub const WEEK_DAYS: [&str; 7] = [
    "شنبه",
    "یکشنبه",
    "دوشنبه",
    "سه‌شنبه",
    "چهارشنبه",
    "پنجشنبه",
    "جمعه",
];

/// Default cell text for freshly generated schedule rows.
pub const ABSENT_TEXT: &str = "عدم حضور در مرکز";

pub fn is_week_day(day: &str) -> bool {
    WEEK_DAYS.contains(&day)
}

/// True when a slot cell records actual presence (neither blank nor the
/// absent sentinel).
pub fn slot_has_presence(slot: &str) -> bool {
    let t = slot.trim();
    !t.is_empty() && t != ABSENT_TEXT
}
