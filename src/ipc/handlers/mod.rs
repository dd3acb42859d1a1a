pub mod backup_exchange;
pub mod centers;
pub mod core;
pub mod locks;
pub mod reports;
pub mod rollover;
pub mod schedule;
pub mod teacher_terms;
pub mod teachers;
pub mod terms;
