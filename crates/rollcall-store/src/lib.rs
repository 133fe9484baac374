//! rollcall-store: Attendance persistence and the once-per-day gate.
//!
//! The [`AttendanceStore`] trait is what the capture loop writes through;
//! [`SqliteStore`] is the on-disk implementation and [`MemoryStore`] the
//! in-process one.

pub mod gate;
pub mod memory;
pub mod roster;
pub mod sqlite;

pub use gate::{AttendanceGate, AttendanceOutcome, Clock, FixedClock, SystemClock};
pub use memory::MemoryStore;
pub use roster::{import_roster, ImportSummary};
pub use sqlite::SqliteStore;

use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Calendar-date format used for the attendance day key.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Database file name inside the data directory.
pub const DB_FILE_NAME: &str = "students.db";

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid date '{value}' in attendance table")]
    InvalidDate { value: String },
    #[error("student name must not be empty")]
    EmptyName,
    #[error("a student named '{0}' is already on the roster")]
    NameTaken(String),
}

/// One attendance mark: a student seen on a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub student_name: String,
    pub date: NaiveDate,
}

/// Persistent roster and attendance records.
///
/// At most one record exists per (student, date).
pub trait AttendanceStore: Send {
    /// Insert a record unless one already exists for (name, date).
    /// Returns `true` if this call created it.
    fn record_if_absent(&mut self, name: &str, date: NaiveDate) -> Result<bool, StoreError>;

    /// Whether `name` is on the roster.
    fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Add `name` to the roster. Returns `false` if already present.
    fn register(&mut self, name: &str) -> Result<bool, StoreError>;

    /// Remove `name` from the roster together with its attendance history.
    /// Returns `false` if there was nothing to remove.
    fn remove(&mut self, name: &str) -> Result<bool, StoreError>;

    /// Rename a rostered student, carrying its attendance history over.
    /// Returns `false` if `old` is not on the roster; fails with
    /// [`StoreError::NameTaken`] if `new` already is.
    fn rename(&mut self, old: &str, new: &str) -> Result<bool, StoreError>;

    /// All records for one day, ordered by student name.
    fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Delete every attendance record, keeping the roster. Returns the number removed.
    fn clear_attendance(&mut self) -> Result<usize, StoreError>;
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::EmptyName);
    }
    Ok(())
}
