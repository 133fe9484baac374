//! SQLite-backed attendance store.

use crate::{check_name, AttendanceRecord, AttendanceStore, StoreError, DATE_FORMAT};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    name          TEXT PRIMARY KEY NOT NULL,
    registered_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    student_name TEXT NOT NULL,
    date         TEXT NOT NULL,
    UNIQUE (student_name, date)
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Every record, ordered by date then student.
    pub fn all_attendance(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT student_name, date FROM attendance ORDER BY date ASC, student_name ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let records = rows
            .map(|row| -> Result<AttendanceRecord, StoreError> {
                let (student_name, date) = row?;
                Ok(AttendanceRecord {
                    student_name,
                    date: parse_date(&date)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Roster names in ascending order.
    pub fn students(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT name FROM students ORDER BY name ASC")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| StoreError::InvalidDate {
        value: value.to_string(),
    })
}

impl AttendanceStore for SqliteStore {
    fn record_if_absent(&mut self, name: &str, date: NaiveDate) -> Result<bool, StoreError> {
        check_name(name)?;
        // The UNIQUE key makes check-and-insert one statement.
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO attendance (student_name, date) VALUES (?1, ?2)",
            params![name, date.format(DATE_FORMAT).to_string()],
        )?;
        Ok(inserted == 1)
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM students WHERE name = ?1", params![name], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn register(&mut self, name: &str) -> Result<bool, StoreError> {
        check_name(name)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO students (name, registered_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT student_name FROM attendance WHERE date = ?1 ORDER BY student_name ASC",
        )?;
        let names = stmt
            .query_map(params![date.format(DATE_FORMAT).to_string()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names
            .into_iter()
            .map(|student_name| AttendanceRecord { student_name, date })
            .collect())
    }

    fn remove(&mut self, name: &str) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let students = tx.execute("DELETE FROM students WHERE name = ?1", params![name])?;
        let records = tx.execute("DELETE FROM attendance WHERE student_name = ?1", params![name])?;
        tx.commit()?;
        if students + records > 0 {
            tracing::info!(name, records, "student removed");
        }
        Ok(students + records > 0)
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<bool, StoreError> {
        check_name(new)?;
        if old == new {
            return self.exists(old);
        }
        if self.exists(new)? {
            return Err(StoreError::NameTaken(new.to_string()));
        }

        let tx = self.conn.transaction()?;
        let renamed = tx.execute("UPDATE students SET name = ?2 WHERE name = ?1", params![old, new])?;
        if renamed == 0 {
            return Ok(false);
        }
        // Days already held under `new` keep their row; the duplicate under `old` goes.
        tx.execute(
            "UPDATE OR IGNORE attendance SET student_name = ?2 WHERE student_name = ?1",
            params![old, new],
        )?;
        tx.execute("DELETE FROM attendance WHERE student_name = ?1", params![old])?;
        tx.commit()?;

        tracing::info!(old, new, "student renamed");
        Ok(true)
    }

    fn clear_attendance(&mut self) -> Result<usize, StoreError> {
        let removed = self.conn.execute("DELETE FROM attendance", [])?;
        tracing::info!(removed, "attendance records cleared");
        Ok(removed)
    }
}
