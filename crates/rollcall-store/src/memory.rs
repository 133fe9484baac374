//! In-process attendance store.

use crate::{check_name, AttendanceRecord, AttendanceStore, StoreError};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};

/// Attendance kept in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    roster: HashSet<String>,
    records: BTreeSet<(NaiveDate, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records across all days.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AttendanceStore for MemoryStore {
    fn record_if_absent(&mut self, name: &str, date: NaiveDate) -> Result<bool, StoreError> {
        check_name(name)?;
        Ok(self.records.insert((date, name.to_string())))
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.roster.contains(name))
    }

    fn register(&mut self, name: &str) -> Result<bool, StoreError> {
        check_name(name)?;
        Ok(self.roster.insert(name.to_string()))
    }

    fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|(d, _)| *d == date)
            .map(|(d, name)| AttendanceRecord {
                student_name: name.clone(),
                date: *d,
            })
            .collect())
    }

    fn remove(&mut self, name: &str) -> Result<bool, StoreError> {
        let on_roster = self.roster.remove(name);
        let before = self.records.len();
        self.records.retain(|(_, n)| n != name);
        Ok(on_roster || self.records.len() != before)
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<bool, StoreError> {
        check_name(new)?;
        if old == new {
            return Ok(self.roster.contains(old));
        }
        if self.roster.contains(new) {
            return Err(StoreError::NameTaken(new.to_string()));
        }
        if !self.roster.remove(old) {
            return Ok(false);
        }
        self.roster.insert(new.to_string());
        self.records = std::mem::take(&mut self.records)
            .into_iter()
            .map(|(date, n)| if n == old { (date, new.to_string()) } else { (date, n) })
            .collect();
        Ok(true)
    }

    fn clear_attendance(&mut self) -> Result<usize, StoreError> {
        let removed = self.records.len();
        self.records.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_once_per_day() {
        let mut store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        assert!(store.record_if_absent("Alice", today).unwrap());
        assert!(!store.record_if_absent("Alice", today).unwrap());
        assert!(store.record_if_absent("Bob", today).unwrap());
        assert_eq!(store.len(), 2);

        let names: Vec<_> = store
            .attendance_on(today)
            .unwrap()
            .into_iter()
            .map(|r| r.student_name)
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);

        assert_eq!(store.clear_attendance().unwrap(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_roster_edits() {
        let mut store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        store.register("Alicia").unwrap();
        store.register("Bob").unwrap();
        store.record_if_absent("Alicia", today).unwrap();

        assert!(store.rename("Alicia", "Alice").unwrap());
        assert!(matches!(store.rename("Bob", "Alice"), Err(StoreError::NameTaken(_))));
        assert_eq!(store.attendance_on(today).unwrap()[0].student_name, "Alice");

        assert!(store.remove("Alice").unwrap());
        assert!(!store.exists("Alice").unwrap());
        assert!(store.is_empty());
        assert!(!store.remove("Alice").unwrap());
    }
}
