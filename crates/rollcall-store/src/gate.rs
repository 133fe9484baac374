//! Once-per-day attendance gate.

use crate::{AttendanceStore, StoreError};
use chrono::{Local, NaiveDate};
use serde::Serialize;

/// Source of the attendance day key.
pub trait Clock: Send {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceOutcome {
    Recorded,
    AlreadyRecorded,
}

impl AttendanceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceOutcome::Recorded => "recorded",
            AttendanceOutcome::AlreadyRecorded => "already_recorded",
        }
    }
}

/// Records a confirmed student at most once per calendar day.
pub struct AttendanceGate<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S: AttendanceStore> AttendanceGate<S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: AttendanceStore, C: Clock> AttendanceGate<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Record `name` for today unless already present. The date is read
    /// from the clock at call time.
    pub fn admit(&mut self, name: &str) -> Result<(NaiveDate, AttendanceOutcome), StoreError> {
        let date = self.clock.today();
        let outcome = if self.store.record_if_absent(name, date)? {
            AttendanceOutcome::Recorded
        } else {
            AttendanceOutcome::AlreadyRecorded
        };
        tracing::debug!(name, %date, outcome = outcome.as_str(), "attendance gate");
        Ok((date, outcome))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
