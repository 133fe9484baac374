//! Bulk roster import.

use crate::{AttendanceStore, StoreError};
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: Vec<String>,
    /// Names that were already on the roster.
    pub skipped: Vec<String>,
}

/// Register one student per non-blank line of `text`, trimmed. Names
/// already on the roster are left alone.
pub fn import_roster<S>(store: &mut S, text: &str) -> Result<ImportSummary, StoreError>
where
    S: AttendanceStore + ?Sized,
{
    let mut summary = ImportSummary::default();
    for name in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if store.register(name)? {
            summary.added.push(name.to_string());
        } else {
            tracing::info!(name, "already registered; skipped");
            summary.skipped.push(name.to_string());
        }
    }
    tracing::info!(
        added = summary.added.len(),
        skipped = summary.skipped.len(),
        "roster import finished"
    );
    Ok(summary)
}
