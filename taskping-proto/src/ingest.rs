//! Normalisation of raw task-sheet rows into task records.
//!
//! A sheet row carries four cells: name, description, deadline and the
//! participant list. Normalisation is deterministic and never touches
//! storage; a single bad deadline fails the whole batch so that nothing is
//! committed from a partially valid sheet.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::ValidationError;
use crate::model::{MIN_HANDLE_LEN, UNTITLED_TASK_NAME};

/// Canonical deadline format, also used when displaying deadlines.
pub const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accepted fallback deadline format without seconds.
pub const DEADLINE_FORMAT_SHORT: &str = "%Y-%m-%d %H:%M";

/// One unprocessed sheet row, cells as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// Column A.
    pub name: String,
    /// Column B.
    pub description: String,
    /// Column C.
    pub deadline: String,
    /// Column D: handles separated by spaces, commas or `@`.
    pub participants: String,
}

/// A normalised task record awaiting commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task name, never blank.
    pub name: String,
    /// Task description.
    pub description: String,
    /// Parsed deadline.
    pub deadline: NaiveDateTime,
    /// Participant handles in sheet order, without `@`.
    pub participants: Vec<String>,
}

/// Parses a deadline in either accepted format.
///
/// The full `YYYY-MM-DD HH:MM:SS` form is tried first, then
/// `YYYY-MM-DD HH:MM`.
#[must_use]
pub fn parse_deadline(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, DEADLINE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, DEADLINE_FORMAT_SHORT))
        .ok()
}

/// Formats a deadline in the canonical format.
#[must_use]
pub fn format_deadline(deadline: NaiveDateTime) -> String {
    deadline.format(DEADLINE_FORMAT).to_string()
}

/// Splits a participant cell on runs of spaces, commas and `@`.
#[must_use]
pub fn split_participants(cell: &str) -> Vec<String> {
    cell.split(|c: char| c == ',' || c == '@' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether a handle is long enough to identify a real chat account.
#[must_use]
pub fn is_addressable_handle(handle: &str) -> bool {
    handle.chars().count() >= MIN_HANDLE_LEN
}

/// Normalises one row. `row` is the 1-based data row number used in errors.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedDeadline`] when the deadline cell
/// matches neither accepted format.
pub fn parse_row(raw: &RawRow, row: usize) -> Result<TaskRecord, ValidationError> {
    let name = raw.name.trim();
    let name = if name.is_empty() {
        UNTITLED_TASK_NAME.to_string()
    } else {
        name.to_string()
    };
    let deadline =
        parse_deadline(&raw.deadline).ok_or_else(|| ValidationError::MalformedDeadline {
            row,
            value: raw.deadline.clone(),
        })?;

    Ok(TaskRecord {
        name,
        description: raw.description.clone(),
        deadline,
        participants: split_participants(&raw.participants),
    })
}

/// Normalises a whole sheet, failing on the first bad row.
///
/// # Errors
///
/// Propagates the first [`ValidationError`] from [`parse_row`].
pub fn parse_rows(rows: &[RawRow]) -> Result<Vec<TaskRecord>, ValidationError> {
    rows.iter()
        .enumerate()
        .map(|(i, raw)| parse_row(raw, i + 1))
        .collect()
}

/// Renders a record back into a canonical row.
#[must_use]
pub fn format_row(record: &TaskRecord) -> RawRow {
    RawRow {
        name: record.name.clone(),
        description: record.description.clone(),
        deadline: format_deadline(record.deadline),
        participants: record.participants.join(", "),
    }
}
