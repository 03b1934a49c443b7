//! Raw gateway rows and their normalization into `AttendanceRecord`.
//!
//! Gateways have used several field names for the same value over time
//! (`timestamp` vs `time_in`, `student_fullname` vs `fullname`, ...). Every
//! alias is resolved here; nothing past `normalize` looks at raw field names.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::record::{AttendanceRecord, AttendanceStatus, StudentKey};
use crate::utils::dates::parse_flexible;

// Aliases are listed in priority order: the first one present wins.
const ID_FIELDS: &[&str] = &["id", "_id", "row_id"];
const USERNAME_FIELDS: &[&str] = &["student_username", "username", "user", "student_id"];
const FULL_NAME_FIELDS: &[&str] = &["student_fullname", "fullname", "full_name", "name"];
const SECTION_FIELDS: &[&str] = &["student_section", "section", "section_name"];
const STATUS_FIELDS: &[&str] = &["status"];
const TIME_IN_FIELDS: &[&str] = &["timestamp", "time_in", "time", "datetime", "created_at"];
const TIME_OUT_FIELDS: &[&str] = &["time_out", "timestamp_out", "timeOut"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Row has no id")]
    MissingId,

    #[error("Row id is not an integer: {0}")]
    InvalidId(String),
}

/// One row as delivered by the gateway, field names unresolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(Map<String, Value>);

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly for gateways and tests.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Resolved row id, if any alias holds an integer.
    pub fn id(&self) -> Option<i64> {
        self.first_value(ID_FIELDS).and_then(value_as_id)
    }

    fn first_value(&self, aliases: &[&str]) -> Option<&Value> {
        aliases
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find(|v| !v.is_null() && value_as_text(v).is_some())
    }

    /// First non-blank alias rendered as text.
    fn first_text(&self, aliases: &[&str]) -> Option<String> {
        aliases
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find_map(value_as_text)
    }
}

impl From<Map<String, Value>> for RawRow {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert a raw row into the canonical record.
///
/// Offset-less timestamps are read in `offset`. An unparsable `time_in` is
/// not an error: the record keeps its raw text and `time_in: None`. The same
/// goes for a missing or unrecognized status, which leaves `status: None`.
pub fn normalize(row: &RawRow, offset: &FixedOffset) -> Result<AttendanceRecord, NormalizeError> {
    let id = match row.first_value(ID_FIELDS) {
        None => return Err(NormalizeError::MissingId),
        Some(value) => value_as_id(value)
            .ok_or_else(|| NormalizeError::InvalidId(value.to_string()))?,
    };

    let status_raw = row.first_text(STATUS_FIELDS).unwrap_or_default();
    let status = AttendanceStatus::parse(&status_raw);

    let username = row.first_text(USERNAME_FIELDS);
    let full_name = row.first_text(FULL_NAME_FIELDS);
    let student_key = StudentKey::derive(username.as_deref(), full_name.as_deref());

    let time_in_raw = row.first_text(TIME_IN_FIELDS).unwrap_or_default();
    let time_in = parse_flexible(&time_in_raw, offset);
    let time_out = row
        .first_text(TIME_OUT_FIELDS)
        .and_then(|raw| parse_flexible(&raw, offset));

    Ok(AttendanceRecord {
        id,
        student_key,
        username,
        full_name,
        section: row.first_text(SECTION_FIELDS),
        status,
        status_raw,
        time_in,
        time_in_raw,
        time_out,
    })
}
