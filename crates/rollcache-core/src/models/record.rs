use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::dates::LocalCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::Late,
        AttendanceStatus::Absent,
        AttendanceStatus::Excused,
    ];

    /// Parse a status label case-insensitively.
    /// Returns None for anything outside the four known statuses.
    pub fn parse(label: &str) -> Option<Self> {
        let lower = label.trim().to_lowercase();
        match lower.as_str() {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Late => "Late",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Excused => "Excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized per-student identifier used to join records.
///
/// Derived from the username (lower-cased, leading `@` removed) when one is
/// present, otherwise from the lower-cased full name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentKey(String);

impl StudentKey {
    pub fn derive(username: Option<&str>, full_name: Option<&str>) -> Option<Self> {
        let from_username = username
            .map(|u| u.trim().trim_start_matches('@').trim().to_lowercase())
            .filter(|k| !k.is_empty());

        from_username
            .or_else(|| {
                full_name
                    .map(|n| n.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
            })
            .map(StudentKey)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single attendance check-in in canonical form.
///
/// `time_in` is `None` when the source timestamp could not be parsed. Such a
/// record stays addressable by id but never takes part in a date-bound
/// aggregate. Likewise `status` is `None` when the gateway sent no status or
/// one outside the known four; the record still counts toward totals but
/// never toward a status bucket or a present day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_key: Option<StudentKey>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub section: Option<String>,
    pub status: Option<AttendanceStatus>,
    /// Status text exactly as the gateway sent it, empty when missing
    pub status_raw: String,
    pub time_in: Option<DateTime<Utc>>,
    /// Timestamp text exactly as the gateway sent it
    pub time_in_raw: String,
    pub time_out: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    /// Label shown for this record: full name, then username, then the key.
    pub fn display_name(&self) -> String {
        self.full_name
            .clone()
            .or_else(|| self.username.clone())
            .or_else(|| self.student_key.as_ref().map(|k| k.to_string()))
            .unwrap_or_default()
    }

    /// The canonical status name, or the gateway's own text when unrecognized.
    pub fn status_label(&self) -> &str {
        match self.status {
            Some(status) => status.as_str(),
            None => &self.status_raw,
        }
    }

    /// Local calendar date of `time_in`, if it parsed.
    pub fn local_date(&self, calendar: &LocalCalendar) -> Option<NaiveDate> {
        self.time_in.as_ref().map(|t| calendar.local_date(t))
    }

    pub fn is_today(&self, calendar: &LocalCalendar) -> bool {
        self.time_in.as_ref().is_some_and(|t| calendar.is_today(t))
    }

    /// True when this record counts as a present day in the current month.
    pub fn is_present_this_month(&self, calendar: &LocalCalendar) -> bool {
        self.status == Some(AttendanceStatus::Present)
            && self
                .time_in
                .as_ref()
                .is_some_and(|t| calendar.in_current_month(t))
    }
}
