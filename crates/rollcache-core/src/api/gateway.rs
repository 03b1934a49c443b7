use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::GatewayError;
use crate::models::{AttendanceStatus, RawRow};

/// Payload for creating an attendance row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAttendance {
    #[serde(rename = "fullname")]
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub status: AttendanceStatus,
    pub time_in: DateTime<Utc>,
}

impl NewAttendance {
    /// A Present check-in stamped now.
    pub fn check_in(full_name: impl Into<String>, username: Option<String>) -> Self {
        Self {
            full_name: full_name.into(),
            username,
            section: None,
            status: AttendanceStatus::Present,
            time_in: Utc::now(),
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_status(mut self, status: AttendanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn at(mut self, time_in: DateTime<Utc>) -> Self {
        self.time_in = time_in;
        self
    }
}

/// The remote source of truth for attendance rows.
///
/// Implementations are transport-agnostic. Every call may fail; the cache
/// treats any error as "nothing happened" and leaves its state untouched.
#[async_trait]
pub trait AttendanceGateway: Send + Sync {
    /// Every row the source holds, in whatever order it returns them.
    async fn fetch_all(&self) -> Result<Vec<RawRow>, GatewayError>;

    /// Create a row and return it as stored (with its assigned id).
    async fn create(&self, entry: &NewAttendance) -> Result<RawRow, GatewayError>;

    async fn delete(&self, id: i64) -> Result<(), GatewayError>;

    async fn update_status(&self, id: i64, status: AttendanceStatus) -> Result<(), GatewayError>;

    /// Stamp the same time-out on several rows at once.
    async fn set_time_out(&self, ids: &[i64], time_out: DateTime<Utc>) -> Result<(), GatewayError>;
}
