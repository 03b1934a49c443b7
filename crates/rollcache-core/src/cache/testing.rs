//! Shared fixtures for cache tests.
//!
//! "Today" is 2026-03-18 at 12:00 in UTC+8 unless a test moves the clock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tokio::sync::Notify;

use crate::api::{AttendanceGateway, GatewayError, MemoryGateway, NewAttendance};
use crate::clock::{Clock, FixedClock};
use crate::models::{AttendanceRecord, AttendanceStatus, RawRow, StudentKey};
use crate::utils::dates::LocalCalendar;

pub(crate) fn offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

pub(crate) fn now() -> DateTime<FixedOffset> {
    offset().with_ymd_and_hms(2026, 3, 18, 12, 0, 0).unwrap()
}

pub(crate) fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(now()))
}

pub(crate) fn calendar() -> LocalCalendar {
    FixedClock::new(now()).calendar()
}

/// Today at `hour:minute` local time.
pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    offset()
        .with_ymd_and_hms(2026, 3, 18, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub(crate) fn record(id: i64, username: &str, status: AttendanceStatus, time_in: DateTime<Utc>) -> AttendanceRecord {
    AttendanceRecord {
        id,
        student_key: StudentKey::derive(Some(username), None),
        username: Some(username.to_string()),
        full_name: None,
        section: None,
        status: Some(status),
        status_raw: status.as_str().to_string(),
        time_in: Some(time_in),
        time_in_raw: time_in.to_rfc3339(),
        time_out: None,
    }
}

pub(crate) fn raw(id: i64, username: &str, status: AttendanceStatus, time_in: DateTime<Utc>) -> RawRow {
    RawRow::new()
        .with("id", id)
        .with("student_username", username)
        .with("status", status.as_str())
        .with("time_in", time_in.to_rfc3339())
}

#[derive(Default, PartialEq)]
enum ParkOn {
    #[default]
    Fetch,
    Delete,
}

/// Memory gateway that parks one kind of call until released, so tests can
/// interleave work with it. By default `fetch_all` parks after reading its
/// rows; `parking_deletes` instead parks `delete` after the row is removed.
#[derive(Default)]
pub(crate) struct GatedGateway {
    pub(crate) inner: MemoryGateway,
    park_on: ParkOn,
    entered: Notify,
    release: Notify,
}

impl GatedGateway {
    pub(crate) fn with_rows(rows: Vec<RawRow>) -> Self {
        Self {
            inner: MemoryGateway::with_rows(rows),
            ..Self::default()
        }
    }

    pub(crate) fn parking_deletes(rows: Vec<RawRow>) -> Self {
        Self {
            park_on: ParkOn::Delete,
            ..Self::with_rows(rows)
        }
    }

    async fn park(&self, on: ParkOn) {
        if self.park_on == on {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    /// Wait until a gated call has done its work and parked.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl AttendanceGateway for GatedGateway {
    async fn fetch_all(&self) -> Result<Vec<RawRow>, GatewayError> {
        let rows = self.inner.fetch_all().await;
        self.park(ParkOn::Fetch).await;
        rows
    }

    async fn create(&self, entry: &NewAttendance) -> Result<RawRow, GatewayError> {
        self.inner.create(entry).await
    }

    async fn delete(&self, id: i64) -> Result<(), GatewayError> {
        let deleted = self.inner.delete(id).await;
        self.park(ParkOn::Delete).await;
        deleted
    }

    async fn update_status(&self, id: i64, status: AttendanceStatus) -> Result<(), GatewayError> {
        self.inner.update_status(id, status).await
    }

    async fn set_time_out(&self, ids: &[i64], time_out: DateTime<Utc>) -> Result<(), GatewayError> {
        self.inner.set_time_out(ids, time_out).await
    }
}
