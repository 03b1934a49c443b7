//! In-process attendance source.
//!
//! Holds rows in memory and answers every gateway call immediately. Used by
//! the CLI demo mode and throughout the test suite, where it can be switched
//! into a failing state and inspected for the calls it received.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{AttendanceGateway, GatewayError, NewAttendance};
use crate::models::{AttendanceStatus, RawRow};

#[derive(Debug, Default)]
pub struct MemoryGateway {
    rows: Mutex<Vec<RawRow>>,
    next_id: AtomicI64,
    failing: AtomicBool,
    fetch_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::with_rows(Vec::new())
    }

    pub fn with_rows(rows: Vec<RawRow>) -> Self {
        let next_id = rows.iter().filter_map(RawRow::id).max().unwrap_or(0) + 1;
        Self {
            rows: Mutex::new(rows),
            next_id: AtomicI64::new(next_id),
            ..Self::default()
        }
    }

    /// Replace the stored rows wholesale.
    pub fn replace_rows(&self, rows: Vec<RawRow>) {
        let max_id = rows.iter().filter_map(RawRow::id).max().unwrap_or(0);
        self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
        *self.lock_rows() = rows;
    }

    pub fn rows(&self) -> Vec<RawRow> {
        self.lock_rows().clone()
    }

    /// While failing, every call returns `GatewayError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Number of successful create/delete/update calls.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn lock_rows(&self) -> MutexGuard<'_, Vec<RawRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GatewayError::Unavailable("memory gateway set to fail".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_row<T>(&self, id: i64, f: impl FnOnce(&mut RawRow) -> T) -> Result<T, GatewayError> {
        let mut rows = self.lock_rows();
        let row = rows
            .iter_mut()
            .find(|r| r.id() == Some(id))
            .ok_or_else(|| GatewayError::NotFound(format!("attendance row {}", id)))?;
        Ok(f(row))
    }
}

#[async_trait]
impl AttendanceGateway for MemoryGateway {
    async fn fetch_all(&self) -> Result<Vec<RawRow>, GatewayError> {
        self.check_available()?;
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows())
    }

    async fn create(&self, entry: &NewAttendance) -> Result<RawRow, GatewayError> {
        self.check_available()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut row = RawRow::new()
            .with("id", id)
            .with("student_fullname", entry.full_name.clone())
            .with("status", entry.status.as_str())
            .with("time_in", entry.time_in.to_rfc3339());
        if let Some(ref username) = entry.username {
            row.set("student_username", username.clone());
        }
        if let Some(ref section) = entry.section {
            row.set("student_section", section.clone());
        }

        self.lock_rows().insert(0, row.clone());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(row)
    }

    async fn delete(&self, id: i64) -> Result<(), GatewayError> {
        self.check_available()?;
        let mut rows = self.lock_rows();
        let before = rows.len();
        rows.retain(|r| r.id() != Some(id));
        if rows.len() == before {
            return Err(GatewayError::NotFound(format!("attendance row {}", id)));
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_status(&self, id: i64, status: AttendanceStatus) -> Result<(), GatewayError> {
        self.check_available()?;
        self.with_row(id, |row| row.set("status", status.as_str()))?;
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_time_out(&self, ids: &[i64], time_out: DateTime<Utc>) -> Result<(), GatewayError> {
        self.check_available()?;
        let stamp = Value::String(time_out.to_rfc3339());
        let mut rows = self.lock_rows();
        for row in rows.iter_mut().filter(|r| r.id().is_some_and(|id| ids.contains(&id))) {
            row.set("time_out", stamp.clone());
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
