//! Data models for attendance entities.
//!
//! This module contains the canonical record type used by every part of
//! the aggregation engine, and the raw row shape accepted from the gateway:
//!
//! - `AttendanceRecord`: one check-in, with parsed timestamps
//! - `AttendanceStatus`: Present / Late / Absent / Excused
//! - `StudentKey`: normalized per-student join key
//! - `RawRow`: loosely-typed gateway row, converted by `normalize`

pub mod raw;
pub mod record;

pub use raw::{normalize, NormalizeError, RawRow};
pub use record::{AttendanceRecord, AttendanceStatus, StudentKey};
