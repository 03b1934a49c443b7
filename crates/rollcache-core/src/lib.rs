//! rollcache core library.
//!
//! An in-memory attendance aggregation cache that sits between a polled
//! remote source and any number of independent views.
//!
//! - `api`: the gateway contract and its HTTP / in-memory implementations
//! - `models`: canonical records and raw-row normalization
//! - `cache`: indices, refresh controller, mutations, notifications, polling
//! - `views`: slice-level change suppression for renderers
//! - `clock` and `utils`: "now", calendars and timestamp parsing

pub mod api;
pub mod cache;
pub mod clock;
pub mod models;
pub mod utils;
pub mod views;

pub use api::{AttendanceGateway, GatewayError, HttpGateway, MemoryGateway, NewAttendance};
pub use cache::{
    AttendanceIndex, AttendanceStore, MutationError, PollInterval, Poller, PollerHandle,
    RefreshOutcome, SkipReason, TodayCounts,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use models::{AttendanceRecord, AttendanceStatus, RawRow, StudentKey};
