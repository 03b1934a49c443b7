//! Remote attendance source.
//!
//! This module defines the `AttendanceGateway` contract the cache talks to,
//! plus two implementations:
//!
//! - `HttpGateway`: JSON over HTTP, with rate-limit backoff
//! - `MemoryGateway`: in-process rows, for demos and tests

pub mod client;
pub mod error;
pub mod gateway;
pub mod memory;

pub use client::HttpGateway;
pub use error::GatewayError;
pub use gateway::{AttendanceGateway, NewAttendance};
pub use memory::MemoryGateway;
