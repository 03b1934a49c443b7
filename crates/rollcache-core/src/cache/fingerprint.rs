//! Content fingerprint over the raw record list.
//!
//! Two lists share a fingerprint exactly when they hold the same
//! `(id, status, time_in)` triples in the same order. An unrecognized status
//! or timestamp is identified by its raw text. Fields are
//! length-prefixed before hashing so adjacent values cannot run together.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::models::{AttendanceRecord, AttendanceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Self {
        let mut hasher = Sha256::new();
        for record in records {
            hasher.update(record.id.to_le_bytes());
            match record.status {
                Some(status) => hasher.update([status_tag(status)]),
                None => {
                    hasher.update([0u8]);
                    hasher.update((record.status_raw.len() as u64).to_le_bytes());
                    hasher.update(record.status_raw.as_bytes());
                }
            }
            match record.time_in {
                Some(time_in) => {
                    hasher.update([1u8]);
                    hasher.update(time_in.timestamp_micros().to_le_bytes());
                }
                None => {
                    // Unparsable: the raw text is the only identity we have
                    hasher.update([0u8]);
                    hasher.update((record.time_in_raw.len() as u64).to_le_bytes());
                    hasher.update(record.time_in_raw.as_bytes());
                }
            }
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs
        f.write_str(&self.to_hex()[..12])
    }
}

fn status_tag(status: AttendanceStatus) -> u8 {
    match status {
        AttendanceStatus::Present => 1,
        AttendanceStatus::Late => 2,
        AttendanceStatus::Absent => 3,
        AttendanceStatus::Excused => 4,
    }
}
