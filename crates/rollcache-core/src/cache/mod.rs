//! In-memory attendance cache.
//!
//! Data flows one way in (gateway → `AttendanceStore` → `AttendanceIndex`)
//! and one way out (index → `NotificationBus` → observers). Local mutations
//! patch the index directly; the next refresh reconciles with the gateway.
//!
//! - `index`: the raw list and every aggregate derived from it
//! - `fingerprint`: content hash used to skip no-op refreshes
//! - `bus`: synchronous, panic-isolated observer fan-out
//! - `store`: refresh controller and mutation applier
//! - `poller`: interval-driven refresh, paused while hidden
//! - `visibility`: shared visible/hidden flag

pub mod bus;
pub mod fingerprint;
pub mod index;
pub mod poller;
pub mod store;
pub mod visibility;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{NotificationBus, Subscription};
pub use fingerprint::Fingerprint;
pub use index::{
    AttendanceIndex, MostPresentEntry, SectionSummary, StudentState, TodayCounts, UNKNOWN_SECTION,
};
pub use poller::{PollInterval, Poller, PollerHandle, MIN_POLL_INTERVAL};
pub use store::{AttendanceStore, MutationError, RefreshOutcome, SkipReason};
pub use visibility::Visibility;
