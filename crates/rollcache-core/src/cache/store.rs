//! The attendance store: one explicitly constructed context object shared by
//! every consumer.
//!
//! Two paths change state:
//!
//! - `refresh` pulls every row, and rebuilds and notifies only when the
//!   content fingerprint (or the calendar day) moved
//! - `add` / `delete` / `update_status` / `set_time_out` call the gateway
//!   first and patch the index only after it succeeds. A refresh that
//!   landed while the call was out may already hold its effect; the local
//!   patch is then skipped and the call still succeeds.
//!
//! Observers receive the new index synchronously after each applied change.
//! They only ever see complete indices, never a half-applied update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::bus::{NotificationBus, Subscription};
use super::fingerprint::Fingerprint;
use super::index::{AttendanceIndex, TodayCounts};
use super::visibility::Visibility;
use crate::api::{AttendanceGateway, GatewayError, NewAttendance};
use crate::clock::Clock;
use crate::models::{normalize, AttendanceRecord, AttendanceStatus, NormalizeError, RawRow};
use crate::utils::dates::LocalCalendar;

/// Why a refresh left the cache untouched without comparing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another refresh was already running
    InFlight,
    /// The consuming surface is not visible
    Hidden,
    /// The gateway call failed
    FetchFailed,
    /// A mutation was applied while the fetch was outstanding
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Indices were rebuilt and observers notified
    Changed,
    /// Same content as last time; nothing rebuilt
    Unchanged,
    Skipped(SkipReason),
}

impl RefreshOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, RefreshOutcome::Changed)
    }
}

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("No attendance record with id {0}")]
    UnknownId(i64),

    #[error("Gateway returned an unusable row: {0}")]
    InvalidRecord(#[from] NormalizeError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

struct StoreState {
    index: Arc<AttendanceIndex>,
    fingerprint: Option<Fingerprint>,
    /// Bumped on every applied mutation
    version: u64,
}

/// Clears the in-flight flag when a refresh ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AttendanceStore {
    gateway: Arc<dyn AttendanceGateway>,
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState>,
    refreshing: AtomicBool,
    /// Held from applying a change until its notification returns, so
    /// observers see changes in the order they were applied.
    publish: Mutex<()>,
    bus: NotificationBus,
    visibility: Visibility,
}

impl AttendanceStore {
    /// An empty store. Nothing is fetched until the first `refresh`.
    pub fn new(gateway: Arc<dyn AttendanceGateway>, clock: Arc<dyn Clock>) -> Self {
        let index = AttendanceIndex::empty(clock.calendar());
        Self {
            gateway,
            clock,
            state: RwLock::new(StoreState {
                index: Arc::new(index),
                fingerprint: None,
                version: 0,
            }),
            refreshing: AtomicBool::new(false),
            publish: Mutex::new(()),
            bus: NotificationBus::new(),
            visibility: Visibility::default(),
        }
    }

    // ===== Refresh =====

    /// Pull every row from the gateway and rebuild if anything changed.
    ///
    /// Never fails: every problem is reported as a skip and leaves the
    /// current indices in place.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_in_flight) = InFlight::acquire(&self.refreshing) else {
            debug!("Refresh already in flight, skipping");
            return RefreshOutcome::Skipped(SkipReason::InFlight);
        };
        if !self.visibility.is_visible() {
            debug!("Surface hidden, skipping refresh");
            return RefreshOutcome::Skipped(SkipReason::Hidden);
        }

        let started_at = self.read_state().version;
        let rows = match self.gateway.fetch_all().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Attendance fetch failed, keeping cached data");
                return RefreshOutcome::Skipped(SkipReason::FetchFailed);
            }
        };

        let calendar = self.clock.calendar();
        let mut records = normalize_rows(&rows, calendar.offset());
        // Newest first; unparsable timestamps (None) sort as oldest
        records.sort_by(|a, b| b.time_in.cmp(&a.time_in));
        let fingerprint = Fingerprint::of(&records);

        let _publish = self.lock_publish();
        let index = {
            let mut state = self.write_state();
            if state.version != started_at {
                debug!(
                    started_at,
                    current = state.version,
                    "Local changes landed during fetch, discarding refresh"
                );
                return RefreshOutcome::Skipped(SkipReason::Superseded);
            }
            if state.fingerprint == Some(fingerprint) && state.index.calendar().same_day(&calendar) {
                debug!(fingerprint = %fingerprint, "Attendance unchanged");
                return RefreshOutcome::Unchanged;
            }

            let index = Arc::new(AttendanceIndex::build(records, calendar));
            state.fingerprint = Some(fingerprint);
            state.index = index.clone();
            index
        };

        info!(
            records = index.len(),
            students_today = index.today_counts().total,
            fingerprint = %fingerprint,
            "Attendance cache rebuilt"
        );
        self.bus.notify(&index);
        RefreshOutcome::Changed
    }

    // ===== Mutations =====

    /// Create a record remotely, then insert it at the head of the list.
    ///
    /// If the cache already holds the created id, the insert is skipped and
    /// the created record is still returned.
    pub async fn add(&self, entry: &NewAttendance) -> Result<AttendanceRecord, MutationError> {
        let row = self.gateway.create(entry).await.map_err(|e| {
            warn!(name = %entry.full_name, error = %e, "Create failed");
            MutationError::from(e)
        })?;
        let record = self.normalize_created(&row)?;

        let id = record.id;
        let inserted = record.clone();
        match self.apply(move |index| index.insert_front(inserted).then_some(())) {
            Some(()) => debug!(id, "Added attendance record"),
            None => debug!(id, "Created record already cached, leaving indices alone"),
        }
        Ok(record)
    }

    /// Delete a record remotely, then drop it from the cache.
    ///
    /// Returns the removed record, or `None` when a refresh already dropped
    /// it while the remote call was out.
    pub async fn delete(&self, id: i64) -> Result<Option<AttendanceRecord>, MutationError> {
        self.ensure_known(&[id])?;
        self.gateway.delete(id).await.map_err(|e| {
            warn!(id, error = %e, "Delete failed");
            MutationError::from(e)
        })?;

        let removed = self.apply(|index| index.remove(id));
        match removed {
            Some(_) => debug!(id, "Deleted attendance record"),
            None => debug!(id, "Deleted record already gone from cache"),
        }
        Ok(removed)
    }

    /// Change a record's status remotely, then locally.
    ///
    /// Returns the record as it was before the change, or `None` when a
    /// refresh dropped it while the remote call was out.
    pub async fn update_status(
        &self,
        id: i64,
        status: AttendanceStatus,
    ) -> Result<Option<AttendanceRecord>, MutationError> {
        self.ensure_known(&[id])?;
        self.gateway.update_status(id, status).await.map_err(|e| {
            warn!(id, status = %status, error = %e, "Status update failed");
            MutationError::from(e)
        })?;

        let previous = self.apply(|index| index.set_status(id, status));
        match &previous {
            Some(record) => debug!(id, from = %record.status_label(), to = %status, "Updated attendance status"),
            None => debug!(id, "Updated record already gone from cache"),
        }
        Ok(previous)
    }

    /// Stamp a time-out on several records. Returns how many cached records
    /// were updated.
    pub async fn set_time_out(&self, ids: &[i64], time_out: DateTime<Utc>) -> Result<usize, MutationError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.ensure_known(ids)?;
        self.gateway.set_time_out(ids, time_out).await.map_err(|e| {
            warn!(count = ids.len(), error = %e, "Time-out update failed");
            MutationError::from(e)
        })?;

        let updated = self
            .apply(|index| match index.set_time_out(ids, time_out) {
                0 => None,
                n => Some(n),
            })
            .unwrap_or(0);
        debug!(updated, "Stamped time-out");
        Ok(updated)
    }

    fn normalize_created(&self, row: &RawRow) -> Result<AttendanceRecord, MutationError> {
        normalize(row, self.clock.calendar().offset()).map_err(|e| {
            warn!(error = %e, "Gateway returned an unusable created row");
            MutationError::from(e)
        })
    }

    fn ensure_known(&self, ids: &[i64]) -> Result<(), MutationError> {
        let state = self.read_state();
        match ids.iter().find(|id| !state.index.contains(**id)) {
            Some(&id) => {
                debug!(id, "Mutation on unknown id rejected");
                Err(MutationError::UnknownId(id))
            }
            None => Ok(()),
        }
    }

    /// Apply a local change, then refresh the fingerprint and notify.
    ///
    /// `change` returns `None` when it found nothing to do, and must then
    /// leave the index untouched. The version and observers are left alone
    /// in that case.
    fn apply<T>(&self, change: impl FnOnce(&mut AttendanceIndex) -> Option<T>) -> Option<T> {
        let calendar = self.clock.calendar();
        let _publish = self.lock_publish();

        let (value, index) = {
            let mut guard = self.write_state();
            let state = &mut *guard;

            let value = change(Arc::make_mut(&mut state.index))?;
            if !state.index.calendar().same_day(&calendar) {
                debug!(today = %calendar.today(), "Day rolled over, rebuilding indices");
                state.index = Arc::new(state.index.rebuilt(calendar));
            }

            state.fingerprint = Some(Fingerprint::of(state.index.records()));
            state.version += 1;
            (value, state.index.clone())
        };

        self.bus.notify(&index);
        Some(value)
    }

    // ===== Reads =====

    /// The current indices. Later changes replace the store's copy and do
    /// not affect a snapshot already handed out.
    pub fn snapshot(&self) -> Arc<AttendanceIndex> {
        self.read_state().index.clone()
    }

    pub fn today_counts(&self) -> TodayCounts {
        self.read_state().index.today_counts()
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.read_state().fingerprint
    }

    pub fn version(&self) -> u64 {
        self.read_state().version
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AttendanceIndex) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn calendar(&self) -> LocalCalendar {
        self.clock.calendar()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_publish(&self) -> MutexGuard<'_, ()> {
        self.publish.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn normalize_rows(rows: &[RawRow], offset: &FixedOffset) -> Vec<AttendanceRecord> {
    rows.iter()
        .filter_map(|row| match normalize(row, offset) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping attendance row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryGateway;
    use crate::cache::testing::{at, calendar, clock, raw, GatedGateway};
    use crate::clock::FixedClock;
    use crate::models::StudentKey;
    use std::sync::atomic::AtomicUsize;

    fn store_with(rows: Vec<RawRow>) -> (Arc<MemoryGateway>, Arc<FixedClock>, AttendanceStore) {
        let gateway = Arc::new(MemoryGateway::with_rows(rows));
        let clock = clock();
        let store = AttendanceStore::new(gateway.clone(), clock.clone());
        (gateway, clock, store)
    }

    fn count_notifications(store: &AttendanceStore) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _ = store.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn key(s: &str) -> StudentKey {
        StudentKey::derive(Some(s), None).unwrap()
    }

    /// The incrementally maintained index must match a fresh build.
    fn assert_matches_rebuild(store: &AttendanceStore) {
        let index = store.snapshot();
        let rebuilt = AttendanceIndex::build(index.records().cloned().collect(), *index.calendar());
        assert_eq!(*index, rebuilt);
    }

    #[tokio::test]
    async fn test_refresh_single_present_today() {
        let (_gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);

        assert_eq!(store.refresh().await, RefreshOutcome::Changed);
        assert_eq!(
            store.today_counts(),
            TodayCounts { total: 1, present: 1, late: 0, absent: 0 }
        );
    }

    #[tokio::test]
    async fn test_refresh_keeps_latest_today_per_student() {
        // Gateway order is oldest first; ingestion sorts it
        let (_gw, _clock, store) = store_with(vec![
            raw(1, "ana", AttendanceStatus::Present, at(9, 0)),
            raw(2, "ana", AttendanceStatus::Late, at(9, 15)),
        ]);
        store.refresh().await;

        let index = store.snapshot();
        assert_eq!(index.today_latest(&key("ana")).map(|r| r.id), Some(2));
        assert_eq!(
            store.today_counts(),
            TodayCounts { total: 1, present: 0, late: 1, absent: 0 }
        );
        assert_eq!(index.records().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_refresh_twice_notifies_once() {
        let (gw, _clock, store) = store_with(vec![
            raw(1, "ana", AttendanceStatus::Present, at(9, 0)),
            raw(2, "ben", AttendanceStatus::Late, at(9, 5)),
        ]);
        let notified = count_notifications(&store);

        assert_eq!(store.refresh().await, RefreshOutcome::Changed);
        assert_eq!(store.refresh().await, RefreshOutcome::Unchanged);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(gw.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_detects_remote_change() {
        let (gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        let notified = count_notifications(&store);
        store.refresh().await;

        gw.replace_rows(vec![raw(1, "ana", AttendanceStatus::Late, at(9, 0))]);
        assert_eq!(store.refresh().await, RefreshOutcome::Changed);
        assert_eq!(store.today_counts().late, 1);
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_skips_bad_rows() {
        let (_gw, _clock, store) = store_with(vec![
            raw(1, "ana", AttendanceStatus::Present, at(9, 0)),
            RawRow::new().with("username", "no-id"),
            RawRow::new().with("id", 3).with("status", "tardy"),
        ]);
        assert_eq!(store.refresh().await, RefreshOutcome::Changed);
        // Only the row without an id is dropped
        let index = store.snapshot();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(3).map(|r| r.status_label()), Some("tardy"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_rows_without_a_known_status() {
        let (_gw, _clock, store) = store_with(vec![
            RawRow::new()
                .with("id", 1)
                .with("student_username", "ana")
                .with("time_in", at(9, 0).to_rfc3339()),
            RawRow::new()
                .with("id", 2)
                .with("student_username", "ben")
                .with("status", "Pending")
                .with("time_in", at(9, 5).to_rfc3339()),
        ]);
        assert_eq!(store.refresh().await, RefreshOutcome::Changed);

        let index = store.snapshot();
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.today_counts(),
            TodayCounts { total: 2, present: 0, late: 0, absent: 0 }
        );
        assert!(index.present_days(&key("ana")).is_none());
        assert!(index.most_present().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_fetch_failure_keeps_state() {
        let (gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.refresh().await;
        let before = store.snapshot();
        let fingerprint = store.fingerprint();

        gw.set_failing(true);
        assert_eq!(store.refresh().await, RefreshOutcome::Skipped(SkipReason::FetchFailed));
        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.fingerprint(), fingerprint);
    }

    #[tokio::test]
    async fn test_refresh_skipped_while_hidden() {
        let (gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.visibility().set_visible(false);

        assert_eq!(store.refresh().await, RefreshOutcome::Skipped(SkipReason::Hidden));
        assert_eq!(gw.fetch_count(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_in_flight_is_not_duplicated() {
        let gw = Arc::new(GatedGateway::with_rows(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]));
        let store = Arc::new(AttendanceStore::new(gw.clone(), clock()));

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.refresh().await }
        });
        gw.entered().await;
        assert!(store.is_refreshing());
        assert_eq!(store.refresh().await, RefreshOutcome::Skipped(SkipReason::InFlight));

        gw.release();
        assert_eq!(first.await.unwrap(), RefreshOutcome::Changed);
        assert_eq!(gw.inner.fetch_count(), 1);
        assert!(!store.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_discarded_when_mutation_lands_mid_fetch() {
        let gw = Arc::new(GatedGateway::with_rows(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]));
        let store = Arc::new(AttendanceStore::new(gw.clone(), clock()));

        let refresh = tokio::spawn({
            let store = store.clone();
            async move { store.refresh().await }
        });
        gw.entered().await;

        let added = store
            .add(&NewAttendance::check_in("Ben", Some("ben".to_string())).at(at(10, 0)))
            .await
            .unwrap();
        gw.release();

        assert_eq!(refresh.await.unwrap(), RefreshOutcome::Skipped(SkipReason::Superseded));
        // The optimistic add survives the stale pull
        assert!(store.snapshot().contains(added.id));
        assert_eq!(store.snapshot().len(), 1);

        gw.release();
        assert_eq!(store.refresh().await, RefreshOutcome::Changed);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_on_day_rollover() {
        let (_gw, clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.refresh().await;
        assert_eq!(store.today_counts().total, 1);

        clock.advance(chrono::Duration::days(1));
        assert_eq!(store.refresh().await, RefreshOutcome::Changed);
        assert_eq!(store.today_counts().total, 0);
        // Still present this month
        assert_eq!(store.snapshot().present_days(&key("ana")).map(|d| d.len()), Some(1));
    }

    #[tokio::test]
    async fn test_delete_unknown_id_changes_nothing() {
        let (gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.refresh().await;
        let notified = count_notifications(&store);
        let before = store.snapshot();
        let version = store.version();

        assert!(matches!(store.delete(999).await, Err(MutationError::UnknownId(999))));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.version(), version);
        assert_eq!(gw.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_status_moves_counts_without_refresh() {
        let (gw, _clock, store) = store_with(vec![
            raw(1, "ana", AttendanceStatus::Present, at(9, 0)),
            raw(2, "ben", AttendanceStatus::Present, at(9, 5)),
        ]);
        store.refresh().await;
        let before = store.today_counts();
        let fetches = gw.fetch_count();

        let previous = store.update_status(1, AttendanceStatus::Absent).await.unwrap();
        assert_eq!(previous.map(|r| r.status), Some(Some(AttendanceStatus::Present)));

        let after = store.today_counts();
        assert_eq!(after.present, before.present - 1);
        assert_eq!(after.absent, before.absent + 1);
        assert_eq!(gw.fetch_count(), fetches);
        assert!(store.snapshot().present_days(&key("ana")).is_none());
        assert_matches_rebuild(&store);
    }

    #[tokio::test]
    async fn test_mutation_then_caught_up_refresh_is_unchanged() {
        let (_gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.refresh().await;
        store.update_status(1, AttendanceStatus::Late).await.unwrap();

        // The memory gateway applied the same change, so the next pull matches
        assert_eq!(store.refresh().await, RefreshOutcome::Unchanged);
        assert_eq!(store.today_counts().late, 1);
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_indices_untouched() {
        let (gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.refresh().await;
        let notified = count_notifications(&store);
        let before = store.snapshot();
        let fingerprint = store.fingerprint();

        gw.set_failing(true);
        assert!(matches!(
            store.add(&NewAttendance::check_in("Ben", Some("ben".to_string()))).await,
            Err(MutationError::Gateway(_))
        ));
        assert!(matches!(store.delete(1).await, Err(MutationError::Gateway(_))));
        assert!(matches!(
            store.update_status(1, AttendanceStatus::Late).await,
            Err(MutationError::Gateway(_))
        ));
        assert!(matches!(store.set_time_out(&[1], at(15, 0)).await, Err(MutationError::Gateway(_))));

        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.fingerprint(), fingerprint);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_add_then_delete_restores_indices() {
        let (_gw, _clock, store) = store_with(vec![
            raw(1, "ana", AttendanceStatus::Present, at(8, 0)),
            raw(2, "ben", AttendanceStatus::Late, at(8, 30)),
        ]);
        store.refresh().await;
        let before = store.snapshot();
        let fingerprint = store.fingerprint();

        let record = store
            .add(&NewAttendance::check_in("Ana Reyes", Some("ana".to_string()))
                .with_status(AttendanceStatus::Late)
                .at(at(11, 0)))
            .await
            .unwrap();
        assert_eq!(store.snapshot().today_latest(&key("ana")).map(|r| r.id), Some(record.id));
        assert_matches_rebuild(&store);

        store.delete(record.id).await.unwrap();
        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.fingerprint(), fingerprint);
    }

    #[tokio::test]
    async fn test_incremental_sequence_matches_rebuild() {
        let (_gw, _clock, store) = store_with(vec![
            raw(1, "ana", AttendanceStatus::Present, at(8, 0)),
            raw(2, "ben", AttendanceStatus::Present, at(8, 10)),
            raw(3, "ana", AttendanceStatus::Present, at(7, 0) - chrono::Duration::days(2)),
        ]);
        store.refresh().await;

        let carl = store
            .add(&NewAttendance::check_in("Carl", Some("carl".to_string())).at(at(9, 0)))
            .await
            .unwrap();
        assert_matches_rebuild(&store);

        store.update_status(1, AttendanceStatus::Excused).await.unwrap();
        assert_matches_rebuild(&store);

        store.delete(2).await.unwrap();
        assert_matches_rebuild(&store);

        store
            .add(&NewAttendance::check_in("Ben", Some("@Ben".to_string())).at(at(9, 30)))
            .await
            .unwrap();
        store.update_status(carl.id, AttendanceStatus::Late).await.unwrap();
        store.delete(1).await.unwrap();
        assert_matches_rebuild(&store);

        let index = store.snapshot();
        // Ana's only remaining record is from two days ago
        assert_eq!(index.student_state(&key("ana")), crate::cache::index::StudentState::Stale);
        assert_eq!(index.present_days(&key("ana")).map(|d| d.len()), Some(1));
    }

    /// Hands back the same row from every create.
    struct RepeatingGateway(RawRow);

    #[async_trait::async_trait]
    impl AttendanceGateway for RepeatingGateway {
        async fn fetch_all(&self) -> Result<Vec<RawRow>, GatewayError> {
            Ok(vec![self.0.clone()])
        }

        async fn create(&self, _entry: &NewAttendance) -> Result<RawRow, GatewayError> {
            Ok(self.0.clone())
        }

        async fn delete(&self, _id: i64) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn update_status(&self, _id: i64, _status: AttendanceStatus) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn set_time_out(&self, _ids: &[i64], _time_out: DateTime<Utc>) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_add_of_cached_id_succeeds_without_change() {
        let gw = Arc::new(RepeatingGateway(raw(5, "ana", AttendanceStatus::Present, at(9, 0))));
        let store = AttendanceStore::new(gw, clock());
        store.refresh().await;
        let before = store.snapshot();
        let version = store.version();
        let notified = count_notifications(&store);

        let record = store
            .add(&NewAttendance::check_in("Ben", Some("ben".to_string())))
            .await
            .unwrap();
        assert_eq!(record.id, 5);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.version(), version);
    }

    #[tokio::test]
    async fn test_delete_reconciled_by_refresh_mid_call_succeeds() {
        let gw = Arc::new(GatedGateway::parking_deletes(vec![
            raw(1, "ana", AttendanceStatus::Present, at(9, 0)),
            raw(2, "ben", AttendanceStatus::Late, at(9, 5)),
        ]));
        let store = Arc::new(AttendanceStore::new(gw.clone(), clock()));
        assert_eq!(store.refresh().await, RefreshOutcome::Changed);

        let delete = tokio::spawn({
            let store = store.clone();
            async move { store.delete(1).await }
        });
        gw.entered().await;

        // The remote row is already gone, and a refresh picks that up first
        assert_eq!(store.refresh().await, RefreshOutcome::Changed);
        assert!(!store.snapshot().contains(1));
        let version = store.version();
        let notified = count_notifications(&store);

        gw.release();
        assert_eq!(delete.await.unwrap().unwrap(), None);
        assert_eq!(store.version(), version);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(gw.inner.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_unusable_created_row() {
        let gw = Arc::new(RepeatingGateway(RawRow::new().with("username", "ghost")));
        let store = AttendanceStore::new(gw, clock());

        let result = store.add(&NewAttendance::check_in("Ghost", None)).await;
        assert!(matches!(result, Err(MutationError::InvalidRecord(NormalizeError::MissingId))));
        assert!(store.snapshot().is_empty());
        assert_eq!(store.version(), 0);
    }

    #[tokio::test]
    async fn test_set_time_out_notifies_without_moving_aggregates() {
        let (_gw, _clock, store) = store_with(vec![
            raw(1, "ana", AttendanceStatus::Present, at(8, 0)),
            raw(2, "ben", AttendanceStatus::Late, at(8, 30)),
        ]);
        store.refresh().await;
        let counts = store.today_counts();
        let fingerprint = store.fingerprint();
        let notified = count_notifications(&store);

        assert_eq!(store.set_time_out(&[1, 2], at(15, 0)).await.unwrap(), 2);
        assert_eq!(store.snapshot().get(1).and_then(|r| r.time_out), Some(at(15, 0)));
        assert_eq!(store.today_counts(), counts);
        assert_eq!(store.fingerprint(), fingerprint);
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        assert!(matches!(
            store.set_time_out(&[1, 42], at(16, 0)).await,
            Err(MutationError::UnknownId(42))
        ));
        assert_eq!(store.set_time_out(&[], at(16, 0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mutation_after_midnight_rebuilds() {
        let (_gw, clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.refresh().await;

        clock.advance(chrono::Duration::days(1));
        let next_morning = at(9, 0) + chrono::Duration::days(1);
        store
            .add(&NewAttendance::check_in("Ben", Some("ben".to_string())).at(next_morning))
            .await
            .unwrap();

        let index = store.snapshot();
        assert_eq!(index.calendar().today(), calendar().today().succ_opt().unwrap());
        assert_eq!(index.student_state(&key("ana")), crate::cache::index::StudentState::Stale);
        assert_eq!(index.today_counts().total, 1);
        assert_matches_rebuild(&store);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_changes() {
        let (_gw, _clock, store) = store_with(vec![raw(1, "ana", AttendanceStatus::Present, at(9, 0))]);
        store.refresh().await;
        let snapshot = store.snapshot();

        store.update_status(1, AttendanceStatus::Absent).await.unwrap();
        assert_eq!(snapshot.today_counts().present, 1);
        assert_eq!(store.today_counts().absent, 1);
    }
}
