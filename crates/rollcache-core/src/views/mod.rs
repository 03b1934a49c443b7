//! Observer-side change suppression.
//!
//! Each view extracts the slice of the index it displays, hashes it, and
//! re-renders only when that hash differs from the one it last rendered.
//! This sits below the store's own fingerprint: a refresh that changed some
//! record still leaves a view alone if its slice came out identical.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use crate::cache::{
    AttendanceIndex, AttendanceStore, MostPresentEntry, SectionSummary, Subscription, TodayCounts,
};
use crate::models::{AttendanceRecord, AttendanceStatus};

/// Default length of the recent-students list.
pub const DEFAULT_RECENT_LIMIT: usize = 8;

/// Default length of the most-present ranking.
pub const DEFAULT_MOST_PRESENT_LIMIT: usize = 10;

/// The parts of a record a table row shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ViewRow {
    pub id: i64,
    pub name: String,
    pub section: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub time_in: Option<DateTime<Utc>>,
    pub time_out: Option<DateTime<Utc>>,
}

impl From<&AttendanceRecord> for ViewRow {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            id: record.id,
            name: record.display_name(),
            section: record.section.clone(),
            status: record.status,
            time_in: record.time_in,
            time_out: record.time_out,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TodaySlice {
    pub counts: TodayCounts,
    pub rows: Vec<ViewRow>,
}

pub fn today_slice(index: &AttendanceIndex) -> TodaySlice {
    TodaySlice {
        counts: index.today_counts(),
        rows: index.today_rows().into_iter().map(ViewRow::from).collect(),
    }
}

pub fn recent_slice(index: &AttendanceIndex, limit: usize) -> Vec<ViewRow> {
    index.recent(limit).into_iter().map(ViewRow::from).collect()
}

pub fn most_present_slice(index: &AttendanceIndex, limit: usize) -> Vec<MostPresentEntry> {
    index.most_present_labeled(limit)
}

pub fn sections_slice(index: &AttendanceIndex) -> Vec<SectionSummary> {
    index.section_summary()
}

fn slice_hash<T: Hash>(slice: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    slice.hash(&mut hasher);
    hasher.finish()
}

type Extract<T> = Box<dyn Fn(&AttendanceIndex) -> T + Send + Sync>;
type Render<T> = Box<dyn Fn(&T) + Send + Sync>;

/// An observer that renders one slice of the index, skipping unchanged
/// slices.
pub struct SliceObserver<T> {
    name: &'static str,
    extract: Extract<T>,
    render: Render<T>,
    last: Mutex<Option<u64>>,
    renders: AtomicUsize,
}

impl<T: Hash + 'static> SliceObserver<T> {
    pub fn new<E, R>(name: &'static str, extract: E, render: R) -> Self
    where
        E: Fn(&AttendanceIndex) -> T + Send + Sync + 'static,
        R: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            name,
            extract: Box::new(extract),
            render: Box::new(render),
            last: Mutex::new(None),
            renders: AtomicUsize::new(0),
        }
    }

    /// Render the slice if it differs from the last rendered one.
    /// Returns whether a render happened.
    pub fn observe(&self, index: &AttendanceIndex) -> bool {
        let slice = (self.extract)(index);
        let hash = slice_hash(&slice);
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some(hash) {
                trace!(view = self.name, "Slice unchanged, skipping render");
                return false;
            }
            *last = Some(hash);
        }

        (self.render)(&slice);
        self.renders.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    /// Subscribe to `store` and render its current state once.
    pub fn attach(self, store: &AttendanceStore) -> (Arc<Self>, Subscription) {
        let observer = Arc::new(self);
        observer.observe(&store.snapshot());
        let subscribed = observer.clone();
        let subscription = store.subscribe(move |index| {
            subscribed.observe(index);
        });
        (observer, subscription)
    }
}

impl SliceObserver<TodaySlice> {
    pub fn today<R>(render: R) -> Self
    where
        R: Fn(&TodaySlice) + Send + Sync + 'static,
    {
        Self::new("today", today_slice, render)
    }
}

impl SliceObserver<Vec<ViewRow>> {
    pub fn recent<R>(limit: usize, render: R) -> Self
    where
        R: Fn(&Vec<ViewRow>) + Send + Sync + 'static,
    {
        Self::new("recent", move |index| recent_slice(index, limit), render)
    }
}

impl SliceObserver<Vec<MostPresentEntry>> {
    pub fn most_present<R>(limit: usize, render: R) -> Self
    where
        R: Fn(&Vec<MostPresentEntry>) + Send + Sync + 'static,
    {
        Self::new("most_present", move |index| most_present_slice(index, limit), render)
    }
}

impl SliceObserver<Vec<SectionSummary>> {
    pub fn sections<R>(render: R) -> Self
    where
        R: Fn(&Vec<SectionSummary>) + Send + Sync + 'static,
    {
        Self::new("sections", sections_slice, render)
    }
}
