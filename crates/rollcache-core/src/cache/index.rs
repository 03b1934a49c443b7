//! Derived attendance indices.
//!
//! `AttendanceIndex` owns the newest-first raw list and every aggregate
//! derived from it. Aggregates are caches: `build` over the same list always
//! reproduces them, and the incremental operations used by the mutation path
//! (`insert_front`, `remove`, `set_status`) keep them equal to what `build`
//! would produce by recomputing only the affected student's entries.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::models::{AttendanceRecord, AttendanceStatus, StudentKey};
use crate::utils::dates::LocalCalendar;

/// Label used for today's rows that carry no section.
pub const UNKNOWN_SECTION: &str = "Unknown";

/// Aggregate counts over each student's latest record today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct TodayCounts {
    pub total: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MostPresentEntry {
    pub key: StudentKey,
    pub name: String,
    pub days: usize,
}

/// Per-section tallies over today's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SectionSummary {
    pub section: String,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
}

/// Where a student currently stands relative to today's aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentState {
    /// No records for this key at all
    Absent,
    /// Has a latest-today record
    TrackedToday,
    /// Has records, none of them today
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceIndex {
    calendar: LocalCalendar,
    /// Record ids, newest-first by `time_in`
    order: Vec<i64>,
    by_id: HashMap<i64, AttendanceRecord>,
    /// Each key's ids in `order` order
    ids_by_key: HashMap<StudentKey, Vec<i64>>,
    today_latest_by_key: HashMap<StudentKey, i64>,
    present_days_by_key: HashMap<StudentKey, BTreeSet<NaiveDate>>,
    display_name_by_key: HashMap<StudentKey, String>,
}

impl AttendanceIndex {
    pub fn empty(calendar: LocalCalendar) -> Self {
        Self {
            calendar,
            order: Vec::new(),
            by_id: HashMap::new(),
            ids_by_key: HashMap::new(),
            today_latest_by_key: HashMap::new(),
            present_days_by_key: HashMap::new(),
            display_name_by_key: HashMap::new(),
        }
    }

    /// Build every index from `records`, which must already be newest-first.
    ///
    /// A record whose id was already seen is dropped: ids are unique and the
    /// first (newest) occurrence wins.
    pub fn build(records: Vec<AttendanceRecord>, calendar: LocalCalendar) -> Self {
        let mut index = Self::empty(calendar);
        index.order.reserve(records.len());

        for record in records {
            if index.by_id.contains_key(&record.id) {
                warn!(id = record.id, "Duplicate attendance id in source rows, keeping newest");
                continue;
            }

            if let Some(key) = record.student_key.clone() {
                index
                    .display_name_by_key
                    .entry(key.clone())
                    .or_insert_with(|| record.display_name());

                if record.is_today(&calendar) && !index.today_latest_by_key.contains_key(&key) {
                    index.today_latest_by_key.insert(key.clone(), record.id);
                }

                if let (true, Some(date)) = (
                    record.is_present_this_month(&calendar),
                    record.local_date(&calendar),
                ) {
                    index
                        .present_days_by_key
                        .entry(key.clone())
                        .or_default()
                        .insert(date);
                }

                index.ids_by_key.entry(key).or_default().push(record.id);
            }

            index.order.push(record.id);
            index.by_id.insert(record.id, record);
        }

        index
    }

    /// Rebuild from this index's own records against a new calendar.
    pub fn rebuilt(&self, calendar: LocalCalendar) -> Self {
        Self::build(self.records().cloned().collect(), calendar)
    }

    // ===== Incremental updates =====

    /// Insert a record at the head of the list.
    /// Returns false, changing nothing, if the id is already present.
    pub(crate) fn insert_front(&mut self, record: AttendanceRecord) -> bool {
        if self.by_id.contains_key(&record.id) {
            return false;
        }
        let id = record.id;
        let key = record.student_key.clone();

        self.order.insert(0, id);
        self.by_id.insert(id, record);
        if let Some(key) = key {
            self.ids_by_key.entry(key.clone()).or_default().insert(0, id);
            self.recompute_key(&key);
        }
        true
    }

    /// Remove a record and repair its student's aggregates.
    pub(crate) fn remove(&mut self, id: i64) -> Option<AttendanceRecord> {
        let record = self.by_id.remove(&id)?;
        self.order.retain(|other| *other != id);

        if let Some(ref key) = record.student_key {
            if let Some(ids) = self.ids_by_key.get_mut(key) {
                ids.retain(|other| *other != id);
            }
            self.recompute_key(key);
        }
        Some(record)
    }

    /// Change a record's status in place. Returns the record as it was
    /// before the change.
    pub(crate) fn set_status(&mut self, id: i64, status: AttendanceStatus) -> Option<AttendanceRecord> {
        let record = self.by_id.get_mut(&id)?;
        let previous = record.clone();
        record.status = Some(status);
        record.status_raw = status.as_str().to_string();
        if let Some(key) = record.student_key.clone() {
            self.recompute_key(&key);
        }
        Some(previous)
    }

    /// Stamp a time-out on every known id. Returns how many were updated.
    pub(crate) fn set_time_out(&mut self, ids: &[i64], time_out: DateTime<Utc>) -> usize {
        let mut updated = 0;
        for id in ids {
            if let Some(record) = self.by_id.get_mut(id) {
                record.time_out = Some(time_out);
                updated += 1;
            }
        }
        updated
    }

    /// Recompute one student's derived entries from that student's records.
    ///
    /// Cost is bounded by the student's own record count.
    fn recompute_key(&mut self, key: &StudentKey) {
        let has_records = self.ids_by_key.get(key).is_some_and(|ids| !ids.is_empty());
        if !has_records {
            self.ids_by_key.remove(key);
            self.today_latest_by_key.remove(key);
            self.present_days_by_key.remove(key);
            self.display_name_by_key.remove(key);
            return;
        }

        let calendar = self.calendar;
        let records: Vec<&AttendanceRecord> = self.ids_by_key[key]
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .collect();

        let display_name = records.first().map(|r| r.display_name());
        let today_latest = records.iter().find(|r| r.is_today(&calendar)).map(|r| r.id);
        let present_days: BTreeSet<NaiveDate> = records
            .iter()
            .filter(|r| r.is_present_this_month(&calendar))
            .filter_map(|r| r.local_date(&calendar))
            .collect();

        match display_name {
            Some(name) => self.display_name_by_key.insert(key.clone(), name),
            None => self.display_name_by_key.remove(key),
        };
        match today_latest {
            Some(id) => self.today_latest_by_key.insert(key.clone(), id),
            None => self.today_latest_by_key.remove(key),
        };
        if present_days.is_empty() {
            self.present_days_by_key.remove(key);
        } else {
            self.present_days_by_key.insert(key.clone(), present_days);
        }
    }

    // ===== Queries =====

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&AttendanceRecord> {
        self.by_id.get(&id)
    }

    /// All records, newest-first.
    pub fn records(&self) -> impl Iterator<Item = &AttendanceRecord> + '_ {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn today_latest(&self, key: &StudentKey) -> Option<&AttendanceRecord> {
        self.today_latest_by_key.get(key).and_then(|id| self.by_id.get(id))
    }

    /// Every student's latest record today, in no particular order.
    pub fn today_latest_records(&self) -> impl Iterator<Item = (&StudentKey, &AttendanceRecord)> + '_ {
        self.today_latest_by_key
            .iter()
            .filter_map(|(key, id)| self.by_id.get(id).map(|r| (key, r)))
    }

    pub fn present_days(&self, key: &StudentKey) -> Option<&BTreeSet<NaiveDate>> {
        self.present_days_by_key.get(key)
    }

    pub fn display_name(&self, key: &StudentKey) -> Option<&str> {
        self.display_name_by_key.get(key).map(String::as_str)
    }

    pub fn student_state(&self, key: &StudentKey) -> StudentState {
        if self.today_latest_by_key.contains_key(key) {
            StudentState::TrackedToday
        } else if self.ids_by_key.contains_key(key) {
            StudentState::Stale
        } else {
            StudentState::Absent
        }
    }

    /// Counts derived solely from each student's latest record today.
    /// Excused and unrecognized statuses are counted in `total` only.
    pub fn today_counts(&self) -> TodayCounts {
        let mut counts = TodayCounts {
            total: self.today_latest_by_key.len(),
            ..TodayCounts::default()
        };
        for (_, record) in self.today_latest_records() {
            match record.status {
                Some(AttendanceStatus::Present) => counts.present += 1,
                Some(AttendanceStatus::Late) => counts.late += 1,
                Some(AttendanceStatus::Absent) => counts.absent += 1,
                Some(AttendanceStatus::Excused) | None => {}
            }
        }
        counts
    }

    /// `(key, present day count)` sorted by count descending.
    /// Ties keep encounter order: the order of each key's first
    /// present-this-month record in the newest-first list.
    pub fn most_present(&self) -> Vec<(StudentKey, usize)> {
        let calendar = self.calendar;
        let mut seen = HashSet::new();
        let mut ranking: Vec<(StudentKey, usize)> = self
            .records()
            .filter(|r| r.is_present_this_month(&calendar))
            .filter_map(|r| r.student_key.as_ref())
            .filter(|key| seen.insert(*key))
            .filter_map(|key| self.present_days_by_key.get(key).map(|days| (key.clone(), days.len())))
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1));
        ranking
    }

    /// Top `limit` of `most_present`, labelled with display names.
    pub fn most_present_labeled(&self, limit: usize) -> Vec<MostPresentEntry> {
        self.most_present()
            .into_iter()
            .take(limit)
            .map(|(key, days)| MostPresentEntry {
                name: self
                    .display_name(&key)
                    .map(str::to_string)
                    .unwrap_or_else(|| key.to_string()),
                key,
                days,
            })
            .collect()
    }

    /// Every record timestamped today, newest-first.
    pub fn today_rows(&self) -> Vec<&AttendanceRecord> {
        let calendar = self.calendar;
        self.records().filter(|r| r.is_today(&calendar)).collect()
    }

    /// The newest `limit` records with distinct student keys.
    pub fn recent(&self, limit: usize) -> Vec<&AttendanceRecord> {
        let mut seen = HashSet::new();
        self.records()
            .filter(|r| r.student_key.as_ref().is_some_and(|key| seen.insert(key)))
            .take(limit)
            .collect()
    }

    /// Per-section tallies over today's rows, sorted by section name.
    pub fn section_summary(&self) -> Vec<SectionSummary> {
        let mut by_section: BTreeMap<String, SectionSummary> = BTreeMap::new();
        for record in self.today_rows() {
            let section = record
                .section
                .clone()
                .unwrap_or_else(|| UNKNOWN_SECTION.to_string());
            let entry = by_section.entry(section.clone()).or_insert_with(|| SectionSummary {
                section,
                ..SectionSummary::default()
            });
            entry.total += 1;
            match record.status {
                Some(AttendanceStatus::Present) => entry.present += 1,
                Some(AttendanceStatus::Late) => entry.late += 1,
                Some(AttendanceStatus::Absent) => entry.absent += 1,
                Some(AttendanceStatus::Excused) | None => {}
            }
        }
        by_section.into_values().collect()
    }

    /// Records whose local date is `date`, newest-first.
    pub fn records_on(&self, date: NaiveDate) -> Vec<&AttendanceRecord> {
        let calendar = self.calendar;
        self.records()
            .filter(|r| r.local_date(&calendar) == Some(date))
            .collect()
    }

    /// Records for one month grouped by local date.
    pub fn records_in_month(&self, year: i32, month: u32) -> BTreeMap<NaiveDate, Vec<&AttendanceRecord>> {
        let calendar = self.calendar;
        let mut by_date: BTreeMap<NaiveDate, Vec<&AttendanceRecord>> = BTreeMap::new();
        for record in self.records() {
            if let Some(date) = record.local_date(&calendar) {
                if date.year() == year && date.month() == month {
                    by_date.entry(date).or_default().push(record);
                }
            }
        }
        by_date
    }
}
