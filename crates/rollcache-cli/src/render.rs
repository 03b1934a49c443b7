//! Plain-text panels for each dashboard view.
//!
//! Every function returns the panel as a string; `main` decides where it
//! goes. Times are shown in the local offset the cache uses for "today".

use std::fmt::Write;

use chrono::{DateTime, FixedOffset, Utc};
use rollcache_core::cache::{MostPresentEntry, SectionSummary};
use rollcache_core::views::{TodaySlice, ViewRow};

const NAME_WIDTH: usize = 24;
const SECTION_WIDTH: usize = 12;

/// Truncate to `max_len` characters, adding an ellipsis if needed
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

fn clock_time(instant: Option<DateTime<Utc>>, offset: &FixedOffset) -> String {
    match instant {
        Some(t) => t.with_timezone(offset).format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

fn row_line(out: &mut String, row: &ViewRow, offset: &FixedOffset) {
    let _ = writeln!(
        out,
        "  {:<name$}  {:<section$}  {:<8}  {}  {}",
        truncate(&row.name, NAME_WIDTH),
        truncate(row.section.as_deref().unwrap_or("-"), SECTION_WIDTH),
        row.status.map_or("-", |s| s.as_str()),
        clock_time(row.time_in, offset),
        clock_time(row.time_out, offset),
        name = NAME_WIDTH,
        section = SECTION_WIDTH,
    );
}

pub fn today(slice: &TodaySlice, offset: &FixedOffset) -> String {
    let c = &slice.counts;
    let mut out = format!(
        "== Today ==  total {}  present {}  late {}  absent {}\n",
        c.total, c.present, c.late, c.absent
    );
    if slice.rows.is_empty() {
        out.push_str("  (no check-ins yet)\n");
    }
    for row in &slice.rows {
        row_line(&mut out, row, offset);
    }
    out
}

pub fn recent(rows: &[ViewRow], offset: &FixedOffset) -> String {
    let mut out = String::from("== Recent ==\n");
    for row in rows {
        row_line(&mut out, row, offset);
    }
    out
}

pub fn most_present(entries: &[MostPresentEntry]) -> String {
    let mut out = String::from("== Most present this month ==\n");
    for (rank, entry) in entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:>2}. {:<name$}  {} day{}",
            rank + 1,
            truncate(&entry.name, NAME_WIDTH),
            entry.days,
            if entry.days == 1 { "" } else { "s" },
            name = NAME_WIDTH,
        );
    }
    out
}

pub fn sections(summaries: &[SectionSummary]) -> String {
    let mut out = String::from("== Sections ==\n");
    for s in summaries {
        let _ = writeln!(
            out,
            "  {:<section$}  present {:>3}  late {:>3}  absent {:>3}  total {:>3}",
            truncate(&s.section, SECTION_WIDTH),
            s.present,
            s.late,
            s.absent,
            s.total,
            section = SECTION_WIDTH,
        );
    }
    out
}
