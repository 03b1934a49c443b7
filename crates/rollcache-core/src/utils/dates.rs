//! Flexible timestamp parsing and local-calendar helpers.
//!
//! Gateways deliver timestamps in several shapes: RFC 3339, space-separated
//! ISO-like strings, and day-first `DD/MM/YYYY[, HH:MM[:SS]]` strings. All of
//! them are normalized to a UTC instant here. Strings without an explicit
//! offset are read in the local offset supplied by the caller.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};

/// Naive (offset-less) layouts tried after whitespace is folded to `T`.
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y/%m/%dT%H:%M:%S"];

/// Offset-carrying layouts not covered by RFC 3339.
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"];

/// Parse a timestamp in any supported layout.
///
/// Returns `None` when nothing matches; callers treat that as "no usable
/// instant" rather than an error.
pub fn parse_flexible(input: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(dt) = parse_day_first(trimmed, offset) {
        return Some(dt);
    }

    let folded = trimmed.split_whitespace().collect::<Vec<_>>().join("T");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&folded) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&folded, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&folded, format) {
            return Some(from_local(naive, offset));
        }
    }
    // Date only: local midnight
    if let Ok(date) = NaiveDate::parse_from_str(&folded, "%Y-%m-%d") {
        return Some(from_local(date.and_time(NaiveTime::MIN), offset));
    }

    None
}

fn from_local(naive: NaiveDateTime, offset: &FixedOffset) -> DateTime<Utc> {
    // A fixed offset maps every local time to exactly one instant
    (naive - *offset).and_utc()
}

/// `DD/MM/YYYY` or `DD-MM-YYYY`, optionally followed by `[ ,T]+HH:MM[:SS]`.
/// Two-digit years are read as 20YY. Trailing text is ignored.
fn parse_day_first(input: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let (day, rest) = take_digits(input, 1, 2)?;
    let rest = take_date_separator(rest)?;
    let (month, rest) = take_digits(rest, 1, 2)?;
    let rest = take_date_separator(rest)?;
    let (mut year, rest) = take_digits(rest, 2, 4)?;
    if year < 100 {
        year += 2000;
    }

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let time = parse_trailing_time(rest).unwrap_or(NaiveTime::MIN);

    Some(from_local(date.and_time(time), offset))
}

fn parse_trailing_time(rest: &str) -> Option<NaiveTime> {
    let after = rest.trim_start_matches([' ', ',', 'T']);
    if after.len() == rest.len() {
        return None;
    }
    let (hour, after) = take_digits(after, 1, 2)?;
    let after = after.strip_prefix(':')?;
    let (minute, after) = take_digits(after, 2, 2)?;
    let second = after
        .strip_prefix(':')
        .and_then(|s| take_digits(s, 2, 2))
        .map(|(s, _)| s)
        .unwrap_or(0);
    NaiveTime::from_hms_opt(hour, minute, second)
}

fn take_digits(s: &str, min: usize, max: usize) -> Option<(u32, &str)> {
    let len = s.bytes().take(max).take_while(u8::is_ascii_digit).count();
    if len < min {
        return None;
    }
    let value = s[..len].parse().ok()?;
    Some((value, &s[len..]))
}

fn take_date_separator(s: &str) -> Option<&str> {
    s.strip_prefix('/').or_else(|| s.strip_prefix('-'))
}

/// "Today" and "this month" as seen from one local offset at one moment.
///
/// Every date-bound aggregate is computed against a single `LocalCalendar`
/// so that a rebuild never straddles midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    offset: FixedOffset,
    today: NaiveDate,
}

impl LocalCalendar {
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        Self {
            offset: *now.offset(),
            today: now.date_naive(),
        }
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn local_date(&self, instant: &DateTime<Utc>) -> NaiveDate {
        self.offset.from_utc_datetime(&instant.naive_utc()).date_naive()
    }

    pub fn is_today(&self, instant: &DateTime<Utc>) -> bool {
        self.local_date(instant) == self.today
    }

    pub fn in_current_month(&self, instant: &DateTime<Utc>) -> bool {
        let date = self.local_date(instant);
        date.year() == self.today.year() && date.month() == self.today.month()
    }

    /// Same calendar day as `other` (and therefore same month).
    pub fn same_day(&self, other: &LocalCalendar) -> bool {
        self.today == other.today && self.offset == other.offset
    }
}
