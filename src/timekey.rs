use std::fmt;
use std::str::FromStr;

use time::macros::{format_description, offset};
use time::{Date, Month, OffsetDateTime, Time, UtcOffset};

use crate::error::{ArchiveError, Result, TimestampPart};

const NANOS_DIGITS: usize = 9;

/// The fixed time zone every day and month bucket is cut in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveZone(UtcOffset);

impl ArchiveZone {
    pub const fn new(offset: UtcOffset) -> Self {
        Self(offset)
    }

    pub fn offset(&self) -> UtcOffset {
        self.0
    }
}

impl Default for ArchiveZone {
    /// Asia/Tokyo, which observes no daylight saving.
    fn default() -> Self {
        Self(offset!(+9))
    }
}

impl FromStr for ArchiveZone {
    type Err = time::error::Parse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
        UtcOffset::parse(s.trim(), format).map(Self)
    }
}

impl fmt::Display for ArchiveZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, _) = self.0.as_hms();
        let sign = if self.0.is_negative() { '-' } else { '+' };
        write!(f, "{sign}{:02}:{:02}", h.unsigned_abs(), m.unsigned_abs())
    }
}

/// Splits `SECONDS.FRACTION` into whole seconds and nanoseconds. The fraction
/// is truncated or right-padded with zeros to nine digits; a missing fraction
/// counts as zero.
pub fn split_timestamp(raw: &str) -> Result<(i64, u32)> {
    let (sec_part, frac_part) = raw.split_once('.').unwrap_or((raw, ""));
    let seconds = sec_part
        .parse::<i64>()
        .map_err(|_| malformed(TimestampPart::Seconds, raw))?;

    let mut digits: String = frac_part.chars().take(NANOS_DIGITS).collect();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(TimestampPart::Nanoseconds, raw));
    }
    while digits.len() < NANOS_DIGITS {
        digits.push('0');
    }
    let nanos = digits
        .parse::<u32>()
        .map_err(|_| malformed(TimestampPart::Nanoseconds, raw))?;
    Ok((seconds, nanos))
}

pub fn parse_timestamp(raw: &str, zone: ArchiveZone) -> Result<OffsetDateTime> {
    let (seconds, nanos) = split_timestamp(raw)?;
    // The local wall-clock time must be representable too, or `to_offset` panics.
    let local_seconds = seconds.checked_add(i64::from(zone.offset().whole_seconds()));
    if local_seconds.map_or(true, |s| OffsetDateTime::from_unix_timestamp(s).is_err()) {
        return Err(malformed(TimestampPart::Seconds, raw));
    }
    let total = i128::from(seconds) * 1_000_000_000 + i128::from(nanos);
    let instant = OffsetDateTime::from_unix_timestamp_nanos(total)
        .map_err(|_| malformed(TimestampPart::Seconds, raw))?;
    Ok(instant.to_offset(zone.offset()))
}

fn malformed(part: TimestampPart, raw: &str) -> ArchiveError {
    ArchiveError::MalformedTimestamp {
        part,
        raw: raw.to_string(),
    }
}

/// Half-open interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeKey {
    begin: OffsetDateTime,
    end: OffsetDateTime,
}

impl TimeKey {
    pub fn new(begin: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { begin, end }
    }

    /// The calendar day containing `instant`, as seen from `zone`.
    pub fn of_day(instant: OffsetDateTime, zone: ArchiveZone) -> Self {
        Self::of_date(instant.to_offset(zone.offset()).date(), zone)
    }

    pub fn of_date(date: Date, zone: ArchiveZone) -> Self {
        let begin = midnight(date, zone);
        let end = date
            .next_day()
            .map(|next| midnight(next, zone))
            .unwrap_or(begin);
        Self { begin, end }
    }

    pub fn of_month(year: i32, month: Month, zone: ArchiveZone) -> Option<Self> {
        let first = Date::from_calendar_date(year, month, 1).ok()?;
        let next = match month {
            Month::December => Date::from_calendar_date(year + 1, Month::January, 1).ok(),
            _ => Date::from_calendar_date(year, month.next(), 1).ok(),
        };
        let begin = midnight(first, zone);
        let end = next.map(|d| midnight(d, zone)).unwrap_or(begin);
        Some(Self { begin, end })
    }

    pub fn begin(&self) -> OffsetDateTime {
        self.begin
    }

    pub fn end(&self) -> OffsetDateTime {
        self.end
    }

    pub fn includes(&self, instant: OffsetDateTime) -> bool {
        self.begin <= instant && instant < self.end
    }

    /// `true` when `other` lies entirely inside this key.
    pub fn contains(&self, other: &TimeKey) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    pub fn begin_date_string(&self) -> String {
        DateKey::from_date(self.begin.date()).to_string()
    }
}

fn midnight(date: Date, zone: ArchiveZone) -> OffsetDateTime {
    date.with_time(Time::MIDNIGHT).assume_offset(zone.offset())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl DateKey {
    pub fn of(instant: OffsetDateTime, zone: ArchiveZone) -> Self {
        Self::from_date(instant.to_offset(zone.offset()).date())
    }

    pub fn from_date(date: Date) -> Self {
        Self {
            year: date.year(),
            month: u8::from(date.month()),
            day: date.day(),
        }
    }

    pub fn includes(&self, instant: OffsetDateTime, zone: ArchiveZone) -> bool {
        Self::of(instant, zone) == *self
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}
