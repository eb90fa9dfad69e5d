use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

pub type RoomId = i64;
pub type RestrictionId = i64;
pub type ReservationId = i64;

/// Half-open night range `[start, end)`. `end` is the checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!(
                "start date {start} must be before end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The single night starting on `day`.
    pub fn one_night(day: NaiveDate) -> Result<Self, EngineError> {
        let end = day
            .succ_opt()
            .ok_or_else(|| EngineError::Validation(format!("no day after {day}")))?;
        Ok(Self { start: day, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        intersects(self.start, self.end, other.start, other.end)
    }

    pub fn contains_night(&self, night: NaiveDate) -> bool {
        self.start <= night && night < self.end
    }
}

/// Strict on both sides: a stay ending on day D does not collide with one starting on D.
pub fn intersects(a_start: NaiveDate, a_end: NaiveDate, b_start: NaiveDate, b_end: NaiveDate) -> bool {
    a_start < b_end && b_start < a_end
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Occupancy backing a confirmed reservation.
    Reservation { reservation_id: ReservationId },
    /// Owner-imposed one-night closure, no reservation behind it.
    ManualBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub span: DateSpan,
    pub kind: RestrictionKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Restriction {
    /// Reservation id, or 0 for a manual block.
    pub fn reservation_id(&self) -> ReservationId {
        match self.kind {
            RestrictionKind::Reservation { reservation_id } => reservation_id,
            RestrictionKind::ManualBlock => 0,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, RestrictionKind::ManualBlock)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// Store mutations, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    RoomAdded { id: RoomId, name: String },
    RestrictionInserted(Restriction),
    RestrictionDeleted { id: RestrictionId, room_id: RoomId },
    /// Id high-water marks, written first by compaction so deleted ids are never reissued.
    NextIds { room: RoomId, restriction: RestrictionId },
}

// ── Day keys ─────────────────────────────────────────────────────

/// Canonical grid key: `YYYY-MM-D` (month zero-padded, day not).
pub fn day_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{}", date.year(), date.month(), date.day())
}

/// Parse a day key, accepting only the canonical form produced by [`day_key`].
pub fn parse_day_key(key: &str) -> Result<NaiveDate, EngineError> {
    let invalid = || EngineError::Validation(format!("invalid day key: {key:?}"));
    let mut parts = key.splitn(3, '-');
    let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let month: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let day: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
    if day_key(date) != key {
        return Err(invalid());
    }
    Ok(date)
}

// ── Calendar months ──────────────────────────────────────────────

/// A calendar month, stored as its first day so it is always valid.
/// Serialized as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarMonth {
    first: NaiveDate,
}

impl CalendarMonth {
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    /// Month from the `y` / `m` query parameters of the calendar page.
    pub fn from_query(year: i32, month: u32) -> Result<Self, EngineError> {
        use crate::limits::*;
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(EngineError::Validation(format!("year {year} out of range")));
        }
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::Validation(format!("invalid month {month}")))?;
        Ok(Self { first })
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn days_in_month(&self) -> u32 {
        match self.first.checked_add_months(Months::new(1)) {
            Some(next) => (next - self.first).num_days() as u32,
            // December of the last year chrono can represent.
            None => 31,
        }
    }

    pub fn last_day(&self) -> NaiveDate {
        self.first.with_day(self.days_in_month()).unwrap_or(self.first)
    }

    /// Every night of the month as a half-open span `[first, first of next month)`.
    pub fn window(&self) -> DateSpan {
        let last = self.last_day();
        DateSpan::new(self.first, last.succ_opt().unwrap_or(last))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.first.iter_days().take(self.days_in_month() as usize)
    }

    pub fn previous(&self) -> Option<Self> {
        self.first.pred_opt().map(Self::containing)
    }

    pub fn next(&self) -> Option<Self> {
        self.last_day().succ_opt().map(Self::containing)
    }
}

impl TryFrom<String> for CalendarMonth {
    type Error = EngineError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let invalid = || EngineError::Validation(format!("invalid month: {raw:?}"));
        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        if month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::from_query(year, month)
    }
}

impl From<CalendarMonth> for String {
    fn from(month: CalendarMonth) -> Self {
        month.to_string()
    }
}

impl std::fmt::Display for CalendarMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}
