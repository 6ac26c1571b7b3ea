//! Working-day arithmetic over weekly masks and date exceptions.
//!
//! Every scheduling computation in the engine goes through [`WorkCalendar`]:
//! a weekday mask (which days of the week are worked) plus a set of exception
//! dates (holidays, non-working blocks, approved time-off). All operations
//! are pure and day-precise; no timezone arithmetic happens here or anywhere
//! downstream.
//!
//! Two distinct conventions coexist and must not be mixed up:
//!
//! - **Duration arithmetic** ([`WorkCalendar::add_working_days`] /
//!   [`WorkCalendar::subtract_working_days`]) is inclusive of the start day:
//!   a task of duration 1 finishes on the day it starts.
//! - **Offset arithmetic** ([`WorkCalendar::offset_working_days`]) is
//!   exclusive stepping, used for dependency lag: an offset of +1 is the next
//!   working day, -1 the previous one.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CalendarException, TimeOff, TimeOffStatus};

/// Calendar-domain failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    /// A date string could not be parsed as ISO `YYYY-MM-DD`.
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// The weekday mask is empty; no working day can ever be found.
    #[error("calendar has no working days")]
    NoWorkingDays,
}

// ============================================================================
// WeekdaySet
// ============================================================================

/// A set of weekdays encoded as a 7-bit mask (bit 0 = Sunday .. bit 6 = Saturday).
///
/// Serializes as a list of day numbers so stored calendars stay readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Sunday through Thursday (the default work week for this engine).
    pub const fn sun_thu() -> Self {
        Self(0b0001_1111)
    }

    /// Monday through Friday.
    pub const fn mon_fri() -> Self {
        Self(0b0011_1110)
    }

    /// Build from day numbers, 0 = Sunday .. 6 = Saturday. Out-of-range
    /// values are ignored.
    pub fn from_days(days: &[u8]) -> Self {
        let mut set = Self::empty();
        for &day in days {
            set.insert(day);
        }
        set
    }

    /// Add a day number (0 = Sunday .. 6 = Saturday).
    pub fn insert(&mut self, day: u8) {
        if day < 7 {
            self.0 |= 1 << day;
        }
    }

    /// Membership by `chrono` weekday.
    pub fn contains(self, weekday: Weekday) -> bool {
        self.contains_day(weekday.num_days_from_sunday() as u8)
    }

    /// Membership by day number.
    pub fn contains_day(self, day: u8) -> bool {
        day < 7 && self.0 & (1 << day) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Day numbers in ascending order.
    pub fn days(self) -> Vec<u8> {
        (0..7u8).filter(|&d| self.contains_day(d)).collect()
    }
}

impl Default for WeekdaySet {
    fn default() -> Self {
        Self::sun_thu()
    }
}

impl From<Vec<u8>> for WeekdaySet {
    fn from(days: Vec<u8>) -> Self {
        Self::from_days(&days)
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(set: WeekdaySet) -> Self {
        set.days()
    }
}

// ============================================================================
// WorkCalendar
// ============================================================================

/// Weekly work-day mask plus a set of non-working exception dates.
///
/// Construction validates that the mask is non-empty, which makes every
/// walking operation total: the exception set is finite, so a working day is
/// always reachable in bounded steps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkCalendar {
    work_days: WeekdaySet,
    exceptions: BTreeSet<NaiveDate>,
}

impl WorkCalendar {
    pub fn new(
        work_days: WeekdaySet,
        exceptions: impl IntoIterator<Item = NaiveDate>,
    ) -> Result<Self, CalendarError> {
        if work_days.is_empty() {
            return Err(CalendarError::NoWorkingDays);
        }
        Ok(Self {
            work_days,
            exceptions: exceptions.into_iter().collect(),
        })
    }

    /// Project calendar: the project's weekday mask plus its calendar
    /// exceptions expanded to individual dates.
    pub fn for_project(
        work_days: WeekdaySet,
        exceptions: &[CalendarException],
    ) -> Result<Self, CalendarError> {
        Self::new(work_days, expand_exceptions(exceptions))
    }

    /// Per-member calendar: the member's own weekday mask when known
    /// (otherwise the project's), with the member's approved time-off layered
    /// on top of the project exceptions.
    pub fn for_member(
        project_days: WeekdaySet,
        member_days: Option<WeekdaySet>,
        exceptions: &[CalendarException],
        time_off: &[TimeOff],
        member_id: &str,
    ) -> Result<Self, CalendarError> {
        let mask = member_days.filter(|m| !m.is_empty()).unwrap_or(project_days);
        let mut dates: BTreeSet<NaiveDate> = expand_exceptions(exceptions).collect();
        for entry in time_off {
            if entry.team_member_id == member_id && entry.status == TimeOffStatus::Approved {
                dates.extend(date_range(entry.start_date, entry.end_date));
            }
        }
        Self::new(mask, dates)
    }

    pub fn work_days(&self) -> WeekdaySet {
        self.work_days
    }

    pub fn exceptions(&self) -> &BTreeSet<NaiveDate> {
        &self.exceptions
    }

    /// A date is working iff its weekday is in the mask and it is not an
    /// exception date.
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.work_days.contains(date.weekday()) && !self.exceptions.contains(&date)
    }

    /// The first working day at or after `date`.
    pub fn next_working_day(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        while !self.is_working_day(current) {
            current += TimeDelta::days(1);
        }
        current
    }

    /// The first working day at or before `date`.
    pub fn previous_working_day(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        while !self.is_working_day(current) {
            current -= TimeDelta::days(1);
        }
        current
    }

    /// Inclusive finish date for a task of length `duration` starting on
    /// `start`: the start is first snapped forward to a working day, and a
    /// duration of 0 or 1 finishes on that same day.
    pub fn add_working_days(&self, start: NaiveDate, duration: i64) -> NaiveDate {
        let mut current = self.next_working_day(start);
        if duration <= 1 {
            return current;
        }
        let mut counted = 1;
        while counted < duration {
            current += TimeDelta::days(1);
            if self.is_working_day(current) {
                counted += 1;
            }
        }
        current
    }

    /// Symmetric backward operation: the inclusive start date for a task of
    /// length `duration` finishing on `end`.
    pub fn subtract_working_days(&self, end: NaiveDate, duration: i64) -> NaiveDate {
        let mut current = self.previous_working_day(end);
        if duration <= 1 {
            return current;
        }
        let mut counted = 1;
        while counted < duration {
            current -= TimeDelta::days(1);
            if self.is_working_day(current) {
                counted += 1;
            }
        }
        current
    }

    /// Signed exclusive stepping: move `offset` working days forward
    /// (positive) or backward (negative). Zero returns the input unchanged.
    pub fn offset_working_days(&self, date: NaiveDate, offset: i64) -> NaiveDate {
        let step = if offset >= 0 { 1 } else { -1 };
        let mut remaining = offset.abs();
        let mut current = date;
        while remaining > 0 {
            current += TimeDelta::days(step);
            if self.is_working_day(current) {
                remaining -= 1;
            }
        }
        current
    }

    /// Signed count of working days strictly after `start` up to and
    /// including `end`; zero for the same day, negative when `end < start`.
    pub fn working_days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        if start == end {
            return 0;
        }
        let (from, to, sign) = if end > start {
            (start, end, 1)
        } else {
            (end, start, -1)
        };
        let mut current = from;
        let mut count = 0;
        while current < to {
            current += TimeDelta::days(1);
            if self.is_working_day(current) {
                count += 1;
            }
        }
        sign * count
    }
}

/// Parse an ISO `YYYY-MM-DD` date as the record store serializes them.
pub fn parse_iso_date(value: &str) -> Result<NaiveDate, CalendarError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CalendarError::InvalidDate(value.to_string()))
}

/// Expand project calendar exceptions (single dates or ranges) to dates.
fn expand_exceptions(exceptions: &[CalendarException]) -> impl Iterator<Item = NaiveDate> + '_ {
    exceptions
        .iter()
        .flat_map(|e| date_range(e.date, e.end_date.unwrap_or(e.date)))
}

fn date_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let mut current = Some(start);
    std::iter::from_fn(move || {
        let date = current?;
        if date > end {
            current = None;
            return None;
        }
        current = date.succ_opt();
        Some(date)
    })
}
