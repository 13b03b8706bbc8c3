//! Calendar week arithmetic: week keys, the school-year span, and the
//! near/far classification that drives refresh cadence.
//!
//! Everything here is pure. "Today" is always passed in (directly or via a
//! [`Clock`]) so callers and tests can pin the calendar.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Number of weeks after the current one that count as "near".
pub const DEFAULT_NEAR_WEEKS_AHEAD: u32 = 2;

/// Month the school year starts in (September).
const SCHOOL_YEAR_START_MONTH: u32 = 9;

/// Return the Monday of the week containing `date`.
///
/// Sunday belongs to the week that started the previous Monday, so
/// `monday_of(sunday)` is six days earlier, never the next day.
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

// ── WeekKey ───────────────────────────────────────────────────

/// Identity of a calendar week: the date of its Monday.
///
/// Always a Monday. The canonical string form is `YYYY-MM-DD`, which is also
/// the `weekStart` value the upstream timetable endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeekKey(NaiveDate);

impl WeekKey {
    /// The week containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self(monday_of(date))
    }

    /// The Monday this key stands for.
    pub fn monday(&self) -> NaiveDate {
        self.0
    }

    /// Shift by a whole number of weeks (may be negative).
    pub fn offset(&self, weeks: i64) -> Self {
        Self(self.0 + Duration::weeks(weeks))
    }

    /// The following week.
    pub fn next(&self) -> Self {
        self.offset(1)
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for WeekKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| CoreError::InvalidWeekKey(s.to_string()))?;
        if date.weekday() != Weekday::Mon {
            return Err(CoreError::NotMonday(s.to_string()));
        }
        Ok(Self(date))
    }
}

impl TryFrom<String> for WeekKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WeekKey> for String {
    fn from(key: WeekKey) -> Self {
        key.to_string()
    }
}

// ── Buckets ───────────────────────────────────────────────────

/// Refresh class of a week relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekBucket {
    /// Current week through the configured number of weeks ahead.
    Near,
    /// Every other week (past, or further ahead).
    Far,
}

// ── Clock ─────────────────────────────────────────────────────

/// Source of "today" in local time.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the process' local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

// ── WeekWindow ────────────────────────────────────────────────

/// Week boundaries computed relative to a fixed "today".
///
/// Cheap to build; callers construct a fresh window per refresh so the
/// school-year span is recomputed rather than stored.
#[derive(Debug, Clone, Copy)]
pub struct WeekWindow {
    today: NaiveDate,
    near_weeks_ahead: u32,
}

impl WeekWindow {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            near_weeks_ahead: DEFAULT_NEAR_WEEKS_AHEAD,
        }
    }

    pub fn from_clock(clock: &dyn Clock) -> Self {
        Self::new(clock.today())
    }

    /// Override how many weeks after the current one are "near".
    pub fn with_near_weeks_ahead(mut self, weeks: u32) -> Self {
        self.near_weeks_ahead = weeks;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Monday of this week shifted by `offset_weeks`.
    pub fn week_start(&self, offset_weeks: i64) -> WeekKey {
        WeekKey::containing(self.today).offset(offset_weeks)
    }

    /// Calendar year in which the current school year began.
    ///
    /// Before September we are still in the year that began last autumn.
    pub fn school_year(&self) -> i32 {
        if self.today.month() < SCHOOL_YEAR_START_MONTH {
            self.today.year() - 1
        } else {
            self.today.year()
        }
    }

    /// Week containing September 1 of the current school year.
    ///
    /// This is the Monday on or before Sep 1, not the first Monday on or
    /// after it, so when Sep 1 is not a Monday the year starts with a late
    /// August week (2024 starts on 2024-08-26).
    pub fn school_year_start(&self) -> WeekKey {
        WeekKey::containing(ymd(self.school_year(), SCHOOL_YEAR_START_MONTH, 1))
    }

    /// Week containing June 30 of the following calendar year.
    pub fn school_year_end(&self) -> WeekKey {
        WeekKey::containing(ymd(self.school_year() + 1, 6, 30))
    }

    /// Every week of the school year, first to last inclusive.
    pub fn all_school_weeks(&self) -> SchoolWeeks {
        SchoolWeeks {
            next: Some(self.school_year_start()),
            last: self.school_year_end(),
        }
    }

    /// Near or far, relative to this window's today.
    pub fn classify(&self, week: WeekKey) -> WeekBucket {
        let current = self.week_start(0);
        let horizon = self.week_start(i64::from(self.near_weeks_ahead));
        if current <= week && week <= horizon {
            WeekBucket::Near
        } else {
            WeekBucket::Far
        }
    }

    /// Current week and the configured number of weeks ahead, in order.
    pub fn near_weeks(&self) -> Vec<WeekKey> {
        (0..=i64::from(self.near_weeks_ahead))
            .map(|offset| self.week_start(offset))
            .collect()
    }

    /// School-year weeks that are not near.
    pub fn far_weeks(&self) -> Vec<WeekKey> {
        self.all_school_weeks()
            .filter(|week| self.classify(*week) == WeekBucket::Far)
            .collect()
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    // Sep 1 and Jun 30 exist in every year.
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

/// Lazy, finite sequence of week keys stepping by seven days.
///
/// Clone it to restart from the same position.
#[derive(Debug, Clone)]
pub struct SchoolWeeks {
    next: Option<WeekKey>,
    last: WeekKey,
}

impl Iterator for SchoolWeeks {
    type Item = WeekKey;

    fn next(&mut self) -> Option<WeekKey> {
        let current = self.next?;
        if current > self.last {
            self.next = None;
            return None;
        }
        self.next = Some(current.next());
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.next {
            Some(current) if current <= self.last => {
                ((self.last.monday() - current.monday()).num_days() / 7 + 1) as usize
            }
            _ => 0,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SchoolWeeks {}
