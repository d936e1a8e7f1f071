use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::error::AppError;

/// A calendar day, rendered as `MM-DD-YYYY` the way the portal and its users write dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    /// Builds a date from its components, rejecting days that do not exist.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;

        // from_ymd_opt already refuses Feb 30, but the components must survive a round trip.
        if date.year() != year || date.month() != month || date.day() != day {
            return None;
        }

        Some(Self(date))
    }

    /// The underlying chrono date.
    pub fn naive(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}-{:02}-{:04}",
            self.0.month(),
            self.0.day(),
            self.0.year()
        )
    }
}

impl Serialize for CalendarDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts `MM-DD-YYYY` or `MM/DD/YYYY` with one or two digit month and day.
impl FromStr for CalendarDate {
    type Err = AppError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let normalized = input.replace('/', "-");
        let format_error = || AppError::DateFormat(format!("'{}' must be in MM-DD-YYYY format", input));

        let parts: Vec<&str> = normalized.split('-').collect();
        let &[month, day, year] = parts.as_slice() else {
            return Err(format_error());
        };

        let digits = |s: &str, min: usize, max: usize| {
            (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(month, 1, 2) || !digits(day, 1, 2) || !digits(year, 4, 4) {
            return Err(format_error());
        }

        let (Ok(month), Ok(day), Ok(year)) = (month.parse::<u32>(), day.parse::<u32>(), year.parse::<i32>())
        else {
            return Err(format_error());
        };

        Self::from_ymd(year, month, day)
            .ok_or_else(|| AppError::DateFormat(format!("'{}' is not a valid date", input)))
    }
}

impl<'de> Deserialize<'de> for CalendarDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An optional inclusive window of calendar days.
///
/// An absent bound is open on that side. When both bounds are present
/// `start <= end` holds; construct ranges through
/// [`crate::services::filter::validate_range`] to keep it that way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<CalendarDate>,
    pub end: Option<CalendarDate>,
}

impl DateRange {
    /// A range with no bounds; matches every day.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whether `date` falls inside the range, both ends inclusive.
    pub fn contains(&self, date: NaiveDate) -> bool {
        if let Some(start) = self.start {
            if date < start.naive() {
                return false;
            }
        }

        if let Some(end) = self.end {
            if date > end.naive() {
                return false;
            }
        }

        true
    }
}
