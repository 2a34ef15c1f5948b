//! Reporting periods: academic year + calendar month.
//!
//! The monthly feed's academic year runs May through April: a month in
//! January–April belongs to the academic year that started the previous
//! May. The SWPTM feed starts its year in June.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Month, NaiveDate};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::ReconError;

/// First calendar month of an academic year for the monthly feed.
pub const MONTHLY_YEAR_START: Month = Month::May;

/// First calendar month of an academic year for the SWPTM feed.
pub const SWPTM_YEAR_START: Month = Month::June;

/// Academic year identified by the calendar year it starts in.
/// Renders as `YYYY-YYYY+1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcademicYear(i32);

impl AcademicYear {
    pub fn starting(year: i32) -> Self {
        Self(year)
    }

    pub fn start_year(&self) -> i32 {
        self.0
    }

    /// Academic year containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self::containing_from(date, MONTHLY_YEAR_START)
    }

    /// Academic year containing `date` when years begin in `first_month`.
    pub fn containing_from(date: NaiveDate, first_month: Month) -> Self {
        if date.month() < first_month.number_from_month() {
            Self(date.year() - 1)
        } else {
            Self(date.year())
        }
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.0, self.0 + 1)
    }
}

impl FromStr for AcademicYear {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ReconError::AcademicYear(s.to_string());
        let (first, second) = s.trim().split_once('-').ok_or_else(err)?;
        let is_year = |part: &str| part.len() == 4 && part.bytes().all(|b| b.is_ascii_digit());
        if !is_year(first) || !is_year(second) {
            return Err(err());
        }
        let start: i32 = first.parse().map_err(|_| err())?;
        let end: i32 = second.parse().map_err(|_| err())?;
        if end != start + 1 {
            return Err(err());
        }
        Ok(Self(start))
    }
}

impl Serialize for AcademicYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a month name ("March", "mar", " MARCH ").
pub fn parse_month(s: &str) -> Result<Month, ReconError> {
    Month::from_str(s.trim()).map_err(|_| ReconError::Month(s.to_string()))
}

/// Months in academic order: May … December, January … April.
pub fn academic_months() -> [Month; 12] {
    [
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
        Month::January,
        Month::February,
        Month::March,
        Month::April,
    ]
}

/// One reporting period: the unit of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportingPeriod {
    pub academic_year: AcademicYear,
    pub month: Month,
}

impl ReportingPeriod {
    pub fn new(academic_year: AcademicYear, month: Month) -> Self {
        Self { academic_year, month }
    }

    /// Parse from `("2024-2025", "March")`.
    pub fn parse(academic_year: &str, month: &str) -> Result<Self, ReconError> {
        Ok(Self {
            academic_year: academic_year.parse()?,
            month: parse_month(month)?,
        })
    }

    /// The period for the calendar month before `today`.
    pub fn previous_month(today: NaiveDate) -> Self {
        Self::previous_month_from(today, MONTHLY_YEAR_START)
    }

    /// The period for the calendar month before `today` when years begin
    /// in `first_month`.
    pub fn previous_month_from(today: NaiveDate, first_month: Month) -> Self {
        let first_of_month = today.with_day(1).unwrap_or(today);
        let prev = first_of_month.pred_opt().unwrap_or(first_of_month);
        Self::containing_from(prev, first_month)
    }

    /// The period `date` falls in.
    pub fn containing(date: NaiveDate) -> Self {
        Self::containing_from(date, MONTHLY_YEAR_START)
    }

    /// The period `date` falls in when years begin in `first_month`.
    pub fn containing_from(date: NaiveDate, first_month: Month) -> Self {
        let month = Month::try_from(date.month() as u8).unwrap_or(Month::January);
        Self {
            academic_year: AcademicYear::containing_from(date, first_month),
            month,
        }
    }

    /// Full English month name, as stored on records.
    pub fn month_name(&self) -> &'static str {
        self.month.name()
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month.name(), self.academic_year)
    }
}

impl Serialize for ReportingPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ReportingPeriod", 2)?;
        s.serialize_field("academic_year", &self.academic_year)?;
        s.serialize_field("month", self.month.name())?;
        s.end()
    }
}

/// Every period from the academic year starting in `start_year` through the
/// academic year starting in `today`'s calendar year, in academic order.
pub fn backfill_periods(start_year: i32, today: NaiveDate) -> Vec<ReportingPeriod> {
    let mut periods = Vec::new();
    for year in start_year..=today.year() {
        let academic_year = AcademicYear::starting(year);
        for month in academic_months() {
            periods.push(ReportingPeriod::new(academic_year, month));
        }
    }
    periods
}
