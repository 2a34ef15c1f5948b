//! Attendance feeds.
//!
//! The monthly attendance feed and the daily SWPTM feed run through the
//! same pipeline. A [`Dataset`] holds everything that differs between them:
//! payload field names, target table, academic-year boundary, default
//! period and write mode.

use chrono::{Month, NaiveDate};

use crate::engine::RunMode;
use crate::error::ReconError;
use crate::period::{ReportingPeriod, MONTHLY_YEAR_START, SWPTM_YEAR_START};
use crate::raw::Intake;

pub const MONTHLY_TABLE: &str = "student_attendance_data";
pub const SWPTM_TABLE: &str = "swptm_attendance_data";

/// Period a run covers when none is given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPeriod {
    /// The calendar month before today.
    PreviousMonth,
    /// The month in progress.
    CurrentMonth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub name: String,
    pub intake: Intake,
    /// SQL table the feed is stored in.
    pub table: String,
    pub year_start: Month,
    pub default_period: DefaultPeriod,
    pub mode: RunMode,
}

impl Dataset {
    /// Monthly attendance: previous month, May year start, insert-only.
    pub fn monthly() -> Self {
        Self {
            name: "monthly".into(),
            intake: Intake::default(),
            table: MONTHLY_TABLE.into(),
            year_start: MONTHLY_YEAR_START,
            default_period: DefaultPeriod::PreviousMonth,
            mode: RunMode::Incremental,
        }
    }

    /// Daily SWPTM refresh: current month, June year start, insert-or-update.
    pub fn swptm() -> Self {
        Self {
            name: "swptm".into(),
            intake: Intake::swptm(),
            table: SWPTM_TABLE.into(),
            year_start: SWPTM_YEAR_START,
            default_period: DefaultPeriod::CurrentMonth,
            mode: RunMode::Refresh,
        }
    }

    pub fn period_for(&self, today: NaiveDate) -> ReportingPeriod {
        match self.default_period {
            DefaultPeriod::PreviousMonth => {
                ReportingPeriod::previous_month_from(today, self.year_start)
            }
            DefaultPeriod::CurrentMonth => ReportingPeriod::containing_from(today, self.year_start),
        }
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if !is_valid_table_name(&self.table) {
            return Err(ReconError::ConfigValidation(format!(
                "{}: table '{}' must be letters, digits and '_', not starting with a digit",
                self.name, self.table
            )));
        }
        for (what, field) in [
            ("working_days_field", &self.intake.working_days_field),
            ("present_days_field", &self.intake.present_days_field),
        ] {
            if field.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "{}: {what} must not be empty",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// A bare SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
