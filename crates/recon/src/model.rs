use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::period::ReportingPeriod;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One source entry with every field still optional and untrimmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub school: Option<String>,
    pub grade_label: Option<String>,
    pub division_label: Option<String>,
    pub course_name: Option<String>,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub gender: Option<String>,
    pub date: Option<String>,
    pub working_days: Option<String>,
    pub present_days: Option<String>,
    pub attendance_percentage: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalized record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    /// Source value that matched neither synonym table, kept verbatim.
    Unrecognized(String),
}

impl Gender {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl Gender {
    /// Inverse of [`Gender::as_str`]: `M`/`F` or anything else verbatim.
    pub fn from_token(token: &str) -> Self {
        match token {
            "M" => Self::Male,
            "F" => Self::Female,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Gender {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One student's attendance for one reporting period, after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub school: String,
    pub grade_label: String,
    pub division_label: String,
    pub course_name: String,
    pub student_id: String,
    pub student_name: String,
    pub academic_year: String,
    pub gender: Gender,
    pub month: String,
    /// `YYYY-MM-DD` when the source date parsed, otherwise the source text.
    pub date: String,
    pub working_days: u32,
    pub present_days: u32,
    pub attendance_percentage: f64,
    /// Empty until the identity key is attached.
    pub identity_key: String,
}

impl AttendanceRecord {
    /// The calendar date, if normalization produced a canonical one.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    UnrecognizedGender { value: String },
    InvalidDate { value: String },
    MissingField { field: String },
    InvalidNumber { field: String, value: String },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedGender { value } => write!(f, "unrecognized gender value: {value:?}"),
            Self::InvalidDate { value } => write!(f, "invalid date format: {value:?}"),
            Self::MissingField { field } => write!(f, "missing field: {field}"),
            Self::InvalidNumber { field, value } => write!(f, "invalid number in {field}: {value:?}"),
        }
    }
}

/// An anomaly tied to the batch position of the record it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordAnomaly {
    pub row: usize,
    #[serde(flatten)]
    pub anomaly: Anomaly,
}

// ---------------------------------------------------------------------------
// Duplicate resolution report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Same natural identity (grouping columns).
    NaturalIdentity,
    /// Different natural identity but the same identity key.
    IdentityKeyCollision,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowRef {
    pub identity_key: String,
    pub attendance_percentage: f64,
}

impl RowRef {
    pub fn of(record: &AttendanceRecord) -> Self {
        Self {
            identity_key: record.identity_key.clone(),
            attendance_percentage: record.attendance_percentage,
        }
    }
}

/// One resolved group of conflicting submissions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub reason: DuplicateReason,
    /// Grouping values in `group_by` order (or the identity key).
    pub key: Vec<String>,
    pub kept: RowRef,
    pub dropped: Vec<RowRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupReport {
    pub groups: Vec<DuplicateGroup>,
    pub dropped: usize,
}

// ---------------------------------------------------------------------------
// Persistence outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Inserted,
    /// Refresh mode only: the row existed and was overwritten.
    Updated,
    SkippedDuplicateAtStore,
    Errored,
}

// ---------------------------------------------------------------------------
// Stats + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationStats {
    pub records_fetched: usize,
    pub records_after_cleaning: usize,
    pub existing_keys_in_store: usize,
    pub new_candidates: usize,
    pub duplicates_removed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped_as_duplicate_at_store: usize,
    pub errored: usize,
    pub elapsed_seconds: f64,
}

impl ReconciliationStats {
    /// Fold one persistence outcome into the counters.
    pub fn record_outcome(&mut self, outcome: PersistOutcome) {
        match outcome {
            PersistOutcome::Inserted => self.inserted += 1,
            PersistOutcome::Updated => self.updated += 1,
            PersistOutcome::SkippedDuplicateAtStore => self.skipped_as_duplicate_at_store += 1,
            PersistOutcome::Errored => self.errored += 1,
        }
    }

    /// Rows handed to the store, whatever happened to them.
    pub fn persisted_total(&self) -> usize {
        self.inserted + self.updated + self.skipped_as_duplicate_at_store + self.errored
    }

    /// Share of handed-off rows that did not error, in percent.
    /// `None` when nothing was handed off.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.persisted_total();
        if total == 0 {
            return None;
        }
        let ok = total - self.errored;
        Some(ok as f64 / total as f64 * 100.0)
    }

    /// Inserted rows per second of elapsed time.
    pub fn insert_rate(&self) -> Option<f64> {
        if self.inserted == 0 || self.elapsed_seconds <= 0.0 {
            return None;
        }
        Some(self.inserted as f64 / self.elapsed_seconds)
    }

    /// Every new candidate is accounted for exactly once.
    pub fn is_conserved(&self) -> bool {
        self.new_candidates == self.duplicates_removed + self.persisted_total()
    }
}

/// Result of the pure reconciliation step.
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub period: ReportingPeriod,
    pub records: Vec<AttendanceRecord>,
    pub stats: ReconciliationStats,
    pub dedup: DedupReport,
    pub anomalies: Vec<RecordAnomaly>,
}
