//! Field normalizers: raw source values to canonical forms.
//!
//! Every function here is total. Values that cannot be canonicalized are
//! passed through (trimmed) and reported as an [`Anomaly`] instead of
//! failing the record.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::NormalizeConfig;
use crate::model::{Anomaly, AttendanceRecord, Gender, RawRecord, RecordAnomaly};
use crate::period::ReportingPeriod;

static ROMAN_GRADE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^GRADE\s+([IVXLCDM]+)$").expect("valid regex"));
static ARABIC_GRADE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^GRADE\s+(\d+)$").expect("valid regex"));
static ALPHA_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+").expect("valid regex"));

const ROMAN_NUMERALS: [(&str, &str); 12] = [
    ("I", "1"),
    ("II", "2"),
    ("III", "3"),
    ("IV", "4"),
    ("V", "5"),
    ("VI", "6"),
    ("VII", "7"),
    ("VIII", "8"),
    ("IX", "9"),
    ("X", "10"),
    ("XI", "11"),
    ("XII", "12"),
];

// ---------------------------------------------------------------------------
// Config-free normalizers
// ---------------------------------------------------------------------------

/// Collapse whitespace runs, trim, title-case.
///
/// Letters whose case mapping is not a single char (`ß`, `ﬁ`, `İ`) are kept
/// as written, so a second pass never sees a different string.
pub fn normalize_name(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut prev_is_letter = false;
    for ch in collapsed.chars() {
        if ch.is_alphabetic() {
            if prev_is_letter {
                out.push(single_char(ch, ch.to_lowercase()));
            } else {
                out.push(single_char(ch, ch.to_uppercase()));
            }
            prev_is_letter = true;
        } else {
            out.push(ch);
            prev_is_letter = false;
        }
    }
    out
}

fn single_char(ch: char, mut mapped: impl Iterator<Item = char>) -> char {
    match (mapped.next(), mapped.next()) {
        (Some(c), None) => c,
        _ => ch,
    }
}

/// First run of ASCII letters, or the trimmed input when there is none.
pub fn normalize_division(raw: &str) -> String {
    match ALPHA_RUN.find(raw) {
        Some(m) => m.as_str().to_string(),
        None => raw.trim().to_string(),
    }
}

/// `DD/MM/YYYY` to `YYYY-MM-DD`. Already-canonical dates pass through.
/// Anything else comes back trimmed, with an [`Anomaly::InvalidDate`].
pub fn normalize_date(raw: &str) -> (String, Option<Anomaly>) {
    let value = raw.trim();
    if let Some(date) = parse_day_month_year(value) {
        return (date.format("%Y-%m-%d").to_string(), None);
    }
    if parse_iso(value).is_some() {
        return (value.to_string(), None);
    }
    log::error!("invalid date format: {raw:?}");
    (value.to_string(), Some(Anomaly::InvalidDate { value: raw.to_string() }))
}

fn parse_day_month_year(value: &str) -> Option<NaiveDate> {
    let parts = digit_parts(value, '/', [2, 2, 4])?;
    NaiveDate::from_ymd_opt(parts[2] as i32, parts[1], parts[0])
}

fn parse_iso(value: &str) -> Option<NaiveDate> {
    let parts = digit_parts(value, '-', [4, 2, 2])?;
    NaiveDate::from_ymd_opt(parts[0] as i32, parts[1], parts[2])
}

/// Split on `sep` into exactly three all-digit parts of the given widths.
fn digit_parts(value: &str, sep: char, widths: [usize; 3]) -> Option<[u32; 3]> {
    let mut out = [0u32; 3];
    let mut parts = value.split(sep);
    for (slot, width) in out.iter_mut().zip(widths) {
        let part = parts.next()?;
        if part.len() != width || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Non-negative whole number. Integral decimals (`"20.0"`) are accepted.
pub fn parse_count(field: &str, raw: &str) -> (u32, Option<Anomaly>) {
    let value = raw.trim();
    if let Ok(n) = value.parse::<u32>() {
        return (n, None);
    }
    if let Ok(f) = value.parse::<f64>() {
        if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
            return (f as u32, None);
        }
    }
    log::warn!("invalid number in {field}: {raw:?}; using 0");
    (0, Some(Anomaly::InvalidNumber { field: field.to_string(), value: raw.to_string() }))
}

/// Finite float, optional trailing `%`.
pub fn parse_percentage(raw: &str) -> (f64, Option<Anomaly>) {
    let value = raw.trim();
    let value = value.strip_suffix('%').unwrap_or(value).trim_end();
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() => (f, None),
        _ => {
            log::warn!("invalid number in attendance_percentage: {raw:?}; using 0");
            let anomaly = Anomaly::InvalidNumber {
                field: "attendance_percentage".into(),
                value: raw.to_string(),
            };
            (0.0, Some(anomaly))
        }
    }
}

fn count(field: &str, value: &Option<String>, found: &mut Vec<Anomaly>) -> u32 {
    match value {
        Some(v) => {
            let (n, anomaly) = parse_count(field, v);
            found.extend(anomaly);
            n
        }
        None => {
            found.push(Anomaly::MissingField { field: field.to_string() });
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Configured normalizer
// ---------------------------------------------------------------------------

/// Normalizer with its synonym tables compiled for lookup.
#[derive(Debug, Clone)]
pub struct Normalizer {
    placeholder: String,
    round_attendance: bool,
    male: HashSet<String>,
    female: HashSet<String>,
    /// Squashed variant -> canonical token.
    grade_aliases: HashMap<String, String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&NormalizeConfig::default())
    }
}

fn squash(value: &str) -> String {
    value
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| *c != '.' && *c != ' ')
        .collect()
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        let lowered =
            |values: &[String]| values.iter().map(|v| v.trim().to_lowercase()).collect::<HashSet<_>>();

        let mut grade_aliases = HashMap::new();
        for alias in &config.grade_aliases {
            let canonical = alias.canonical.trim().to_uppercase();
            for variant in &alias.variants {
                grade_aliases.entry(squash(variant)).or_insert_with(|| canonical.clone());
            }
            grade_aliases.entry(squash(&canonical)).or_insert_with(|| canonical.clone());
        }

        // Canonical tokens always map to themselves.
        let mut male = lowered(&config.gender.male);
        male.insert("m".into());
        let mut female = lowered(&config.gender.female);
        female.insert("f".into());

        Self {
            placeholder: config.placeholder.clone(),
            round_attendance: config.round_attendance,
            male,
            female,
            grade_aliases,
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Canonical grade token: alias table, then `GRADE <n>`, then uppercase.
    pub fn grade(&self, raw: &str) -> String {
        if let Some(canonical) = self.grade_aliases.get(&squash(raw)) {
            return canonical.clone();
        }

        let upper = raw.trim().to_uppercase();
        if let Some(caps) = ROMAN_GRADE.captures(&upper) {
            let token = &caps[1];
            let number = ROMAN_NUMERALS
                .iter()
                .find(|(roman, _)| *roman == token)
                .map(|(_, arabic)| *arabic)
                .unwrap_or(token);
            return format!("GRADE {number}");
        }
        if let Some(caps) = ARABIC_GRADE.captures(&upper) {
            let digits = caps[1].trim_start_matches('0');
            let number = if digits.is_empty() { "0" } else { digits };
            return format!("GRADE {number}");
        }
        upper
    }

    /// `M`, `F`, or the trimmed raw value with an anomaly.
    pub fn gender(&self, raw: &str) -> (Gender, Option<Anomaly>) {
        let key = raw.trim().to_lowercase();
        if self.male.contains(&key) {
            (Gender::Male, None)
        } else if self.female.contains(&key) {
            (Gender::Female, None)
        } else {
            log::warn!("unrecognized gender value: {raw:?}; keeping as is");
            let anomaly = Anomaly::UnrecognizedGender { value: raw.to_string() };
            (Gender::Unrecognized(raw.trim().to_string()), Some(anomaly))
        }
    }

    /// Normalize one raw record into a record for `period`. The identity
    /// key is left empty.
    pub fn record(&self, raw: &RawRecord, period: &ReportingPeriod) -> (AttendanceRecord, Vec<Anomaly>) {
        let mut anomalies = Vec::new();
        let found = &mut anomalies;

        let school = self.text("school", &raw.school, found, |v| v.to_string());
        let grade_label = self.text("grade_label", &raw.grade_label, found, |v| self.grade(v));
        let division_label =
            self.text("division_label", &raw.division_label, found, normalize_division);
        let course_name = self.text("course_name", &raw.course_name, found, |v| v.to_string());
        let student_id = self.text("student_id", &raw.student_id, found, |v| v.to_string());
        let student_name = self.text("student_name", &raw.student_name, found, normalize_name);

        let gender = match &raw.gender {
            Some(v) => {
                let (gender, anomaly) = self.gender(v);
                found.extend(anomaly);
                gender
            }
            None => {
                found.push(Anomaly::MissingField { field: "gender".into() });
                Gender::Unrecognized(self.placeholder.clone())
            }
        };

        let date = match &raw.date {
            Some(v) => {
                let (date, anomaly) = normalize_date(v);
                found.extend(anomaly);
                date
            }
            None => {
                found.push(Anomaly::MissingField { field: "date".into() });
                self.placeholder.clone()
            }
        };

        let working_days = count("working_days", &raw.working_days, found);
        let present_days = count("present_days", &raw.present_days, found);

        let mut attendance_percentage = match &raw.attendance_percentage {
            Some(v) => {
                let (pct, anomaly) = parse_percentage(v);
                found.extend(anomaly);
                pct
            }
            None => {
                found.push(Anomaly::MissingField { field: "attendance_percentage".into() });
                0.0
            }
        };
        if self.round_attendance {
            attendance_percentage = attendance_percentage.round();
        }

        let record = AttendanceRecord {
            school,
            grade_label,
            division_label,
            course_name,
            student_id,
            student_name,
            academic_year: period.academic_year.to_string(),
            gender,
            month: period.month_name().to_string(),
            date,
            working_days,
            present_days,
            attendance_percentage,
            identity_key: String::new(),
        };
        (record, anomalies)
    }

    /// Present text runs through `f` and is trimmed; missing text becomes
    /// the placeholder untouched.
    fn text(
        &self,
        field: &str,
        value: &Option<String>,
        found: &mut Vec<Anomaly>,
        f: impl Fn(&str) -> String,
    ) -> String {
        match value {
            Some(v) => f(v).trim().to_string(),
            None => {
                log::debug!("missing field {field}; using placeholder");
                found.push(Anomaly::MissingField { field: field.to_string() });
                self.placeholder.clone()
            }
        }
    }

    /// Normalize a whole batch, tagging anomalies with their batch row.
    pub fn batch(
        &self,
        raw: &[RawRecord],
        period: &ReportingPeriod,
    ) -> (Vec<AttendanceRecord>, Vec<RecordAnomaly>) {
        let mut records = Vec::with_capacity(raw.len());
        let mut anomalies = Vec::new();
        for (row, item) in raw.iter().enumerate() {
            let (record, found) = self.record(item, period);
            anomalies.extend(found.into_iter().map(|anomaly| RecordAnomaly { row, anomaly }));
            records.push(record);
        }
        (records, anomalies)
    }
}
