//! Run output: the stderr summary, `--json`, and the `--out` CSV.

use std::io::Write;
use std::path::Path;

use rollcall_recon::{AttendanceRecord, RunMode, RunReport};
use serde::Serialize;

use crate::CliError;

// ── Human summary ───────────────────────────────────────────────────

/// Plain-text summary of one run, one stat per line.
pub fn summary(report: &RunReport) -> String {
    let s = &report.stats;
    let mut out = String::new();
    let mode = match report.mode {
        RunMode::Incremental => "incremental",
        RunMode::Refresh => "refresh",
    };
    out.push_str(&format!("{} ({mode}): {}\n", report.period, report.outcome));
    out.push_str(&format!("  records fetched:        {}\n", s.records_fetched));
    out.push_str(&format!("  after cleaning:         {}\n", s.records_after_cleaning));
    out.push_str(&format!("  existing in store:      {}\n", s.existing_keys_in_store));
    out.push_str(&format!("  new candidates:         {}\n", s.new_candidates));
    out.push_str(&format!("  duplicates removed:     {}\n", s.duplicates_removed));
    out.push_str(&format!("  inserted:               {}\n", s.inserted));
    if report.mode == RunMode::Refresh {
        out.push_str(&format!("  updated:                {}\n", s.updated));
    }
    out.push_str(&format!("  skipped at store:       {}\n", s.skipped_as_duplicate_at_store));
    out.push_str(&format!("  errored:                {}\n", s.errored));
    match s.success_rate() {
        Some(rate) => out.push_str(&format!("  success rate:           {rate:.2}%\n")),
        None => out.push_str("  success rate:           n/a\n"),
    }
    out.push_str(&format!("  elapsed:                {:.2}s\n", s.elapsed_seconds));
    if let Some(rate) = s.insert_rate() {
        out.push_str(&format!("  records/second:         {rate:.2}\n"));
    }
    if !report.anomalies.is_empty() {
        out.push_str(&format!("  anomalies:              {}\n", report.anomalies.len()));
        for a in &report.anomalies {
            out.push_str(&format!("    row {}: {}\n", a.row, a.anomaly));
        }
    }
    out
}

// ── CSV ─────────────────────────────────────────────────────────────

/// Column names match the store's table.
#[derive(Serialize)]
struct CsvRow<'a> {
    school_name: &'a str,
    grade_name: &'a str,
    division_name: &'a str,
    course_name: &'a str,
    student_id: &'a str,
    student_name: &'a str,
    academic_year: &'a str,
    gender: &'a str,
    month: &'a str,
    date: &'a str,
    no_of_working_days: u32,
    no_of_present_days: u32,
    attendance_percentage: f64,
    identity_key: &'a str,
}

impl<'a> From<&'a AttendanceRecord> for CsvRow<'a> {
    fn from(r: &'a AttendanceRecord) -> Self {
        Self {
            school_name: &r.school,
            grade_name: &r.grade_label,
            division_name: &r.division_label,
            course_name: &r.course_name,
            student_id: &r.student_id,
            student_name: &r.student_name,
            academic_year: &r.academic_year,
            gender: r.gender.as_str(),
            month: &r.month,
            date: &r.date,
            no_of_working_days: r.working_days,
            no_of_present_days: r.present_days,
            attendance_percentage: r.attendance_percentage,
            identity_key: &r.identity_key,
        }
    }
}

pub fn write_records_csv<W: Write>(out: W, records: &[AttendanceRecord]) -> Result<(), CliError> {
    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);
    for record in records {
        wtr.serialize(CsvRow::from(record))
            .map_err(|e| CliError::io(format!("CSV write error: {e}")))?;
    }
    if records.is_empty() {
        // serialize() writes the header with the first row only
        wtr.write_record(CSV_HEADER)
            .map_err(|e| CliError::io(format!("CSV write error: {e}")))?;
    }
    wtr.flush().map_err(|e| CliError::io(format!("CSV flush error: {e}")))?;
    Ok(())
}

const CSV_HEADER: [&str; 14] = [
    "school_name",
    "grade_name",
    "division_name",
    "course_name",
    "student_id",
    "student_name",
    "academic_year",
    "gender",
    "month",
    "date",
    "no_of_working_days",
    "no_of_present_days",
    "attendance_percentage",
    "identity_key",
];

pub fn write_records_csv_file(path: &Path, records: &[AttendanceRecord]) -> Result<(), CliError> {
    let file = std::fs::File::create(path)
        .map_err(|e| CliError::io(format!("cannot create {}: {e}", path.display())))?;
    write_records_csv(std::io::BufWriter::new(file), records)
}

pub fn write_json<W: Write, T: Serialize>(mut out: W, value: &T) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut out, value)
        .map_err(|e| CliError::io(format!("JSON write error: {e}")))?;
    writeln!(out).map_err(|e| CliError::io(e.to_string()))
}
