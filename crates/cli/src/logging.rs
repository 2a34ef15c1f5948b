//! Log output for the runner.
//!
//! The library crates log through the `log` facade; the subscriber
//! installed here picks those records up and writes them to stderr and,
//! when enabled, to a weekly log file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use rollcall_recon::AcademicYear;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::CliError;

/// `<Month>_week<WW>_<academic-year>.log`, week counted from Sunday.
pub fn log_file_name(today: NaiveDate) -> String {
    format!(
        "{}_week{}_{}.log",
        today.format("%B"),
        today.format("%U"),
        AcademicYear::containing(today)
    )
}

pub fn log_file_path(dir: &Path, today: NaiveDate) -> PathBuf {
    dir.join(log_file_name(today))
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns the log file path when file output is on. A second call (tests
/// running in one process) leaves the first subscriber in place.
pub fn init(config: &LoggingConfig, today: NaiveDate) -> Result<Option<PathBuf>, CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if !config.file {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
        return Ok(None);
    }

    std::fs::create_dir_all(&config.dir).map_err(|e| {
        CliError::io(format!("cannot create log directory {}: {e}", config.dir.display()))
    })?;
    let path = log_file_path(&config.dir, today);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| CliError::io(format!("cannot open log file {}: {e}", path.display())))?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr.and(Arc::new(file)))
        .with_ansi(false)
        .with_target(false)
        .try_init();
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_uses_sunday_weeks_and_academic_year() {
        // 2025-03-31 is a Monday; the first Sunday of 2025 is Jan 5.
        let day = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        assert_eq!(log_file_name(day), "March_week13_2024-2025.log");
    }

    #[test]
    fn file_name_before_first_sunday_is_week_zero() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        assert_eq!(log_file_name(day), "January_week00_2024-2025.log");
    }

    #[test]
    fn may_starts_a_new_academic_year() {
        let day = NaiveDate::from_ymd_opt(2025, 5, 12).unwrap();
        assert!(log_file_name(day).ends_with("_2025-2026.log"));
    }
}
