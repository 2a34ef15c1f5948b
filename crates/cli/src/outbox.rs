//! Reminder outbox: one JSON object per line, appended.
//!
//! A mail relay (or an operator) drains the file; nothing here talks SMTP.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use rollcall_recon::reminders::{Notifier, Reminder};
use rollcall_recon::ReportingPeriod;
use serde::Serialize;

#[derive(Serialize)]
struct OutboxLine<'a> {
    period: &'a ReportingPeriod,
    queued_at: String,
    #[serde(flatten)]
    reminder: &'a Reminder,
}

pub struct OutboxNotifier {
    path: PathBuf,
    period: ReportingPeriod,
}

impl OutboxNotifier {
    pub fn new(path: &Path, period: ReportingPeriod) -> Self {
        Self { path: path.to_path_buf(), period }
    }
}

impl Notifier for OutboxNotifier {
    type Error = std::io::Error;

    fn send(&mut self, reminder: &Reminder) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let line = OutboxLine {
            period: &self.period,
            queued_at: chrono::Local::now().to_rfc3339(),
            reminder,
        };
        let json = serde_json::to_string(&line)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{json}")
    }
}
