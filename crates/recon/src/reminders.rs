//! Reminders for schools that have not submitted data for a period.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::period::ReportingPeriod;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    pub school: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivers reminders (outbox file, mail relay).
pub trait Notifier {
    type Error: fmt::Display;

    fn send(&mut self, reminder: &Reminder) -> Result<(), Self::Error>;
}

pub fn subject(period: &ReportingPeriod) -> String {
    format!(
        "Reminder: Submit Attendance Data for {} {}",
        period.month_name(),
        period.academic_year
    )
}

fn body(school: &str, period: &ReportingPeriod) -> String {
    format!(
        "Dear Admin,\n\n\
         This is a gentle reminder to submit the attendance data for **{school}** \
         for the month of {} ({}).\n\n\
         Thank you.",
        period.month_name(),
        period.academic_year
    )
}

/// One reminder per configured school (name → admin e-mail) with no stored
/// data for `period`, ordered by school name.
pub fn plan_reminders(
    period: &ReportingPeriod,
    schools: &BTreeMap<String, String>,
    schools_with_data: &BTreeSet<String>,
) -> Vec<Reminder> {
    schools
        .iter()
        .filter(|(school, _)| !schools_with_data.contains(school.as_str()))
        .map(|(school, to)| Reminder {
            school: school.clone(),
            to: to.clone(),
            subject: subject(period),
            body: body(school, period),
        })
        .collect()
}

/// Outcome of handing reminders to a notifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: Vec<String>,
}

/// Send every reminder; a failure is logged and recorded, not fatal.
pub fn dispatch<N: Notifier>(notifier: &mut N, reminders: &[Reminder]) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    for reminder in reminders {
        match notifier.send(reminder) {
            Ok(()) => {
                log::info!("reminder queued for {} <{}>", reminder.school, reminder.to);
                summary.sent += 1;
            }
            Err(e) => {
                log::error!("reminder for {} failed: {e}", reminder.school);
                summary.failed.push(reminder.school.clone());
            }
        }
    }
    summary
}
