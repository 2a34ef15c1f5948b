//! Duplicate resolution among new candidates.
//!
//! Rows are visited best first: highest attendance percentage, then batch
//! order on an exact tie. A row survives unless an earlier survivor already
//! holds its natural identity or its identity key. So each natural identity
//! keeps at most one row, no two survivors share a key, and a row is only
//! dropped in favour of a survivor with at least its percentage.

use std::collections::{HashMap, HashSet};

use crate::config::GroupColumn;
use crate::model::{AttendanceRecord, DedupReport, DuplicateGroup, DuplicateReason, RowRef};

/// Value of one grouping column on a record.
pub fn column_value(record: &AttendanceRecord, column: GroupColumn) -> &str {
    match column {
        GroupColumn::StudentId => &record.student_id,
        GroupColumn::StudentName => &record.student_name,
        GroupColumn::Gender => record.gender.as_str(),
        GroupColumn::School => &record.school,
        GroupColumn::GradeLabel => &record.grade_label,
        GroupColumn::DivisionLabel => &record.division_label,
        GroupColumn::CourseName => &record.course_name,
    }
}

/// Natural-identity tuple in `group_by` order.
pub fn natural_identity(record: &AttendanceRecord, group_by: &[GroupColumn]) -> Vec<String> {
    group_by.iter().map(|col| column_value(record, *col).to_string()).collect()
}

/// A group of dropped rows and the survivor that displaced them.
struct Displaced {
    reason: DuplicateReason,
    key: Vec<String>,
    kept: usize,
    dropped: Vec<usize>,
}

/// Resolve duplicates. Survivors keep their batch order.
pub fn resolve(
    records: Vec<AttendanceRecord>,
    group_by: &[GroupColumn],
) -> (Vec<AttendanceRecord>, DedupReport) {
    // Stable: equal percentages keep batch order, so the first wins.
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|a, b| {
        records[*b]
            .attendance_percentage
            .total_cmp(&records[*a].attendance_percentage)
    });

    let mut identity_holder: HashMap<Vec<String>, usize> = HashMap::new();
    let mut key_holder: HashMap<String, usize> = HashMap::new();
    let mut keep = HashSet::new();
    let mut groups: Vec<Displaced> = Vec::new();
    let mut group_of: HashMap<(DuplicateReason, usize), usize> = HashMap::new();

    for row in order {
        let record = &records[row];
        let identity = natural_identity(record, group_by);
        let displaced_by = match identity_holder.get(&identity) {
            Some(&kept) => Some((DuplicateReason::NaturalIdentity, identity.clone(), kept)),
            None => key_holder.get(&record.identity_key).map(|&kept| {
                (DuplicateReason::IdentityKeyCollision, vec![record.identity_key.clone()], kept)
            }),
        };
        match displaced_by {
            None => {
                keep.insert(row);
                identity_holder.insert(identity, row);
                key_holder.insert(record.identity_key.clone(), row);
            }
            Some((reason, key, kept)) => {
                let g = *group_of.entry((reason, kept)).or_insert_with(|| {
                    groups.push(Displaced { reason, key, kept, dropped: Vec::new() });
                    groups.len() - 1
                });
                groups[g].dropped.push(row);
            }
        }
    }

    // Report groups in survivor batch order, natural identity first.
    groups.sort_by_key(|g| (g.kept, g.reason == DuplicateReason::IdentityKeyCollision));
    let mut report = DedupReport::default();
    for group in groups {
        let kept = RowRef::of(&records[group.kept]);
        let dropped: Vec<RowRef> =
            group.dropped.iter().map(|row| RowRef::of(&records[*row])).collect();

        log::info!(
            "duplicate group [{}] ({:?}): kept {} ({}%), dropped {}",
            group.key.join(", "),
            group.reason,
            kept.identity_key,
            kept.attendance_percentage,
            dropped
                .iter()
                .map(|d| format!("{} ({}%)", d.identity_key, d.attendance_percentage))
                .collect::<Vec<_>>()
                .join(", ")
        );

        report.dropped += dropped.len();
        report.groups.push(DuplicateGroup { reason: group.reason, key: group.key, kept, dropped });
    }

    let records = records
        .into_iter()
        .enumerate()
        .filter_map(|(row, record)| keep.contains(&row).then_some(record))
        .collect();
    (records, report)
}
