use std::collections::HashSet;

use crate::model::AttendanceRecord;

/// Records whose identity key is absent from `existing`, in batch order.
///
/// Consults nothing but `identity_key`; retained records are moved out
/// untouched.
pub fn filter_new(records: Vec<AttendanceRecord>, existing: &HashSet<String>) -> Vec<AttendanceRecord> {
    records
        .into_iter()
        .filter(|record| !existing.contains(&record.identity_key))
        .collect()
}
