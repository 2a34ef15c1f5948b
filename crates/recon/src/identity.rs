use crate::model::AttendanceRecord;

/// `academic_year|month|school|grade_label|student_id`.
pub fn identity_key(
    academic_year: &str,
    month: &str,
    school: &str,
    grade_label: &str,
    student_id: &str,
) -> String {
    format!("{academic_year}|{month}|{school}|{grade_label}|{student_id}")
}

/// Key derived from a normalized record's own fields.
pub fn derive_key(record: &AttendanceRecord) -> String {
    identity_key(
        &record.academic_year,
        &record.month,
        &record.school,
        &record.grade_label,
        &record.student_id,
    )
}

/// Attach the identity key to every record.
pub fn attach_keys(records: &mut [AttendanceRecord]) {
    for record in records.iter_mut() {
        record.identity_key = derive_key(record);
    }
}
