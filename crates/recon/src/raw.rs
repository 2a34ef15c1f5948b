//! Raw batch intake: JSON objects from the source API to [`RawRecord`]s.

use serde_json::{Map, Value};

use crate::error::ReconError;
use crate::model::RawRecord;

/// A decoded batch plus the number of array elements that were not objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub records: Vec<RawRecord>,
    pub skipped: usize,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Array elements seen in the payload, objects or not.
    pub fn entries(&self) -> usize {
        self.records.len() + self.skipped
    }
}

impl From<Vec<RawRecord>> for RawBatch {
    fn from(records: Vec<RawRecord>) -> Self {
        Self { records, skipped: 0 }
    }
}

/// How a source payload maps onto [`RawRecord`]s.
///
/// Feeds differ in which keys carry the two day counters and in whether the
/// envelope must report success before its data is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intake {
    /// Payload key read into `working_days`.
    pub working_days_field: String,
    /// Payload key read into `present_days`.
    pub present_days_field: String,
    /// Only accept an envelope whose `status[0].message` is `SUCCESS`.
    pub require_success_status: bool,
}

impl Default for Intake {
    fn default() -> Self {
        Self {
            working_days_field: "no_of_working_days".into(),
            present_days_field: "no_of_present_days".into(),
            require_success_status: false,
        }
    }
}

impl Intake {
    /// The SWPTM feed: meeting counts in place of day counts, and a status
    /// block in the envelope.
    pub fn swptm() -> Self {
        Self {
            working_days_field: "total_no_of_swptm".into(),
            present_days_field: "present_swptm".into(),
            require_success_status: true,
        }
    }

    /// Decode a source payload. Accepts a bare array or a `{"data": [...]}`
    /// envelope; an envelope without a `data` array is an empty batch.
    pub fn parse(&self, value: &Value) -> Result<RawBatch, ReconError> {
        if self.require_success_status && !reports_success(value) {
            let status = value.get("status").map(Value::to_string);
            log::warn!(
                "source status is not SUCCESS ({}); treating as empty batch",
                status.as_deref().unwrap_or("missing")
            );
            return Ok(RawBatch::default());
        }

        let items = match value {
            Value::Array(items) => items,
            Value::Object(obj) => match obj.get("data") {
                Some(Value::Array(items)) => items,
                _ => {
                    log::info!("response envelope has no data array; treating as empty batch");
                    return Ok(RawBatch::default());
                }
            },
            other => {
                return Err(ReconError::Batch(format!(
                    "expected an array or an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let mut batch = RawBatch::default();
        for (idx, item) in items.iter().enumerate() {
            match item {
                Value::Object(obj) => batch.records.push(self.raw_record(obj)),
                other => {
                    log::warn!("batch element {idx} is {} not an object; skipped", json_kind(other));
                    batch.skipped += 1;
                }
            }
        }
        Ok(batch)
    }

    /// Decode a payload from its JSON text.
    pub fn parse_str(&self, input: &str) -> Result<RawBatch, ReconError> {
        let value: Value =
            serde_json::from_str(input).map_err(|e| ReconError::Batch(e.to_string()))?;
        self.parse(&value)
    }

    fn raw_record(&self, obj: &Map<String, Value>) -> RawRecord {
        let field = |key: &str| obj.get(key).and_then(text);
        RawRecord {
            school: field("school_name"),
            grade_label: field("grade_name"),
            division_label: field("division_name"),
            course_name: field("course_name"),
            student_id: field("student_id"),
            student_name: field("student_name"),
            gender: field("gender"),
            date: field("date"),
            working_days: field(&self.working_days_field),
            present_days: field(&self.present_days_field),
            attendance_percentage: field("attendance_percentage"),
        }
    }
}

/// `{"status": [{"message": "SUCCESS"}, ...], ...}`
fn reports_success(value: &Value) -> bool {
    value
        .get("status")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|first| first.get("message"))
        .and_then(Value::as_str)
        == Some("SUCCESS")
}

/// Decode a payload with the default field names.
pub fn parse_batch(value: &Value) -> Result<RawBatch, ReconError> {
    Intake::default().parse(value)
}

/// Decode a payload from its JSON text with the default field names.
pub fn parse_batch_str(input: &str) -> Result<RawBatch, ReconError> {
    Intake::default().parse_str(input)
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
