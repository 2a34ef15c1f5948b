use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (empty grouping, conflicting synonyms, etc.).
    ConfigValidation(String),
    /// Grouping column name not recognized.
    UnknownColumn(String),
    /// Academic year not in `YYYY-YYYY+1` form.
    AcademicYear(String),
    /// Month name not recognized.
    Month(String),
    /// Raw batch could not be decoded.
    Batch(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::UnknownColumn(col) => write!(f, "unknown grouping column: '{col}'"),
            Self::AcademicYear(value) => {
                write!(f, "invalid academic year '{value}' (expected YYYY-YYYY, e.g. 2024-2025)")
            }
            Self::Month(value) => write!(f, "invalid month '{value}' (expected a full month name)"),
            Self::Batch(msg) => write!(f, "invalid batch: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
