use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Everything the pure engine needs: synonym tables and grouping columns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    /// Literal written into text fields that are missing from the source.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Round attendance percentages to the nearest integer.
    #[serde(default)]
    pub round_attendance: bool,
    #[serde(default)]
    pub gender: GenderSynonyms,
    #[serde(default = "default_grade_aliases")]
    pub grade_aliases: Vec<GradeAlias>,
}

fn default_placeholder() -> String {
    "NA".into()
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            placeholder: default_placeholder(),
            round_attendance: false,
            gender: GenderSynonyms::default(),
            grade_aliases: default_grade_aliases(),
        }
    }
}

/// Lower-cased synonym sets for the two canonical gender tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct GenderSynonyms {
    pub male: Vec<String>,
    pub female: Vec<String>,
}

impl Default for GenderSynonyms {
    fn default() -> Self {
        Self {
            male: strings(&["male", "m", "man", "boy", "masculine"]),
            female: strings(&["female", "f", "woman", "girl", "feminine"]),
        }
    }
}

/// A canonical grade token and the squashed spellings that map to it.
///
/// Variants are compared after upper-casing and removing `.` and spaces,
/// so `"Jr. KG"`, `"jr kg"` and `"JRKG"` all hit the variant `JRKG`.
#[derive(Debug, Clone, Deserialize)]
pub struct GradeAlias {
    pub canonical: String,
    pub variants: Vec<String>,
}

fn default_grade_aliases() -> Vec<GradeAlias> {
    vec![
        GradeAlias {
            canonical: "NURSERY".into(),
            variants: strings(&["NURSERY", "NURSARY", "NURSRY", "NURSEY", "NURSERRRY", "NUR"]),
        },
        GradeAlias {
            canonical: "JR.KG".into(),
            variants: strings(&["JRKG", "JRKGCLASS", "JRKGKIDS", "JRKINDERGARTEN"]),
        },
        GradeAlias {
            canonical: "SR.KG".into(),
            variants: strings(&["SRKG", "SRKGCLASS", "SRKGKIDS", "SRKINDERGARTEN"]),
        },
    ]
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Duplicate resolution
// ---------------------------------------------------------------------------

/// Record field usable as part of the natural-identity grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum GroupColumn {
    StudentId,
    StudentName,
    Gender,
    School,
    GradeLabel,
    DivisionLabel,
    CourseName,
}

impl GroupColumn {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StudentId => "student_id",
            Self::StudentName => "student_name",
            Self::Gender => "gender",
            Self::School => "school",
            Self::GradeLabel => "grade_label",
            Self::DivisionLabel => "division_label",
            Self::CourseName => "course_name",
        }
    }
}

impl fmt::Display for GroupColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GroupColumn {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "student_id" => Ok(Self::StudentId),
            "student_name" => Ok(Self::StudentName),
            "gender" => Ok(Self::Gender),
            "school" | "school_name" => Ok(Self::School),
            "grade_label" | "grade_name" => Ok(Self::GradeLabel),
            "division_label" | "division_name" => Ok(Self::DivisionLabel),
            "course_name" => Ok(Self::CourseName),
            other => Err(ReconError::UnknownColumn(other.to_string())),
        }
    }
}

impl TryFrom<String> for GroupColumn {
    type Error = ReconError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_group_by")]
    pub group_by: Vec<GroupColumn>,
}

fn default_group_by() -> Vec<GroupColumn> {
    vec![
        GroupColumn::StudentId,
        GroupColumn::StudentName,
        GroupColumn::Gender,
        GroupColumn::School,
    ]
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { group_by: default_group_by() }
    }
}

impl DedupConfig {
    /// Coarser grouping used by the yearly backfill: id + name only.
    pub fn yearly() -> Self {
        Self {
            group_by: vec![GroupColumn::StudentId, GroupColumn::StudentName],
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        self.normalize.validate()?;
        self.dedup.validate()
    }
}

impl NormalizeConfig {
    pub fn validate(&self) -> Result<(), ReconError> {
        if self.placeholder.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "normalize.placeholder must not be empty".into(),
            ));
        }

        let male: HashSet<String> =
            self.gender.male.iter().map(|v| v.trim().to_lowercase()).collect();
        if let Some(both) = self
            .gender
            .female
            .iter()
            .map(|v| v.trim().to_lowercase())
            .find(|v| male.contains(v))
        {
            return Err(ReconError::ConfigValidation(format!(
                "gender synonym '{both}' is listed as both male and female"
            )));
        }

        for alias in &self.grade_aliases {
            if alias.canonical.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "grade alias with empty canonical token".into(),
                ));
            }
            if alias.variants.is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "grade alias '{}' has no variants",
                    alias.canonical
                )));
            }
        }

        Ok(())
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), ReconError> {
        if self.group_by.is_empty() {
            return Err(ReconError::ConfigValidation(
                "dedup.group_by must name at least one column".into(),
            ));
        }
        let mut seen = HashSet::new();
        for col in &self.group_by {
            if !seen.insert(*col) {
                return Err(ReconError::ConfigValidation(format!(
                    "dedup.group_by lists '{col}' more than once"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
