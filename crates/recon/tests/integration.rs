use std::collections::HashSet;
use std::path::PathBuf;

use rollcall_recon::config::{DedupConfig, EngineConfig};
use rollcall_recon::model::{Anomaly, DuplicateReason, Gender};
use rollcall_recon::raw::{parse_batch_str, RawBatch};
use rollcall_recon::{reconcile, ReportingPeriod};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_batch(name: &str) -> RawBatch {
    let path = fixtures_dir().join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    parse_batch_str(&text).unwrap()
}

fn march() -> ReportingPeriod {
    ReportingPeriod::parse("2024-2025", "March").unwrap()
}

// -------------------------------------------------------------------------
// Intake + Normalization
// -------------------------------------------------------------------------

#[test]
fn fixture_batch_decodes() {
    let batch = load_batch("march_batch.json");
    assert_eq!(batch.len(), 5);
    assert_eq!(batch.skipped, 1);
}

#[test]
fn records_are_normalized_and_stamped_with_period() {
    let batch = load_batch("march_batch.json");
    let result = reconcile(&EngineConfig::default(), &march(), &batch, &HashSet::new());

    // GV-1001 collapses to the GRADE 5 row (95.45 > 81.82).
    assert_eq!(result.records.len(), 4);
    let asha = &result.records[0];
    assert_eq!(asha.student_name, "Asha Rao");
    assert_eq!(asha.grade_label, "GRADE 5");
    assert_eq!(asha.division_label, "B");
    assert_eq!(asha.gender, Gender::Female);
    assert_eq!(asha.date, "2025-03-31");
    assert_eq!(asha.academic_year, "2024-2025");
    assert_eq!(asha.month, "March");
    assert_eq!(asha.identity_key, "2024-2025|March|Green Valley School|GRADE 5|GV-1001");

    let kabir = &result.records[1];
    assert_eq!(kabir.grade_label, "JR.KG");
    assert_eq!(kabir.division_label, "Rose");
    assert_eq!(kabir.student_name, "Kabir Singh");
    assert_eq!(kabir.date, "03/31/2025");

    let meera = &result.records[2];
    assert_eq!(meera.grade_label, "NURSERY");
    assert_eq!(meera.course_name, "NA");
    assert_eq!(meera.gender, Gender::Unrecognized("Other".into()));
}

#[test]
fn anomalies_are_reported_with_rows() {
    let batch = load_batch("march_batch.json");
    let result = reconcile(&EngineConfig::default(), &march(), &batch, &HashSet::new());

    let found: Vec<(usize, &Anomaly)> =
        result.anomalies.iter().map(|a| (a.row, &a.anomaly)).collect();
    assert!(found.contains(&(2, &Anomaly::InvalidDate { value: "03/31/2025".into() })));
    assert!(found.contains(&(3, &Anomaly::MissingField { field: "course_name".into() })));
    assert!(found.contains(&(3, &Anomaly::UnrecognizedGender { value: "Other".into() })));
    assert_eq!(found.len(), 3);
}

// -------------------------------------------------------------------------
// Filter + Dedup
// -------------------------------------------------------------------------

#[test]
fn existing_keys_are_filtered_before_dedup() {
    let batch = load_batch("march_batch.json");
    // The higher row for GV-1001 is already stored: the lower one becomes
    // the only candidate for that student and survives.
    let existing: HashSet<String> =
        ["2024-2025|March|Green Valley School|GRADE 5|GV-1001".to_string()].into();
    let result = reconcile(&EngineConfig::default(), &march(), &batch, &existing);

    assert_eq!(result.stats.new_candidates, 4);
    assert_eq!(result.stats.duplicates_removed, 0);
    assert_eq!(result.records[0].grade_label, "GRADE 4");
    assert_eq!(result.records[0].attendance_percentage, 81.82);
}

#[test]
fn dedup_report_lists_kept_and_dropped() {
    let batch = load_batch("march_batch.json");
    let result = reconcile(&EngineConfig::default(), &march(), &batch, &HashSet::new());

    assert_eq!(result.dedup.dropped, 1);
    let group = &result.dedup.groups[0];
    assert_eq!(group.reason, DuplicateReason::NaturalIdentity);
    assert_eq!(group.key, vec!["GV-1001", "Asha Rao", "F", "Green Valley School"]);
    assert_eq!(group.kept.attendance_percentage, 95.45);
    assert_eq!(group.dropped.len(), 1);
    assert_eq!(group.dropped[0].identity_key, "2024-2025|March|Green Valley School|GRADE 4|GV-1001");
}

#[test]
fn stats_account_for_every_record() {
    let batch = load_batch("march_batch.json");
    let existing: HashSet<String> = [
        "2024-2025|March|Lakeside Academy|GRADE 2|LA-20".to_string(),
        "2023-2024|March|Lakeside Academy|GRADE 2|LA-20".to_string(),
    ]
    .into();
    let result = reconcile(&EngineConfig::default(), &march(), &batch, &existing);
    let stats = &result.stats;

    // Five objects plus one non-object entry.
    assert_eq!(stats.records_fetched, 6);
    assert_eq!(stats.records_after_cleaning, 5);
    assert_eq!(stats.existing_keys_in_store, 2);
    assert_eq!(stats.new_candidates, 4);
    assert_eq!(stats.duplicates_removed, 1);
    assert_eq!(result.records.len(), stats.new_candidates - stats.duplicates_removed);
}

#[test]
fn yearly_preset_with_rounding() {
    let config = EngineConfig::from_toml(
        r#"
[normalize]
round_attendance = true

[dedup]
group_by = ["student_id", "student_name"]
"#,
    )
    .unwrap();
    assert_eq!(config.dedup, DedupConfig::yearly());

    let batch = load_batch("march_batch.json");
    let result = reconcile(&config, &march(), &batch, &HashSet::new());
    assert_eq!(result.records[0].attendance_percentage, 95.0);
    assert_eq!(result.records.len(), 4);
}

#[test]
fn reconcile_is_deterministic() {
    let batch = load_batch("march_batch.json");
    let a = reconcile(&EngineConfig::default(), &march(), &batch, &HashSet::new());
    let b = reconcile(&EngineConfig::default(), &march(), &batch, &HashSet::new());
    assert_eq!(a.records, b.records);
    assert_eq!(a.dedup, b.dedup);
    assert_eq!(a.stats, b.stats);
}
