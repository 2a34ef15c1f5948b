// Integration tests for the `rollcall` binary.
// Run with: cargo test -p rollcall-cli --test cli

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use httpmock::prelude::*;
use rollcall_recon::AttendanceStore;
use rollcall_store::SqliteStore;

const FIXTURE: &str = "tests/fixtures/march_batch.json";
const SWPTM_FIXTURE: &str = "tests/fixtures/swptm_batch.json";

fn rollcall(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rollcall"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    // Clear env to avoid leaking a real key or config into tests
    cmd.env_remove("ROLLCALL_API_KEY");
    cmd.env_remove("ROLLCALL_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd.arg("--config").arg(config);
    cmd
}

fn write_config(dir: &Path, api_url: &str) -> PathBuf {
    let path = dir.join("rollcall.toml");
    let text = format!(
        r#"
[api]
url = "{api_url}"

[store]
path = "attendance.db"

[reminders]
outbox = "reminders.jsonl"

[reminders.schools]
"Green Valley School" = "office@greenvalley.example"
"Hillcrest High" = "admin@hillcrest.example"

[logging]
dir = "logs"
level = "warn"
"#
    );
    std::fs::write(&path, text).unwrap();
    path
}

fn run_march(config: &Path, extra: &[&str]) -> Output {
    rollcall(config)
        .args(["run", "--academic-year", "2024-2025", "--month", "March"])
        .args(extra)
        .output()
        .expect("failed to run rollcall")
}

fn assert_exit(output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "expected exit {code}, got {:?}\nstderr: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr),
    );
}

#[test]
fn validate_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let output = rollcall(&config).arg("validate").output().unwrap();
    assert_exit(&output, 0);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("config ok"), "stdout: {stdout}");
    assert!(stdout.contains("student_id, student_name, gender, school"), "stdout: {stdout}");
}

#[test]
fn invalid_config_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollcall.toml");
    std::fs::write(&path, "[api]\nurl = \"https://x.example\"\n[dedup]\ngroup_by = [\"shoe_size\"]\n").unwrap();
    let output = rollcall(&path).arg("validate").output().unwrap();
    assert_exit(&output, 3);
    assert!(String::from_utf8_lossy(&output.stderr).contains("shoe_size"));
}

#[test]
fn missing_config_exits_3_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let output = rollcall(&dir.path().join("nope.toml")).arg("validate").output().unwrap();
    assert_exit(&output, 3);
    assert!(String::from_utf8_lossy(&output.stderr).contains("hint:"));
}

#[test]
fn half_a_period_is_rejected_by_clap() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let output = rollcall(&config).args(["run", "--month", "March"]).output().unwrap();
    assert_exit(&output, 2);
}

#[test]
fn missing_api_key_exits_50() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let output = run_march(&config, &[]);
    assert_exit(&output, 50);
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing attendance API key"));
}

#[test]
fn repeated_runs_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");

    let first = run_march(&config, &["--input", FIXTURE, "--no-remind"]);
    assert_exit(&first, 0);
    let stderr = String::from_utf8_lossy(&first.stderr);
    assert!(stderr.contains("records fetched:        6"), "stderr: {stderr}");
    assert!(stderr.contains("duplicates removed:     1"), "stderr: {stderr}");
    assert!(stderr.contains("inserted:               4"), "stderr: {stderr}");
    assert!(dir.path().join("attendance.db").exists());

    // The lower-attendance GV-1001 row was dropped, not stored, so it is new
    // on the next run; after that the batch is fully known.
    let second = run_march(&config, &["--input", FIXTURE, "--no-remind"]);
    assert_exit(&second, 0);
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("existing in store:      4"), "stderr: {stderr}");
    assert!(stderr.contains("inserted:               1"), "stderr: {stderr}");

    let third = run_march(&config, &["--input", FIXTURE, "--no-remind"]);
    assert_exit(&third, 0);
    let stderr = String::from_utf8_lossy(&third.stderr);
    assert!(stderr.contains("existing in store:      5"), "stderr: {stderr}");
    assert!(stderr.contains("new candidates:         0"), "stderr: {stderr}");
    assert!(stderr.contains("inserted:               0"), "stderr: {stderr}");
}

#[test]
fn dry_run_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let output = run_march(&config, &["--input", FIXTURE, "--dry-run", "--json"]);
    assert_exit(&output, 0);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outcome"]["status"], "dry_run");
    assert_eq!(report["period"]["academic_year"], "2024-2025");
    assert_eq!(report["period"]["month"], "March");
    assert_eq!(report["stats"]["new_candidates"], 5);
    assert_eq!(report["stats"]["inserted"], 0);
    assert_eq!(report["records"].as_array().unwrap().len(), 4);
    assert_eq!(report["anomalies"].as_array().unwrap().len(), 3);

    // Nothing written, no reminders for a dry run.
    assert!(!dir.path().join("reminders.jsonl").exists());
}

#[test]
fn csv_output_has_final_records() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let out = dir.path().join("march.csv");
    let output = run_march(&config, &["--input", FIXTURE, "--no-remind", "--out", out.to_str().unwrap()]);
    assert_exit(&output, 0);

    let text = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("school_name,grade_name,"));
    assert!(text.contains("Asha Rao"));
    assert!(text.contains("95.45"));
    assert!(!text.contains("81.82"));
}

#[test]
fn run_queues_reminders_for_schools_without_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let output = run_march(&config, &["--input", FIXTURE]);
    assert_exit(&output, 0);

    let outbox = std::fs::read_to_string(dir.path().join("reminders.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = outbox.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["school"], "Hillcrest High");
    assert_eq!(lines[0]["subject"], "Reminder: Submit Attendance Data for March 2024-2025");
}

#[test]
fn remind_uses_stored_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    assert_exit(&run_march(&config, &["--input", FIXTURE, "--no-remind"]), 0);

    let remind = |month: &str| {
        rollcall(&config)
            .args(["remind", "--academic-year", "2024-2025", "--month", month])
            .output()
            .unwrap()
    };
    // March has Green Valley data; April has none.
    assert_exit(&remind("March"), 0);
    assert_exit(&remind("April"), 0);

    let outbox = std::fs::read_to_string(dir.path().join("reminders.jsonl")).unwrap();
    let schools: Vec<String> = outbox
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["school"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(schools, ["Hillcrest High", "Green Valley School", "Hillcrest High"]);
}

#[test]
fn run_against_api() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/attendance")
            .query_param("api-key", "k-test")
            .query_param("academic_year", "2024-2025")
            .query_param("month_name", "March");
        then.status(200)
            .header("content-type", "application/json")
            .body(std::fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join(FIXTURE)).unwrap());
    });

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server.url("/api/attendance"));
    let output = rollcall(&config)
        .args(["run", "--academic-year", "2024-2025", "--month", "March", "--no-remind"])
        .env("ROLLCALL_API_KEY", "k-test")
        .output()
        .unwrap();

    assert_exit(&output, 0);
    mock.assert();
    assert!(String::from_utf8_lossy(&output.stderr).contains("inserted:               4"));
}

#[test]
fn api_auth_failure_exits_51() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/attendance");
        then.status(401).body("invalid api key");
    });

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server.url("/api/attendance"));
    let output = run_march(&config, &["--api-key", "wrong"]);
    assert_exit(&output, 51);
    assert!(String::from_utf8_lossy(&output.stderr).contains("auth failed"));
    assert!(!dir.path().join("reminders.jsonl").exists());
}

#[test]
fn run_writes_weekly_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let output = run_march(&config, &["--input", FIXTURE, "--no-remind"]);
    assert_exit(&output, 0);

    let logs: Vec<String> = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("_week"), "{logs:?}");
    assert!(logs[0].ends_with(".log"));
    // The invalid date in the fixture is logged at warn or above.
    let text = std::fs::read_to_string(dir.path().join("logs").join(&logs[0])).unwrap();
    assert!(text.contains("03/31/2025"), "log: {text}");
}

fn with_swptm_section(config: &Path, swptm_url: &str) {
    let mut text = std::fs::read_to_string(config).unwrap();
    text.push_str(&format!("\n[swptm]\nurl = \"{swptm_url}\"\n"));
    std::fs::write(config, text).unwrap();
}

fn run_swptm_march(config: &Path, extra: &[&str]) -> Output {
    rollcall(config)
        .args(["swptm", "--academic-year", "2024-2025", "--month", "March"])
        .args(extra)
        .output()
        .expect("failed to run rollcall")
}

#[test]
fn swptm_refreshes_its_own_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    with_swptm_section(&config, "https://sis.example.org/api/swptm");

    let first = run_swptm_march(&config, &["--input", SWPTM_FIXTURE]);
    assert_exit(&first, 0);
    let stderr = String::from_utf8_lossy(&first.stderr);
    assert!(stderr.contains("(refresh)"), "stderr: {stderr}");
    assert!(stderr.contains("records fetched:        3"), "stderr: {stderr}");
    assert!(stderr.contains("inserted:               3"), "stderr: {stderr}");
    assert!(stderr.contains("updated:                0"), "stderr: {stderr}");

    let second = run_swptm_march(&config, &["--input", SWPTM_FIXTURE]);
    assert_exit(&second, 0);
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("inserted:               0"), "stderr: {stderr}");
    assert!(stderr.contains("updated:                3"), "stderr: {stderr}");

    let db = dir.path().join("attendance.db");
    let swptm = SqliteStore::open_table(&db, "swptm_attendance_data").unwrap();
    assert_eq!(swptm.existing_identity_keys().unwrap().len(), 3);
    let monthly = SqliteStore::open(&db).unwrap();
    assert!(monthly.existing_identity_keys().unwrap().is_empty());
    // No reminders for the SWPTM feed.
    assert!(!dir.path().join("reminders.jsonl").exists());
}

#[test]
fn swptm_without_success_status_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    with_swptm_section(&config, "https://sis.example.org/api/swptm");
    let batch = dir.path().join("failed.json");
    let text = std::fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join(SWPTM_FIXTURE))
        .unwrap()
        .replace("\"SUCCESS\"", "\"FAILED\"");
    std::fs::write(&batch, text).unwrap();

    let output = run_swptm_march(&config, &["--input", batch.to_str().unwrap()]);
    assert_exit(&output, 0);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("inserted:               0"), "stderr: {stderr}");
}

#[test]
fn swptm_against_api() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/swptm")
            .query_param("api-key", "k-test")
            .query_param("academic_year", "2024-2025")
            .query_param("month_name", "March");
        then.status(200)
            .header("content-type", "application/json")
            .body(std::fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join(SWPTM_FIXTURE)).unwrap());
    });

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server.url("/api/attendance"));
    with_swptm_section(&config, &server.url("/api/swptm"));
    let output = run_swptm_march(&config, &["--api-key", "k-test"]);

    assert_exit(&output, 0);
    mock.assert();
    assert!(String::from_utf8_lossy(&output.stderr).contains("inserted:               3"));
}

#[test]
fn swptm_without_section_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "https://sis.example.org/api/attendance");
    let output = run_swptm_march(&config, &["--input", SWPTM_FIXTURE]);
    assert_exit(&output, 3);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[swptm]"), "stderr: {stderr}");
}
