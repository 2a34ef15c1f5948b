//! Batch sources for `rollcall run` / `rollcall backfill`.
//!
//! - `HttpSource`: one authenticated GET against the attendance or SWPTM API
//! - `FileSource`: a local JSON file standing in for the API (`--input`)
//! - `CliSource`: either of the above, remembering the last failure so the
//!   runner can map it to an exit code after the engine reports it
//! - `resolve_api_key`: flag > env > config > error

use std::path::PathBuf;
use std::time::Duration;

use rollcall_recon::{BatchSource, Intake, RawBatch, ReportingPeriod};

use crate::config::ApiConfig;
use crate::exit_codes;
use crate::CliError;

// ── Constants ───────────────────────────────────────────────────────

pub const USER_AGENT: &str = concat!("rollcall/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body echoed into messages.
const BODY_EXCERPT: usize = 200;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// 401/403 from the API.
    Auth { status: u16, message: String },
    /// 400 from the API.
    Validation { status: u16, message: String },
    /// Any other non-2xx status.
    Upstream { status: u16, message: String },
    /// Connection, TLS or timeout failure.
    Transport(String),
    /// Body is not a usable batch.
    Decode(String),
    /// `--input` file could not be read.
    Input { path: String, message: String },
}

impl FetchError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Auth { .. } => exit_codes::EXIT_FETCH_AUTH,
            Self::Validation { .. } => exit_codes::EXIT_FETCH_VALIDATION,
            Self::Upstream { .. } | Self::Transport(_) => exit_codes::EXIT_FETCH_UPSTREAM,
            Self::Decode(_) => exit_codes::EXIT_FETCH_DECODE,
            Self::Input { .. } => exit_codes::EXIT_USAGE,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth { status, message } => write!(f, "attendance API auth failed ({status}): {message}"),
            Self::Validation { status, message } => {
                write!(f, "attendance API rejected the request ({status}): {message}")
            }
            Self::Upstream { status, message } => write!(f, "attendance API error ({status}): {message}"),
            Self::Transport(msg) => write!(f, "attendance API unreachable: {msg}"),
            Self::Decode(msg) => write!(f, "attendance API response unusable: {msg}"),
            Self::Input { path, message } => write!(f, "cannot read input {path}: {message}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<FetchError> for CliError {
    fn from(err: FetchError) -> Self {
        let hint = match &err {
            FetchError::Auth { .. } => Some("check the API key (--api-key or the env var named by api.key_env)".to_string()),
            FetchError::Transport(_) => Some("check api.url; api.accept_invalid_certs skips TLS verification".to_string()),
            _ => None,
        };
        CliError { code: err.exit_code(), message: err.to_string(), hint }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty body".into();
    }
    trimmed.chars().take(BODY_EXCERPT).collect()
}

// ── HttpSource ──────────────────────────────────────────────────────

pub struct HttpSource {
    http: reqwest::blocking::Client,
    url: String,
    api_key: String,
    intake: Intake,
}

impl HttpSource {
    pub fn new(api: &ApiConfig, api_key: String) -> Result<Self, CliError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(api.accept_invalid_certs)
            .build()
            .map_err(|e| CliError {
                code: exit_codes::EXIT_ERROR,
                message: format!("failed to build HTTP client: {e}"),
                hint: None,
            })?;
        if api.accept_invalid_certs {
            log::warn!("TLS certificate verification disabled for {}", api.url);
        }
        Ok(Self { http, url: api.url.clone(), api_key, intake: Intake::default() })
    }

    /// Point at another endpoint that shares `[api]`'s key and TLS settings.
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_intake(mut self, intake: Intake) -> Self {
        self.intake = intake;
        self
    }

    /// GET `<url>?api-key=..&academic_year=..&month_name=..`, no retries.
    fn get(&self, period: &ReportingPeriod) -> Result<String, FetchError> {
        let academic_year = period.academic_year.to_string();
        let resp = self
            .http
            .get(&self.url)
            .query(&[
                ("api-key", self.api_key.as_str()),
                ("academic_year", academic_year.as_str()),
                ("month_name", period.month_name()),
            ])
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp.text().map_err(|e| FetchError::Transport(format!("reading body: {e}")))?;

        match status {
            200..=299 => Ok(body),
            401 | 403 => Err(FetchError::Auth { status, message: excerpt(&body) }),
            400 => Err(FetchError::Validation { status, message: excerpt(&body) }),
            _ => Err(FetchError::Upstream { status, message: excerpt(&body) }),
        }
    }
}

impl BatchSource for HttpSource {
    type Error = FetchError;

    fn fetch_batch(&mut self, period: &ReportingPeriod) -> Result<RawBatch, FetchError> {
        log::info!("fetching attendance for {period}");
        let body = self.get(period)?;
        // Some deployments prefix the JSON with a BOM.
        let trimmed = body.trim_start_matches('\u{feff}');
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| FetchError::Decode(format!("{e} (body: {})", excerpt(trimmed))))?;
        self.intake.parse(&value).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

// ── FileSource ──────────────────────────────────────────────────────

/// Reads the same JSON batch for whatever period is asked.
pub struct FileSource {
    path: PathBuf,
    intake: Intake,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path, intake: Intake::default() }
    }

    pub fn with_intake(mut self, intake: Intake) -> Self {
        self.intake = intake;
        self
    }
}

impl BatchSource for FileSource {
    type Error = FetchError;

    fn fetch_batch(&mut self, period: &ReportingPeriod) -> Result<RawBatch, FetchError> {
        log::info!("reading attendance for {period} from {}", self.path.display());
        let text = std::fs::read_to_string(&self.path).map_err(|e| FetchError::Input {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        self.intake
            .parse_str(text.trim_start_matches('\u{feff}'))
            .map_err(|e| FetchError::Decode(format!("{}: {e}", self.path.display())))
    }
}

// ── CliSource ───────────────────────────────────────────────────────

pub enum SourceKind {
    Http(HttpSource),
    File(FileSource),
}

pub struct CliSource {
    kind: SourceKind,
    last_error: Option<FetchError>,
}

impl CliSource {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind, last_error: None }
    }

    /// The error behind the most recent failed fetch, if the last fetch failed.
    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }
}

impl BatchSource for CliSource {
    type Error = FetchError;

    fn fetch_batch(&mut self, period: &ReportingPeriod) -> Result<RawBatch, FetchError> {
        let result = match &mut self.kind {
            SourceKind::Http(source) => source.fetch_batch(period),
            SourceKind::File(source) => source.fetch_batch(period),
        };
        self.last_error = result.as_ref().err().cloned();
        result
    }
}

// ── API key ─────────────────────────────────────────────────────────

/// Resolve the API key: `--api-key` flag, then `env_var`, then `api.key`
/// from the config file.
pub fn resolve_api_key(
    flag: Option<String>,
    env_var: &str,
    config_key: Option<&str>,
) -> Result<String, CliError> {
    let missing = || CliError {
        code: exit_codes::EXIT_FETCH_NOT_AUTH,
        message: format!("missing attendance API key (use --api-key or set {env_var})"),
        hint: Some("or set api.key in rollcall.toml".to_string()),
    };

    if let Some(key) = flag {
        let trimmed = key.trim().to_string();
        if trimmed.is_empty() {
            return Err(missing());
        }
        return Ok(trimmed);
    }

    if let Ok(key) = std::env::var(env_var) {
        let trimmed = key.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }

    match config_key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(missing()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn api(url: String) -> ApiConfig {
        ApiConfig {
            url,
            key: None,
            key_env: "ROLLCALL_TEST_UNUSED".into(),
            timeout_secs: 5,
            accept_invalid_certs: false,
        }
    }

    fn period() -> ReportingPeriod {
        ReportingPeriod::parse("2024-2025", "March").unwrap()
    }

    fn source(server: &MockServer) -> HttpSource {
        HttpSource::new(&api(server.url("/api/attendance")), "k-123".into()).unwrap()
    }

    #[test]
    fn sends_key_and_period_as_query_params() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/attendance")
                .query_param("api-key", "k-123")
                .query_param("academic_year", "2024-2025")
                .query_param("month_name", "March");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "data": [
                        {"school_name": "Green Valley", "student_id": "GV-1", "attendance_percentage": 90},
                        {"school_name": "Green Valley", "student_id": "GV-2", "attendance_percentage": "85.5"}
                    ]
                }));
        });

        let batch = source(&server).fetch_batch(&period()).unwrap();
        mock.assert();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records[0].student_id.as_deref(), Some("GV-1"));
        assert_eq!(batch.records[1].attendance_percentage.as_deref(), Some("85.5"));
    }

    #[test]
    fn swptm_endpoint_and_fields() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/swptm")
                .query_param("api-key", "k-123")
                .query_param("academic_year", "2024-2025")
                .query_param("month_name", "March");
            then.status(200).json_body(serde_json::json!({
                "status": [{"message": "SUCCESS"}],
                "data": [{"student_id": "GV-1", "total_no_of_swptm": 2, "present_swptm": 1}]
            }));
        });

        let mut swptm = source(&server)
            .with_url(&server.url("/api/swptm"))
            .with_intake(Intake::swptm());
        let batch = swptm.fetch_batch(&period()).unwrap();
        mock.assert();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].working_days.as_deref(), Some("2"));
        assert_eq!(batch.records[0].present_days.as_deref(), Some("1"));
    }

    #[test]
    fn bare_array_body_is_accepted() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/attendance");
            then.status(200).body("\u{feff}[{\"student_id\": \"S1\"}]");
        });
        let batch = source(&server).fetch_batch(&period()).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn unauthorized_is_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/attendance");
            then.status(401).body("invalid api key");
        });
        let err = source(&server).fetch_batch(&period()).unwrap_err();
        assert_eq!(err, FetchError::Auth { status: 401, message: "invalid api key".into() });
        assert_eq!(err.exit_code(), exit_codes::EXIT_FETCH_AUTH);
    }

    #[test]
    fn bad_request_is_validation_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/attendance");
            then.status(400).body("{\"error\": \"unknown month\"}");
        });
        let err = source(&server).fetch_batch(&period()).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::EXIT_FETCH_VALIDATION);
        assert!(err.to_string().contains("unknown month"));
    }

    #[test]
    fn server_error_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/attendance");
            then.status(503);
        });
        let err = source(&server).fetch_batch(&period()).unwrap_err();
        mock.assert_hits(1);
        assert!(matches!(err, FetchError::Upstream { status: 503, .. }));
        assert_eq!(err.exit_code(), exit_codes::EXIT_FETCH_UPSTREAM);
    }

    #[test]
    fn non_json_body_is_decode_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/attendance");
            then.status(200).body("<html>maintenance</html>");
        });
        let err = source(&server).fetch_batch(&period()).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::EXIT_FETCH_DECODE);
        assert!(err.to_string().contains("maintenance"));
    }

    #[test]
    fn scalar_body_is_decode_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/attendance");
            then.status(200).body("42");
        });
        let err = source(&server).fetch_batch(&period()).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn cli_source_remembers_last_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/attendance");
            then.status(403).body("forbidden");
        });
        let mut cli = CliSource::new(SourceKind::Http(source(&server)));
        assert!(cli.fetch_batch(&period()).is_err());
        assert_eq!(cli.last_error().map(FetchError::exit_code), Some(exit_codes::EXIT_FETCH_AUTH));
    }

    #[test]
    fn file_source_reads_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"data": [{"student_id": "S1"}, 7]}"#).unwrap();
        let mut cli = CliSource::new(SourceKind::File(FileSource::new(path)));
        let batch = cli.fetch_batch(&period()).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.skipped, 1);
        assert!(cli.last_error().is_none());
    }

    #[test]
    fn missing_input_file_is_usage_error() {
        let mut source = FileSource::new(PathBuf::from("/nonexistent/batch.json"));
        let err = source.fetch_batch(&period()).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::EXIT_USAGE);
    }

    #[test]
    fn api_key_flag_wins() {
        let key = resolve_api_key(Some("  flag-key ".into()), "ROLLCALL_TEST_UNSET_A", Some("cfg")).unwrap();
        assert_eq!(key, "flag-key");
    }

    #[test]
    fn api_key_env_beats_config() {
        std::env::set_var("ROLLCALL_TEST_KEY_B", "env-key");
        let key = resolve_api_key(None, "ROLLCALL_TEST_KEY_B", Some("cfg")).unwrap();
        std::env::remove_var("ROLLCALL_TEST_KEY_B");
        assert_eq!(key, "env-key");
    }

    #[test]
    fn api_key_falls_back_to_config() {
        let key = resolve_api_key(None, "ROLLCALL_TEST_UNSET_C", Some("cfg-key")).unwrap();
        assert_eq!(key, "cfg-key");
    }

    #[test]
    fn missing_api_key_exits_50() {
        let err = resolve_api_key(None, "ROLLCALL_TEST_UNSET_D", None).unwrap_err();
        assert_eq!(err.code, exit_codes::EXIT_FETCH_NOT_AUTH);
        assert!(err.message.contains("ROLLCALL_TEST_UNSET_D"));

        let err = resolve_api_key(Some("   ".into()), "ROLLCALL_TEST_UNSET_D", Some("cfg")).unwrap_err();
        assert_eq!(err.code, exit_codes::EXIT_FETCH_NOT_AUTH);
    }
}
