//! `rollcall.toml`: application config.
//!
//! Engine sections (`[normalize]`, `[dedup]`) are the engine crate's own
//! types; everything else belongs to the runner. Relative paths resolve
//! against the directory containing the config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use rollcall_recon::config::{DedupConfig, EngineConfig, NormalizeConfig};
use rollcall_recon::dataset::{Dataset, SWPTM_TABLE};
use rollcall_recon::Intake;

use crate::exit_codes::EXIT_CONFIG;
use crate::CliError;

pub const DEFAULT_CONFIG: &str = "rollcall.toml";
pub const DEFAULT_KEY_ENV: &str = "ROLLCALL_API_KEY";

// ── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Daily SWPTM feed; `rollcall swptm` needs it.
    #[serde(default)]
    pub swptm: Option<SwptmConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Endpoint receiving `api-key`, `academic_year` and `month_name`.
    pub url: String,
    /// Inline key. Prefer `key_env`.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_key_env() -> String {
    DEFAULT_KEY_ENV.into()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("attendance.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_start_year")]
    pub start_year: i32,
}

fn default_start_year() -> i32 {
    2022
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { start_year: default_start_year() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemindersConfig {
    /// JSON-lines file reminders are appended to.
    #[serde(default = "default_outbox")]
    pub outbox: PathBuf,
    /// School name → admin e-mail.
    #[serde(default)]
    pub schools: BTreeMap<String, String>,
}

fn default_outbox() -> PathBuf {
    PathBuf::from("reminders.jsonl")
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self { outbox: default_outbox(), schools: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for weekly log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Also write to a log file; `false` logs to stderr only.
    #[serde(default = "default_true")]
    pub file: bool,
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: default_log_dir(), file: true, level: default_level() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwptmConfig {
    /// SWPTM endpoint. Takes the same key and query parameters as `[api]`.
    pub url: String,
    #[serde(default = "default_swptm_table")]
    pub table: String,
    #[serde(default = "default_swptm_working_field")]
    pub working_days_field: String,
    #[serde(default = "default_swptm_present_field")]
    pub present_days_field: String,
}

fn default_swptm_table() -> String {
    SWPTM_TABLE.into()
}

fn default_swptm_working_field() -> String {
    Intake::swptm().working_days_field
}

fn default_swptm_present_field() -> String {
    Intake::swptm().present_days_field
}

impl SwptmConfig {
    /// The SWPTM preset with this section's table and field names.
    pub fn dataset(&self) -> Dataset {
        let mut dataset = Dataset::swptm();
        dataset.table = self.table.clone();
        dataset.intake.working_days_field = self.working_days_field.clone();
        dataset.intake.present_days_field = self.present_days_field.clone();
        dataset
    }
}

// ── Parse + Validate ────────────────────────────────────────────────

fn config_err(msg: impl Into<String>) -> CliError {
    CliError { code: EXIT_CONFIG, message: msg.into(), hint: None }
}

impl AppConfig {
    pub fn from_toml(input: &str) -> Result<Self, CliError> {
        let config: AppConfig =
            toml::from_str(input).map_err(|e| config_err(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate `path`; relative paths inside are
    /// rebased onto the config file's directory.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            config_err(format!("cannot read config {}: {e}", path.display()))
                .with_hint("pass --config or create rollcall.toml")
        })?;
        let mut config = Self::from_toml(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.rebase(base);
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.store.path);
        join(&mut self.reminders.outbox);
        join(&mut self.logging.dir);
    }

    pub fn validate(&self) -> Result<(), CliError> {
        check_url("api.url", &self.api.url)?;
        if self.api.timeout_secs == 0 {
            return Err(config_err("api.timeout_secs must be positive"));
        }
        if self.api.key_env.trim().is_empty() {
            return Err(config_err("api.key_env must not be empty"));
        }

        self.engine().validate().map_err(|e| config_err(e.to_string()))?;

        if !(1900..=9999).contains(&self.backfill.start_year) {
            return Err(config_err(format!(
                "backfill.start_year {} is out of range",
                self.backfill.start_year
            )));
        }
        for (school, email) in &self.reminders.schools {
            if !email.contains('@') {
                return Err(config_err(format!(
                    "reminders.schools: '{email}' for {school} is not an e-mail address"
                )));
            }
        }
        if let Some(swptm) = &self.swptm {
            check_url("swptm.url", &swptm.url)?;
            swptm.dataset().validate().map_err(|e| config_err(e.to_string()))?;
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(config_err(format!("logging.level '{}' is not a valid filter", self.logging.level)));
        }
        Ok(())
    }

    /// The `[swptm]` section, or a config error naming it.
    pub fn swptm(&self) -> Result<&SwptmConfig, CliError> {
        self.swptm.as_ref().ok_or_else(|| {
            config_err("no [swptm] section in config")
                .with_hint("add [swptm] with url = \"<SWPTM endpoint>\" to rollcall.toml")
        })
    }

    /// Engine config for incremental runs.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig { normalize: self.normalize.clone(), dedup: self.dedup.clone() }
    }
}

fn check_url(name: &str, value: &str) -> Result<(), CliError> {
    let url = url::Url::parse(value)
        .map_err(|e| config_err(format!("{name} '{value}' is not a valid URL: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(config_err(format!("{name} must be http(s), got '{}'", url.scheme())));
    }
    Ok(())
}
