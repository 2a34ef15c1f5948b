//! Subcommand handlers. Each returns `Ok(())` or a `CliError` carrying the
//! exit code; `main` does the printing.

use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rollcall_recon::period::backfill_periods;
use rollcall_recon::reminders::{dispatch, plan_reminders, DispatchSummary};
use rollcall_recon::{
    AttendanceStore, Dataset, DedupConfig, Intake, ReportingPeriod, Reconciler, RunMode,
    RunOutcome, RunReport,
};
use rollcall_store::{SqliteStore, StoreError};

use crate::config::AppConfig;
use crate::exit_codes;
use crate::fetch::{resolve_api_key, CliSource, FetchError, FileSource, HttpSource, SourceKind};
use crate::outbox::OutboxNotifier;
use crate::{logging, report, CliError};

// ── Shared ──────────────────────────────────────────────────────────

pub struct RunArgs {
    pub academic_year: Option<String>,
    pub month: Option<String>,
    pub input: Option<PathBuf>,
    pub api_key: Option<String>,
    pub dry_run: bool,
    pub json: bool,
    pub out: Option<PathBuf>,
    pub no_remind: bool,
}

pub struct SwptmArgs {
    pub academic_year: Option<String>,
    pub month: Option<String>,
    pub input: Option<PathBuf>,
    pub api_key: Option<String>,
    pub dry_run: bool,
    pub json: bool,
}

pub struct BackfillArgs {
    pub from_year: Option<i32>,
    pub refresh: bool,
    pub yearly: bool,
    pub api_key: Option<String>,
    pub json: bool,
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Explicit `--academic-year`/`--month`, else the dataset's default period
/// for `today`.
pub fn resolve_period(
    dataset: &Dataset,
    academic_year: Option<&str>,
    month: Option<&str>,
    today: NaiveDate,
) -> Result<ReportingPeriod, CliError> {
    match (academic_year, month) {
        (Some(ay), Some(m)) => ReportingPeriod::parse(ay, m).map_err(|e| CliError::args(e.to_string())),
        (None, None) => Ok(dataset.period_for(today)),
        _ => Err(CliError::args("--academic-year and --month must be given together")),
    }
}

fn load(config_path: &Path) -> Result<AppConfig, CliError> {
    let config = AppConfig::load(config_path)?;
    if let Some(path) = logging::init(&config.logging, today())? {
        log::debug!("logging to {}", path.display());
    }
    Ok(config)
}

fn open_store(config: &AppConfig, dataset: &Dataset) -> Result<SqliteStore, CliError> {
    SqliteStore::open_table(&config.store.path, &dataset.table).map_err(|e| CliError {
        code: exit_codes::EXIT_STORE_OPEN,
        message: e.to_string(),
        hint: Some("check store.path in rollcall.toml".to_string()),
    })
}

fn http_source(
    config: &AppConfig,
    api_key: Option<String>,
    url: &str,
    intake: Intake,
) -> Result<CliSource, CliError> {
    let key = resolve_api_key(api_key, &config.api.key_env, config.api.key.as_deref())?;
    let http = HttpSource::new(&config.api, key)?.with_url(url).with_intake(intake);
    Ok(CliSource::new(SourceKind::Http(http)))
}

fn file_source(path: PathBuf, intake: Intake) -> CliSource {
    CliSource::new(SourceKind::File(FileSource::new(path).with_intake(intake)))
}

/// Map a finished run to the process result.
fn run_result(report: &RunReport, source: &CliSource) -> Result<(), CliError> {
    match &report.outcome {
        RunOutcome::FetchFailed { message } => Err(match source.last_error() {
            Some(err) => CliError::from(err.clone()),
            None => CliError { code: exit_codes::EXIT_FETCH_UPSTREAM, message: message.clone(), hint: None },
        }),
        RunOutcome::KeySnapshotFailed { .. } => Err(CliError {
            code: exit_codes::EXIT_STORE_OPEN,
            message: report.outcome.to_string(),
            hint: None,
        }),
        RunOutcome::PersistAborted { .. } => Err(CliError {
            code: exit_codes::EXIT_PARTIAL,
            message: format!("{} ({} rows errored)", report.outcome, report.stats.errored),
            hint: Some("rerun after fixing the store; stored rows are skipped".to_string()),
        }),
        _ if report.stats.errored > 0 => Err(CliError {
            code: exit_codes::EXIT_PARTIAL,
            message: format!("{} rows errored", report.stats.errored),
            hint: None,
        }),
        _ => Ok(()),
    }
}

fn send_reminders<T>(
    config: &AppConfig,
    period: &ReportingPeriod,
    store: &T,
) -> Result<DispatchSummary, CliError>
where
    T: AttendanceStore<Error = StoreError>,
{
    if config.reminders.schools.is_empty() {
        log::info!("no schools configured for reminders");
        return Ok(DispatchSummary::default());
    }
    let with_data = store.schools_with_data(period).map_err(|e| CliError {
        code: exit_codes::EXIT_STORE_QUERY,
        message: e.to_string(),
        hint: None,
    })?;
    let reminders = plan_reminders(period, &config.reminders.schools, &with_data);
    log::info!(
        "{} of {} schools have no data for {period}",
        reminders.len(),
        config.reminders.schools.len()
    );
    let mut outbox = OutboxNotifier::new(&config.reminders.outbox, *period);
    Ok(dispatch(&mut outbox, &reminders))
}

// ── run ─────────────────────────────────────────────────────────────

pub fn cmd_run(config_path: &Path, args: RunArgs) -> Result<(), CliError> {
    let dataset = Dataset::monthly();
    let period =
        resolve_period(&dataset, args.academic_year.as_deref(), args.month.as_deref(), today())?;
    let config = load(config_path)?;

    let source = match args.input {
        Some(path) => file_source(path, dataset.intake.clone()),
        None => http_source(&config, args.api_key, &config.api.url, dataset.intake.clone())?,
    };
    let store = open_store(&config, &dataset)?;

    let mut reconciler = Reconciler::new(config.engine(), source, store).with_dry_run(args.dry_run);
    let run = reconciler.run(&period);

    eprint!("{}", report::summary(&run));
    if args.json {
        report::write_json(io::stdout().lock(), &run)?;
    }
    if let Some(out) = &args.out {
        report::write_records_csv_file(out, &run.records)?;
        eprintln!("wrote {} records to {}", run.records.len(), out.display());
    }

    let reminders_due = matches!(run.outcome, RunOutcome::Completed | RunOutcome::EmptyBatch);
    if reminders_due && !args.no_remind {
        // Reminder failures never fail the run.
        match send_reminders(&config, &period, reconciler.store()) {
            Ok(summary) if summary.sent > 0 || !summary.failed.is_empty() => eprintln!(
                "reminders: {} queued to {}, {} failed",
                summary.sent,
                config.reminders.outbox.display(),
                summary.failed.len()
            ),
            Ok(_) => {}
            Err(e) => log::error!("reminders skipped: {}", e.message),
        }
    }

    run_result(&run, reconciler.source())
}

// ── backfill ────────────────────────────────────────────────────────

pub fn cmd_backfill(config_path: &Path, args: BackfillArgs) -> Result<(), CliError> {
    let config = load(config_path)?;
    let start_year = args.from_year.unwrap_or(config.backfill.start_year);
    let periods = backfill_periods(start_year, today());
    if periods.is_empty() {
        return Err(CliError::args(format!("start year {start_year} is after the current year")));
    }

    let dataset = Dataset::monthly();
    let source = http_source(&config, args.api_key, &config.api.url, dataset.intake.clone())?;
    let store = open_store(&config, &dataset)?;
    let mode = if args.refresh { RunMode::Refresh } else { RunMode::Incremental };
    let mut engine = config.engine();
    if args.yearly {
        engine.dedup = DedupConfig::yearly();
        engine.normalize.round_attendance = true;
    }
    let mut reconciler = Reconciler::new(engine, source, store).with_mode(mode);

    log::info!("backfilling {} periods from {start_year}", periods.len());
    let mut reports = Vec::with_capacity(periods.len());
    let mut failed = Vec::new();
    for period in &periods {
        let run = reconciler.run(period);
        eprint!("{}", report::summary(&run));
        if let Err(e) = run_result(&run, reconciler.source()) {
            // A rejected key fails every later period the same way.
            if matches!(reconciler.source().last_error(), Some(FetchError::Auth { .. })) {
                return Err(e);
            }
            failed.push(period.to_string());
        }
        reports.push(run);
    }

    if args.json {
        report::write_json(io::stdout().lock(), &reports)?;
    }
    let inserted: usize = reports.iter().map(|r| r.stats.inserted).sum();
    let updated: usize = reports.iter().map(|r| r.stats.updated).sum();
    eprintln!(
        "backfill: {} periods, {inserted} inserted, {updated} updated, {} failed",
        reports.len(),
        failed.len()
    );

    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliError {
            code: exit_codes::EXIT_PARTIAL,
            message: format!("{} of {} periods failed: {}", failed.len(), reports.len(), failed.join(", ")),
            hint: Some("rerun backfill; stored rows are skipped".to_string()),
        })
    }
}

// ── swptm ───────────────────────────────────────────────────────────

/// Refresh one SWPTM period into its own table. Every cleaned row is
/// upserted; there are no reminders for this feed.
pub fn cmd_swptm(config_path: &Path, args: SwptmArgs) -> Result<(), CliError> {
    let config = load(config_path)?;
    let swptm = config.swptm()?;
    let dataset = swptm.dataset();
    let period =
        resolve_period(&dataset, args.academic_year.as_deref(), args.month.as_deref(), today())?;

    let source = match args.input {
        Some(path) => file_source(path, dataset.intake.clone()),
        None => http_source(&config, args.api_key, &swptm.url, dataset.intake.clone())?,
    };
    let store = open_store(&config, &dataset)?;

    let mut reconciler = Reconciler::new(config.engine(), source, store)
        .with_mode(dataset.mode)
        .with_dry_run(args.dry_run);
    let run = reconciler.run(&period);

    eprint!("{}", report::summary(&run));
    if args.json {
        report::write_json(io::stdout().lock(), &run)?;
    }
    run_result(&run, reconciler.source())
}

// ── remind ──────────────────────────────────────────────────────────

pub fn cmd_remind(
    config_path: &Path,
    academic_year: Option<String>,
    month: Option<String>,
) -> Result<(), CliError> {
    let dataset = Dataset::monthly();
    let period = resolve_period(&dataset, academic_year.as_deref(), month.as_deref(), today())?;
    let config = load(config_path)?;
    let store = open_store(&config, &dataset)?;

    let summary = send_reminders(&config, &period, &store)?;
    eprintln!(
        "{period}: {} reminders queued to {}",
        summary.sent,
        config.reminders.outbox.display()
    );
    if summary.failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::io(format!("reminders failed for: {}", summary.failed.join(", "))))
    }
}

// ── validate ────────────────────────────────────────────────────────

pub fn cmd_validate(config_path: &Path) -> Result<(), CliError> {
    let config = AppConfig::load(config_path)?;
    let key_source = if std::env::var(&config.api.key_env).map(|k| !k.trim().is_empty()).unwrap_or(false) {
        format!("env {}", config.api.key_env)
    } else if config.api.key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false) {
        "config api.key".to_string()
    } else {
        format!("not set (pass --api-key or set {})", config.api.key_env)
    };
    let group_by: Vec<&str> = config.dedup.group_by.iter().map(|c| c.name()).collect();

    println!("config ok: {}", config_path.display());
    println!("  api.url:        {}", config.api.url);
    println!("  api key:        {key_source}");
    println!("  store:          {}", config.store.path.display());
    println!("  dedup group_by: {}", group_by.join(", "));
    println!("  backfill from:  {}", config.backfill.start_year);
    println!("  schools:        {}", config.reminders.schools.len());
    match &config.swptm {
        Some(swptm) => println!("  swptm:          {} -> {}", swptm.url, swptm.table),
        None => println!("  swptm:          not configured"),
    }
    Ok(())
}
