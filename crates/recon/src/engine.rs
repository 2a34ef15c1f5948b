use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::config::{EngineConfig, GroupColumn};
use crate::dedup::resolve;
use crate::filter::filter_new;
use crate::identity::attach_keys;
use crate::model::{
    AttendanceRecord, DedupReport, PersistOutcome, RecordAnomaly, Reconciliation,
    ReconciliationStats,
};
use crate::normalize::Normalizer;
use crate::period::ReportingPeriod;
use crate::raw::RawBatch;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Where raw batches come from (HTTP API, file, fixture).
pub trait BatchSource {
    type Error: fmt::Display;

    fn fetch_batch(&mut self, period: &ReportingPeriod) -> Result<RawBatch, Self::Error>;
}

/// Persistent attendance store.
pub trait AttendanceStore {
    type Error: fmt::Display;

    /// Every identity key already stored, read once per run.
    fn existing_identity_keys(&self) -> Result<HashSet<String>, Self::Error>;

    /// Insert one record. A uniqueness conflict is `SkippedDuplicateAtStore`,
    /// not an error.
    fn persist(&mut self, record: &AttendanceRecord) -> Result<PersistOutcome, Self::Error>;

    /// Insert or overwrite one record by identity key.
    fn upsert(&mut self, record: &AttendanceRecord) -> Result<PersistOutcome, Self::Error>;

    /// Distinct schools with at least one stored record for `period`.
    fn schools_with_data(&self, period: &ReportingPeriod) -> Result<BTreeSet<String>, Self::Error>;
}

// ---------------------------------------------------------------------------
// Pure pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Skip records whose key is already stored; insert the rest.
    #[default]
    Incremental,
    /// Every cleaned record is a candidate; the store inserts or updates.
    Refresh,
}

/// Normalize a raw batch and attach identity keys.
pub fn prepare(
    normalizer: &Normalizer,
    period: &ReportingPeriod,
    batch: &RawBatch,
) -> (Vec<AttendanceRecord>, Vec<RecordAnomaly>) {
    let (mut records, anomalies) = normalizer.batch(&batch.records, period);
    attach_keys(&mut records);
    (records, anomalies)
}

/// Filter against the key snapshot (incremental mode only), then resolve
/// duplicates. Returns the final set, the dedup report, and the number of
/// new candidates that entered the resolver.
pub fn select(
    records: Vec<AttendanceRecord>,
    existing_keys: &HashSet<String>,
    group_by: &[GroupColumn],
    mode: RunMode,
) -> (Vec<AttendanceRecord>, DedupReport, usize) {
    let candidates = match mode {
        RunMode::Incremental => filter_new(records, existing_keys),
        RunMode::Refresh => records,
    };
    let new_candidates = candidates.len();
    let (records, report) = resolve(candidates, group_by);
    (records, report, new_candidates)
}

/// Pure reconciliation: raw batch + existing keys to the final insert set.
///
/// Deterministic for a given input. `elapsed_seconds` is left at zero and
/// the persistence counters are untouched; [`Reconciler::run`] fills those.
pub fn reconcile(
    config: &EngineConfig,
    period: &ReportingPeriod,
    batch: &RawBatch,
    existing_keys: &HashSet<String>,
) -> Reconciliation {
    let normalizer = Normalizer::new(&config.normalize);
    let mut stats = ReconciliationStats::default();

    if batch.is_empty() {
        return Reconciliation {
            period: *period,
            records: Vec::new(),
            stats,
            dedup: DedupReport::default(),
            anomalies: Vec::new(),
        };
    }

    let (records, anomalies) = prepare(&normalizer, period, batch);
    stats.records_fetched = batch.entries();
    stats.records_after_cleaning = records.len();
    stats.existing_keys_in_store = existing_keys.len();

    let (records, dedup, new_candidates) =
        select(records, existing_keys, &config.dedup.group_by, RunMode::Incremental);
    stats.new_candidates = new_candidates;
    stats.duplicates_removed = dedup.dropped;

    Reconciliation { period: *period, records, stats, dedup, anomalies }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// The source returned no records.
    EmptyBatch,
    /// Reconciled against the snapshot; nothing was written.
    DryRun,
    FetchFailed { message: String },
    KeySnapshotFailed { message: String },
    /// A store error stopped persistence at `identity_key`.
    PersistAborted { identity_key: String, message: String },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed { .. } | Self::KeySnapshotFailed { .. } | Self::PersistAborted { .. }
        )
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::EmptyBatch => write!(f, "no records in source batch"),
            Self::DryRun => write!(f, "dry run (nothing persisted)"),
            Self::FetchFailed { message } => write!(f, "fetch failed: {message}"),
            Self::KeySnapshotFailed { message } => {
                write!(f, "could not read existing identity keys: {message}")
            }
            Self::PersistAborted { identity_key, message } => {
                write!(f, "persistence aborted at {identity_key}: {message}")
            }
        }
    }
}

/// Everything one run produced. Always returned, whatever failed.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub period: ReportingPeriod,
    pub mode: RunMode,
    pub outcome: RunOutcome,
    pub stats: ReconciliationStats,
    pub dedup: DedupReport,
    pub anomalies: Vec<RecordAnomaly>,
    /// Final deduplicated set handed to the store (or that would have been).
    pub records: Vec<AttendanceRecord>,
}

impl RunReport {
    fn new(period: ReportingPeriod, mode: RunMode) -> Self {
        Self {
            period,
            mode,
            outcome: RunOutcome::Completed,
            stats: ReconciliationStats::default(),
            dedup: DedupReport::default(),
            anomalies: Vec::new(),
            records: Vec::new(),
        }
    }

    /// No failure outcome and no errored rows.
    pub fn is_clean(&self) -> bool {
        !self.outcome.is_failure() && self.stats.errored == 0
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Runs the full pipeline against injected collaborators.
pub struct Reconciler<S, T> {
    config: EngineConfig,
    normalizer: Normalizer,
    source: S,
    store: T,
    mode: RunMode,
    dry_run: bool,
}

impl<S: BatchSource, T: AttendanceStore> Reconciler<S, T> {
    pub fn new(config: EngineConfig, source: S, store: T) -> Self {
        let normalizer = Normalizer::new(&config.normalize);
        Self { config, normalizer, source, store, mode: RunMode::Incremental, dry_run: false }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    pub fn into_store(self) -> T {
        self.store
    }

    /// Fetched → Normalized → Keyed → Filtered → Deduplicated → Handed-off.
    pub fn run(&mut self, period: &ReportingPeriod) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(*period, self.mode);
        self.run_stages(period, &mut report);
        report.stats.elapsed_seconds = started.elapsed().as_secs_f64();
        log::info!("run for {period} finished: {}", report.outcome);
        report
    }

    fn run_stages(&mut self, period: &ReportingPeriod, report: &mut RunReport) {
        let batch = match self.source.fetch_batch(period) {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("fetch for {period} failed: {e}");
                report.outcome = RunOutcome::FetchFailed { message: e.to_string() };
                return;
            }
        };
        report.stats.records_fetched = batch.entries();
        if batch.skipped > 0 {
            log::warn!("{} non-object entries skipped in source batch", batch.skipped);
        }
        if batch.is_empty() {
            log::info!("no records for {period}");
            report.outcome = RunOutcome::EmptyBatch;
            return;
        }
        log::info!("fetched {} records for {period}", batch.entries());

        let (records, anomalies) = prepare(&self.normalizer, period, &batch);
        report.stats.records_after_cleaning = records.len();
        report.anomalies = anomalies;

        let existing = match self.store.existing_identity_keys() {
            Ok(keys) => keys,
            Err(e) => {
                log::error!("reading existing identity keys failed: {e}");
                report.outcome = RunOutcome::KeySnapshotFailed { message: e.to_string() };
                return;
            }
        };
        report.stats.existing_keys_in_store = existing.len();

        let (records, dedup, new_candidates) =
            select(records, &existing, &self.config.dedup.group_by, self.mode);
        report.stats.new_candidates = new_candidates;
        report.stats.duplicates_removed = dedup.dropped;
        report.dedup = dedup;
        log::info!(
            "{new_candidates} new candidates, {} duplicates removed, {} to persist",
            report.stats.duplicates_removed,
            records.len()
        );

        if self.dry_run {
            report.records = records;
            report.outcome = RunOutcome::DryRun;
            return;
        }

        for (i, record) in records.iter().enumerate() {
            let result = match self.mode {
                RunMode::Incremental => self.store.persist(record),
                RunMode::Refresh => self.store.upsert(record),
            };
            match result {
                Ok(outcome) => {
                    if outcome == PersistOutcome::SkippedDuplicateAtStore {
                        log::warn!("{} already stored; skipped", record.identity_key);
                    }
                    report.stats.record_outcome(outcome);
                }
                Err(e) => {
                    let remaining = records.len() - i;
                    log::error!(
                        "persisting {} failed: {e}; {remaining} rows marked errored",
                        record.identity_key
                    );
                    report.stats.errored += remaining;
                    report.outcome = RunOutcome::PersistAborted {
                        identity_key: record.identity_key.clone(),
                        message: e.to_string(),
                    };
                    break;
                }
            }
        }
        report.records = records;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
