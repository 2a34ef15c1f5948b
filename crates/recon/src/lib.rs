//! `rollcall-recon`: Attendance record normalization and incremental
//! reconciliation engine.
//!
//! Pure engine crate: receives raw batches and an identity-key snapshot,
//! returns the normalized, filtered, deduplicated insert set plus stats.
//! Storage and transport are reached only through the collaborator traits
//! in [`engine`]. No CLI or IO dependencies.

pub mod config;
pub mod dataset;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod filter;
pub mod identity;
pub mod model;
pub mod normalize;
pub mod period;
pub mod raw;
pub mod reminders;

pub use config::{DedupConfig, EngineConfig, GroupColumn, NormalizeConfig};
pub use dataset::Dataset;
pub use engine::{reconcile, AttendanceStore, BatchSource, Reconciler, RunMode, RunOutcome, RunReport};
pub use error::ReconError;
pub use model::{AttendanceRecord, PersistOutcome, RawRecord, Reconciliation, ReconciliationStats};
pub use period::{AcademicYear, ReportingPeriod};
pub use raw::{parse_batch, Intake, RawBatch};
