//! `rollcall-store`: SQLite attendance store.
//!
//! One table per feed (monthly attendance, SWPTM), one row per identity key. Every write is its own autocommitted
//! statement, so each record gets its own inserted / duplicate / error
//! classification.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use rollcall_recon::dataset::{is_valid_table_name, MONTHLY_TABLE};
use rollcall_recon::engine::AttendanceStore;
use rollcall_recon::model::{AttendanceRecord, Gender, PersistOutcome};
use rollcall_recon::period::ReportingPeriod;

const COLUMNS: &str = "school_name, grade_name, division_name, course_name, student_id, student_name,
    academic_year, gender, month, date, no_of_working_days, no_of_present_days,
    attendance_percentage, identity_key";

fn schema_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    school_name TEXT NOT NULL,
    grade_name TEXT NOT NULL,
    division_name TEXT NOT NULL,
    course_name TEXT NOT NULL,
    student_id TEXT NOT NULL,
    student_name TEXT NOT NULL,
    academic_year TEXT NOT NULL,   -- YYYY-YYYY
    gender TEXT NOT NULL,          -- M, F, or the unrecognized source value
    month TEXT NOT NULL,           -- full month name
    date TEXT NOT NULL,            -- YYYY-MM-DD, or source text if unparseable
    no_of_working_days INTEGER NOT NULL,
    no_of_present_days INTEGER NOT NULL,
    attendance_percentage REAL NOT NULL,
    identity_key TEXT NOT NULL UNIQUE,
    recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_{table}_period
    ON {table} (academic_year, month);
"#
    )
}

fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} ({COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
    )
}

fn upsert_sql(table: &str) -> String {
    format!(
        "{}
ON CONFLICT(identity_key) DO UPDATE SET
    school_name = excluded.school_name,
    grade_name = excluded.grade_name,
    division_name = excluded.division_name,
    course_name = excluded.course_name,
    student_id = excluded.student_id,
    student_name = excluded.student_name,
    academic_year = excluded.academic_year,
    gender = excluded.gender,
    month = excluded.month,
    date = excluded.date,
    no_of_working_days = excluded.no_of_working_days,
    no_of_present_days = excluded.no_of_present_days,
    attendance_percentage = excluded.attendance_percentage,
    recorded_at = CURRENT_TIMESTAMP",
        insert_sql(table)
    )
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database file could not be opened.
    Open { path: String, message: String },
    /// Schema creation failed.
    Schema(String),
    /// A read failed.
    Query(String),
    /// A write failed for a reason other than a duplicate key.
    Write { identity_key: String, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, message } => write!(f, "cannot open store {path}: {message}"),
            Self::Schema(msg) => write!(f, "cannot create schema: {msg}"),
            Self::Query(msg) => write!(f, "store query failed: {msg}"),
            Self::Write { identity_key, message } => {
                write!(f, "cannot write {identity_key}: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    conn: Connection,
    table: String,
    insert: String,
    upsert: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the monthly table.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_table(path, MONTHLY_TABLE)
    }

    /// Open (or create) the database at `path` and ensure `table`.
    pub fn open_table(path: &Path, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        log::debug!("opened store {} (table {table})", path.display());
        Self::with_connection(conn, table)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open_in_memory_table(MONTHLY_TABLE)
    }

    pub fn open_in_memory_table(table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: ":memory:".into(),
            message: e.to_string(),
        })?;
        Self::with_connection(conn, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        if !is_valid_table_name(table) {
            return Err(StoreError::Schema(format!("invalid table name '{table}'")));
        }
        conn.execute_batch(&schema_sql(table)).map_err(|e| StoreError::Schema(e.to_string()))?;
        Ok(Self {
            conn,
            table: table.to_string(),
            insert: insert_sql(table),
            upsert: upsert_sql(table),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn write(&self, sql: &str, r: &AttendanceRecord) -> rusqlite::Result<usize> {
        self.conn.execute(
            sql,
            params![
                r.school,
                r.grade_label,
                r.division_label,
                r.course_name,
                r.student_id,
                r.student_name,
                r.academic_year,
                r.gender.as_str(),
                r.month,
                r.date,
                r.working_days,
                r.present_days,
                r.attendance_percentage,
                r.identity_key,
            ],
        )
    }

    fn contains_key(&self, identity_key: &str) -> Result<bool, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE identity_key = ?1", self.table),
                params![identity_key],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Stored records for one period, in insertion order.
    pub fn records_for_period(
        &self,
        period: &ReportingPeriod,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM {}
                 WHERE academic_year = ?1 AND month = ?2
                 ORDER BY id",
                self.table
            ))
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![period.academic_year.to_string(), period.month_name()],
                |row| {
                    let gender: String = row.get(7)?;
                    Ok(AttendanceRecord {
                        school: row.get(0)?,
                        grade_label: row.get(1)?,
                        division_label: row.get(2)?,
                        course_name: row.get(3)?,
                        student_id: row.get(4)?,
                        student_name: row.get(5)?,
                        academic_year: row.get(6)?,
                        gender: Gender::from_token(&gender),
                        month: row.get(8)?,
                        date: row.get(9)?,
                        working_days: row.get(10)?,
                        present_days: row.get(11)?,
                        attendance_percentage: row.get(12)?,
                        identity_key: row.get(13)?,
                    })
                },
            )
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Total number of stored rows.
    pub fn count(&self) -> Result<usize, StoreError> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

impl AttendanceStore for SqliteStore {
    type Error = StoreError;

    fn existing_identity_keys(&self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT identity_key FROM {}", self.table))
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::Query(e.to_string()))?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        log::debug!("{} identity keys in store", keys.len());
        Ok(keys)
    }

    fn persist(&mut self, record: &AttendanceRecord) -> Result<PersistOutcome, StoreError> {
        match self.write(&self.insert, record) {
            Ok(_) => Ok(PersistOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(PersistOutcome::SkippedDuplicateAtStore),
            Err(e) => Err(StoreError::Write {
                identity_key: record.identity_key.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn upsert(&mut self, record: &AttendanceRecord) -> Result<PersistOutcome, StoreError> {
        let existed = self.contains_key(&record.identity_key)?;
        self.write(&self.upsert, record).map_err(|e| StoreError::Write {
            identity_key: record.identity_key.clone(),
            message: e.to_string(),
        })?;
        Ok(if existed { PersistOutcome::Updated } else { PersistOutcome::Inserted })
    }

    fn schools_with_data(&self, period: &ReportingPeriod) -> Result<BTreeSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT DISTINCT school_name FROM {} WHERE academic_year = ?1 AND month = ?2",
                self.table
            ))
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let schools = stmt
            .query_map(params![period.academic_year.to_string(), period.month_name()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| StoreError::Query(e.to_string()))?
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(schools)
    }
}
