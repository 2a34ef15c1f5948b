//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: schedulers rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                                  |
//! |---------|------------------|----------------------------------------------|
//! | 0       | Universal        | Success                                      |
//! | 1       | Universal        | General error (unspecified)                  |
//! | 2       | Universal        | CLI usage error (bad args, missing file)     |
//! | 3       | config           | Config file unreadable or invalid            |
//! | 4       | run              | Partial run (errored rows or aborted run)    |
//! | 50-59   | fetch            | Source API                                   |
//! | 60-69   | store            | Attendance store                             |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable input file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Config (3) + Run (4)
// =============================================================================

/// Config file missing, unparseable, or failing validation.
pub const EXIT_CONFIG: u8 = 3;

/// The run finished but not cleanly: rows errored at the store, persistence
/// was aborted, or (backfill) at least one period failed.
pub const EXIT_PARTIAL: u8 = 4;

// =============================================================================
// Fetch (50-59): source API
// =============================================================================

/// No API key provided (flag, env var, or config).
pub const EXIT_FETCH_NOT_AUTH: u8 = 50;

/// Auth rejected by upstream (401/403).
pub const EXIT_FETCH_AUTH: u8 = 51;

/// Bad request rejected by upstream (400).
pub const EXIT_FETCH_VALIDATION: u8 = 52;

/// Response body is not a usable batch (bad JSON, wrong shape).
pub const EXIT_FETCH_DECODE: u8 = 53;

/// Upstream error (other 4xx/5xx) or network failure.
pub const EXIT_FETCH_UPSTREAM: u8 = 54;

// =============================================================================
// Store (60-69)
// =============================================================================

/// Store could not be opened, or the identity-key snapshot failed.
pub const EXIT_STORE_OPEN: u8 = 60;

/// A store query outside a run failed (e.g. schools with data).
pub const EXIT_STORE_QUERY: u8 = 61;
