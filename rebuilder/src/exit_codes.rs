//! Stable exit codes for rebuilder CLI commands.
//!
//! A failed build exits with the build tool's own code instead, so callers can
//! tell compile errors from local problems.

/// Command succeeded.
pub const OK: i32 = 0;
/// Local failure: missing build tool, build timeout, spawn failure, bad config,
/// a failed smoke command, or an editor that never became ready.
pub const FAILURE: i32 = 1;
