//! Stable exit codes for the `olthad` CLI.

/// Command succeeded; for `olthad run`, the root task concluded.
pub const OK: i32 = 0;
/// Invalid configuration, deliberation failure, or any other error.
pub const INVALID: i32 = 1;
/// `olthad run` ran out of snapshots before the root task concluded.
pub const INPUT_CLOSED: i32 = 2;
