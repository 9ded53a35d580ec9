//! Stable exit codes for conductor CLI commands.

/// Command succeeded or the turn completed.
pub const OK: i32 = 0;
/// Invalid input, config, layout or plan file, or another command error.
pub const INVALID: i32 = 1;
/// The turn ended with a `turnFailed` event.
pub const FAILED: i32 = 2;
/// The turn was cancelled, or input was abandoned and the run left suspended.
pub const CANCELLED: i32 = 3;
