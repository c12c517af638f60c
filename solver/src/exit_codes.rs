//! Stable exit codes for solver CLI commands.

/// Command succeeded, or the attempt's verdict passed.
pub const OK: i32 = 0;
/// The attempt ran to a failing verdict.
pub const FAILED: i32 = 1;
/// Invalid issue file, config or arguments, or any other error before an attempt starts.
pub const INVALID: i32 = 2;
