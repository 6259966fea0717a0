//! Stable exit codes for conductor CLI commands.

/// Command succeeded, including a run that ended on operator interrupt.
pub const OK: i32 = 0;
/// Invalid configuration, unreadable ledger, missing tools or other fatal errors.
pub const INVALID: i32 = 1;
