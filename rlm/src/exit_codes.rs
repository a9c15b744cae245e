//! Stable exit codes for `rlm` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, I/O failure, or other errors.
pub const INVALID: i32 = 1;
/// The run hit the configured depth or iteration bound.
pub const LIMIT_EXCEEDED: i32 = 2;
/// The worker failed, replied with an unknown outcome type, or none was configured.
pub const DISPATCH_FAILED: i32 = 3;
