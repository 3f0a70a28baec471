//! Stable exit codes for eve CLI commands.

/// Command succeeded, or the session ended normally.
pub const OK: i32 = 0;
/// Command failed due to invalid config/session or other errors.
pub const INVALID: i32 = 1;
/// The session halted after repeated invalid decisions.
pub const HALTED: i32 = 2;
/// The decider failed or timed out; the session was saved before exiting.
pub const DECIDER_FAILED: i32 = 3;
