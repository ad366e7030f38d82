//! Stable exit codes for planner CLI commands.

/// Command succeeded; for `planner run`, the plan was approved.
pub const OK: i32 = 0;
/// Invalid config, unreadable inputs, or a failed stage.
pub const FAILED: i32 = 1;
/// `planner run` used its whole iteration budget without approval.
pub const NOT_CONVERGED: i32 = 2;
