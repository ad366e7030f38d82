//! Deterministic, pure orchestration types shared by the planner.
//!
//! Core modules must be free of I/O side effects. They describe the stage
//! contract, the run-scoped context, verdicts, and the typed error surface.

pub mod context;
pub mod error;
pub mod event;
pub mod stage;
pub mod verdict;
