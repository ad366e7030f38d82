//! Refine-until-approved orchestration for a meal-planning assistant.
//!
//! A run is one sequential [`pipeline`] pass followed by a bounded
//! evaluate-then-revise [`looping`] phase, composed by the [`orchestrator`].
//!
//! - **[`core`]**: Stage contract, run context, verdicts, typed errors.
//!   No I/O.
//! - **[`io`]**: Config, agent processes, prompts, run artifacts.
//! - **[`nutrition`]**: The concrete stages and their wiring.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod nutrition;
pub mod orchestrator;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
