//! Progress events emitted while a run executes.
//!
//! Observers (run logs, progress output) subscribe through a callback so the
//! orchestration core stays free of I/O.

use serde_json::Value;

use crate::core::error::Phase;
use crate::core::verdict::EvaluationVerdict;

#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    /// A stage is about to execute.
    StageStarted { phase: Phase, stage: &'a str },
    /// A stage's output was recorded in the context.
    OutputRecorded {
        phase: Phase,
        stage: &'a str,
        key: &'a str,
        value: &'a Value,
    },
    /// A full evaluate+revise cycle finished.
    IterationFinished {
        iteration: u32,
        verdict: &'a EvaluationVerdict,
        stopped: bool,
    },
}
