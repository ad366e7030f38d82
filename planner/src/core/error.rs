//! Typed errors surfaced by the pipeline, refinement loop, and orchestrator.
//!
//! Every runtime variant carries the stage name and the [`Phase`] it happened
//! in, so a caller can diagnose a failed run without re-running it.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Where in a run an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// The single sequential pass before refinement.
    Pipeline,
    /// A refinement cycle (1-indexed).
    Loop { iteration: u32 },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Loop { iteration } => write!(f, "refinement iteration {iteration}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A stage's declared inputs were absent from the context.
    #[error("stage '{stage}' is missing inputs [{}] during {phase}", missing.join(", "))]
    MissingInput {
        stage: String,
        phase: Phase,
        missing: Vec<String>,
    },

    /// A stage reported a failure.
    #[error("stage '{stage}' failed during {phase}")]
    StageFailure {
        stage: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    /// A stage returned `Stop` where stopping has no meaning.
    #[error("stage '{stage}' requested stop ({reason}) during {phase}, where stop is not allowed")]
    UnexpectedStop {
        stage: String,
        phase: Phase,
        reason: String,
    },

    /// The reviser's action disagrees with the evaluator's verdict.
    #[error(
        "reviser '{stage}' returned {action} but the verdict was {} (refinement iteration {iteration})",
        if *approved { "approved" } else { "not approved" }
    )]
    InconsistentRevision {
        stage: String,
        iteration: u32,
        approved: bool,
        action: &'static str,
    },

    /// The evaluator produced something that is not a verdict.
    #[error("evaluator '{stage}' produced a malformed verdict (refinement iteration {iteration}): {reason}")]
    MalformedVerdict {
        stage: String,
        iteration: u32,
        reason: String,
    },

    /// A stage produced a key other than the one it declared.
    #[error("stage '{stage}' produced '{produced}' but declares '{declared}' during {phase}")]
    UndeclaredOutput {
        stage: String,
        phase: Phase,
        declared: String,
        produced: String,
    },

    /// A stage tried to write a key owned by another stage.
    #[error("stage '{stage}' cannot write '{key}' owned by '{owner}' during {phase}")]
    OutputConflict {
        stage: String,
        phase: Phase,
        key: String,
        owner: String,
    },

    /// The orchestration was assembled with invalid settings.
    #[error("invalid orchestration config: {0}")]
    InvalidConfig(String),
}

impl OrchestrationError {
    /// Name of the stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::MissingInput { stage, .. }
            | Self::StageFailure { stage, .. }
            | Self::UnexpectedStop { stage, .. }
            | Self::InconsistentRevision { stage, .. }
            | Self::MalformedVerdict { stage, .. }
            | Self::UndeclaredOutput { stage, .. }
            | Self::OutputConflict { stage, .. } => Some(stage),
            Self::InvalidConfig(_) => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::MissingInput { phase, .. }
            | Self::StageFailure { phase, .. }
            | Self::UnexpectedStop { phase, .. }
            | Self::UndeclaredOutput { phase, .. }
            | Self::OutputConflict { phase, .. } => Some(*phase),
            Self::InconsistentRevision { iteration, .. }
            | Self::MalformedVerdict { iteration, .. } => Some(Phase::Loop {
                iteration: *iteration,
            }),
            Self::InvalidConfig(_) => None,
        }
    }
}
