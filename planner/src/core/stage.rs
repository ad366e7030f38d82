//! The stage contract every pipeline and loop participant implements.

use serde_json::Value;

use crate::core::context::Context;

/// Static declaration of a stage, checked before anything executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Stable stage name used in logs and error provenance.
    pub name: String,
    /// Context keys that must exist before the stage runs.
    pub inputs: Vec<String>,
    /// Context key the stage writes when it produces a value.
    pub output: String,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, inputs: &[&str], output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: inputs.iter().map(|key| key.to_string()).collect(),
            output: output.into(),
        }
    }
}

/// Result of executing a stage once.
#[derive(Debug)]
pub enum Outcome {
    /// The stage produced `value` under `key`.
    Produced { key: String, value: Value },
    /// The stage asks the enclosing loop to stop.
    Stop { reason: String },
    /// The stage (or a collaborator behind it) failed.
    Failed(anyhow::Error),
}

impl Outcome {
    pub fn produced(key: impl Into<String>, value: Value) -> Self {
        Self::Produced {
            key: key.into(),
            value,
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self::Stop {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Produced { .. } => "produced",
            Self::Stop { .. } => "stop",
            Self::Failed(_) => "failed",
        }
    }
}

impl From<anyhow::Result<Outcome>> for Outcome {
    fn from(result: anyhow::Result<Outcome>) -> Self {
        result.unwrap_or_else(Outcome::Failed)
    }
}

/// A named unit of work reading the shared context.
///
/// Stages get the context read-only; the caller records the produced value
/// after `execute` returns. Side effects (subprocesses, file reads, retries)
/// are the stage's own business.
pub trait Stage: Send + Sync {
    fn spec(&self) -> &StageSpec;

    fn execute(&self, ctx: &Context) -> Outcome;

    fn name(&self) -> &str {
        &self.spec().name
    }
}
