//! Single sequential pass over an ordered list of stages.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::context::Context;
use crate::core::error::{OrchestrationError, Phase};
use crate::core::event::RunEvent;
use crate::core::stage::{Outcome, Stage};

/// Ordered stages executed exactly once, one at a time.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> impl Iterator<Item = &dyn Stage> {
        self.stages.iter().map(|stage| stage.as_ref())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check, without executing anything, that every stage's inputs are
    /// provided by `available` or by an earlier stage.
    ///
    /// Returns the keys available once the pipeline has finished.
    pub fn validate<'a>(
        &self,
        available: impl IntoIterator<Item = &'a str>,
    ) -> Result<BTreeSet<String>, OrchestrationError> {
        let mut keys: BTreeSet<String> = available.into_iter().map(str::to_string).collect();
        for stage in self.stages() {
            let spec = stage.spec();
            let missing: Vec<String> = spec
                .inputs
                .iter()
                .filter(|key| !keys.contains(key.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(OrchestrationError::MissingInput {
                    stage: spec.name.clone(),
                    phase: Phase::Pipeline,
                    missing,
                });
            }
            keys.insert(spec.output.clone());
        }
        Ok(keys)
    }

    pub fn run(&self, ctx: Context) -> Result<Context, OrchestrationError> {
        self.run_observed(ctx, &mut |_| {})
    }

    /// Execute stages in declaration order, stopping at the first failure.
    ///
    /// Outputs recorded before a failure stay in the context the error was
    /// raised from, but downstream stages never run.
    #[instrument(skip_all, fields(stages = self.stages.len()))]
    pub fn run_observed(
        &self,
        mut ctx: Context,
        on_event: &mut dyn FnMut(&RunEvent<'_>),
    ) -> Result<Context, OrchestrationError> {
        let phase = Phase::Pipeline;
        for stage in self.stages() {
            let name = stage.name();
            ensure_inputs(stage, &ctx, phase)?;
            on_event(&RunEvent::StageStarted { phase, stage: name });
            info!(stage = name, "running stage");

            match stage.execute(&ctx) {
                Outcome::Produced { key, value } => {
                    record_output(stage, &mut ctx, phase, &key, value, false)?;
                    if let Some(value) = ctx.get(&key) {
                        on_event(&RunEvent::OutputRecorded {
                            phase,
                            stage: name,
                            key: &key,
                            value,
                        });
                    }
                }
                Outcome::Stop { reason } => {
                    warn!(stage = name, %reason, "stop requested outside a refinement loop");
                    return Err(OrchestrationError::UnexpectedStop {
                        stage: name.to_string(),
                        phase,
                        reason,
                    });
                }
                Outcome::Failed(source) => {
                    warn!(stage = name, err = %format!("{source:#}"), "stage failed");
                    return Err(OrchestrationError::StageFailure {
                        stage: name.to_string(),
                        phase,
                        source,
                    });
                }
            }
        }
        Ok(ctx)
    }
}

/// Fail with `MissingInput` unless every declared input of `stage` is present.
pub(crate) fn ensure_inputs(
    stage: &dyn Stage,
    ctx: &Context,
    phase: Phase,
) -> Result<(), OrchestrationError> {
    let missing = ctx.missing(&stage.spec().inputs);
    if missing.is_empty() {
        return Ok(());
    }
    Err(OrchestrationError::MissingInput {
        stage: stage.name().to_string(),
        phase,
        missing,
    })
}

/// Record a produced value under the stage's declared output key.
///
/// `reassign` permits overwriting a key owned by another stage.
pub(crate) fn record_output(
    stage: &dyn Stage,
    ctx: &mut Context,
    phase: Phase,
    key: &str,
    value: Value,
    reassign: bool,
) -> Result<(), OrchestrationError> {
    let spec = stage.spec();
    if key != spec.output {
        return Err(OrchestrationError::UndeclaredOutput {
            stage: spec.name.clone(),
            phase,
            declared: spec.output.clone(),
            produced: key.to_string(),
        });
    }
    if reassign {
        ctx.reassign(&spec.name, key, value);
    } else {
        ctx.insert(&spec.name, key, value)
            .map_err(|conflict| OrchestrationError::OutputConflict {
                stage: spec.name.clone(),
                phase,
                key: conflict.key,
                owner: conflict.owner,
            })?;
    }
    debug!(stage = %spec.name, key, reassign, "context updated");
    Ok(())
}
