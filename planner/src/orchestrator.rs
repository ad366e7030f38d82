//! Root entry point: one pipeline pass followed by bounded refinement.

use serde_json::Value;
use tracing::{info, info_span};

use crate::core::context::Context;
use crate::core::error::{OrchestrationError, Phase};
use crate::core::event::RunEvent;
use crate::core::verdict::EvaluationVerdict;
use crate::looping::{LoopStop, RefinementLoop};
use crate::pipeline::Pipeline;

/// Context key holding the caller's request text.
pub const REQUEST_KEY: &str = "request";
const REQUEST_PRODUCER: &str = "orchestrator";

/// Final artifact and metadata of a completed run.
#[derive(Debug, Clone)]
pub struct FinalResult {
    /// The last artifact in context (approved or not).
    pub artifact: Value,
    pub approved: bool,
    /// Completed evaluate+revise cycles.
    pub iterations_used: u32,
    pub stop: LoopStop,
    pub last_verdict: Option<EvaluationVerdict>,
    /// Full context at the end of the run.
    pub context: Context,
}

/// Composes a [`Pipeline`] and a [`RefinementLoop`].
///
/// Holds no per-run state: every call to [`Orchestrator::run`] builds its own
/// context and loop state, so one orchestrator can serve concurrent runs.
pub struct Orchestrator {
    pipeline: Pipeline,
    refinement: RefinementLoop,
}

impl Orchestrator {
    /// Assemble an orchestrator after checking that every stage's inputs can
    /// be satisfied in order.
    pub fn new(
        pipeline: Pipeline,
        refinement: RefinementLoop,
    ) -> Result<Self, OrchestrationError> {
        let available = pipeline.validate([REQUEST_KEY])?;
        let evaluator = refinement.evaluator();
        let reviser = refinement.reviser();
        let verdict_key = refinement.config().verdict_key.as_str();

        for stage in [evaluator, reviser] {
            let missing: Vec<String> = stage
                .spec()
                .inputs
                .iter()
                .filter(|key| key.as_str() != verdict_key && !available.contains(key.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(OrchestrationError::MissingInput {
                    stage: stage.name().to_string(),
                    phase: Phase::Loop { iteration: 1 },
                    missing,
                });
            }
        }
        if !available.contains(&refinement.config().artifact_key) {
            return Err(OrchestrationError::MissingInput {
                stage: reviser.name().to_string(),
                phase: Phase::Loop { iteration: 1 },
                missing: vec![refinement.config().artifact_key.clone()],
            });
        }

        Ok(Self {
            pipeline,
            refinement,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn refinement(&self) -> &RefinementLoop {
        &self.refinement
    }

    pub fn run(&self, request: &str) -> Result<FinalResult, OrchestrationError> {
        self.run_observed(request, |_| {})
    }

    /// Run the pipeline then the refinement loop, reporting progress to `on_event`.
    ///
    /// Failures are returned as-is; nothing is retried at this level.
    pub fn run_observed<F>(
        &self,
        request: &str,
        mut on_event: F,
    ) -> Result<FinalResult, OrchestrationError>
    where
        F: FnMut(&RunEvent<'_>),
    {
        let _span = info_span!("orchestrator_run").entered();
        let mut ctx = Context::new();
        ctx.insert(REQUEST_PRODUCER, REQUEST_KEY, Value::String(request.to_string()))
            .map_err(|conflict| OrchestrationError::OutputConflict {
                stage: REQUEST_PRODUCER.to_string(),
                phase: Phase::Pipeline,
                key: conflict.key,
                owner: conflict.owner,
            })?;

        let ctx = self.pipeline.run_observed(ctx, &mut on_event)?;
        let outcome = self.refinement.run_observed(ctx, &mut on_event)?;

        let artifact_key = &self.refinement.config().artifact_key;
        let artifact = outcome.context.get(artifact_key).cloned().ok_or_else(|| {
            OrchestrationError::MissingInput {
                stage: self.refinement.reviser().name().to_string(),
                phase: Phase::Loop {
                    iteration: outcome.state.iteration_count,
                },
                missing: vec![artifact_key.clone()],
            }
        })?;
        let approved = matches!(outcome.stop, LoopStop::Approved { .. });
        info!(
            approved,
            iterations_used = outcome.state.iteration_count,
            "run finished"
        );

        Ok(FinalResult {
            artifact,
            approved,
            iterations_used: outcome.state.iteration_count,
            stop: outcome.stop,
            last_verdict: outcome.state.last_verdict,
            context: outcome.context,
        })
    }
}
