//! Bounded evaluate-then-revise refinement loop.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::context::Context;
use crate::core::error::{OrchestrationError, Phase};
use crate::core::event::RunEvent;
use crate::core::stage::{Outcome, Stage};
use crate::core::verdict::EvaluationVerdict;
use crate::pipeline::{ensure_inputs, record_output};

/// Default number of evaluate+revise cycles.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Settings for a [`RefinementLoop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementConfig {
    /// Upper bound on full evaluate+revise cycles (must be > 0).
    pub max_iterations: u32,
    /// Context key holding the artifact under refinement.
    pub artifact_key: String,
    /// Context key the evaluator writes its verdict to.
    pub verdict_key: String,
}

impl RefinementConfig {
    pub fn new(
        max_iterations: u32,
        artifact_key: impl Into<String>,
        verdict_key: impl Into<String>,
    ) -> Self {
        Self {
            max_iterations,
            artifact_key: artifact_key.into(),
            verdict_key: verdict_key.into(),
        }
    }
}

/// Reason why the refinement loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopStop {
    /// The verdict approved the artifact and the reviser stopped.
    Approved { reason: String },
    /// `max_iterations` cycles ran without approval.
    NotConverged { max_iterations: u32 },
}

/// Per-run loop bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopState {
    /// Completed evaluate+revise cycles.
    pub iteration_count: u32,
    /// Set once approval was observed and the reviser stopped.
    pub stopped: bool,
    pub last_verdict: Option<EvaluationVerdict>,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub context: Context,
    pub state: LoopState,
    pub stop: LoopStop,
}

/// Repeats evaluator → reviser until approval or the iteration cap.
pub struct RefinementLoop {
    config: RefinementConfig,
    evaluator: Box<dyn Stage>,
    reviser: Box<dyn Stage>,
}

impl RefinementLoop {
    /// Build a loop, rejecting zero iterations and stages whose declared
    /// outputs do not match the configured keys.
    pub fn new(
        config: RefinementConfig,
        evaluator: Box<dyn Stage>,
        reviser: Box<dyn Stage>,
    ) -> Result<Self, OrchestrationError> {
        if config.max_iterations == 0 {
            return Err(OrchestrationError::InvalidConfig(
                "max_iterations must be > 0".to_string(),
            ));
        }
        if evaluator.spec().output != config.verdict_key {
            return Err(OrchestrationError::InvalidConfig(format!(
                "evaluator '{}' writes '{}' but the verdict key is '{}'",
                evaluator.name(),
                evaluator.spec().output,
                config.verdict_key
            )));
        }
        if reviser.spec().output != config.artifact_key {
            return Err(OrchestrationError::InvalidConfig(format!(
                "reviser '{}' writes '{}' but the artifact key is '{}'",
                reviser.name(),
                reviser.spec().output,
                config.artifact_key
            )));
        }
        Ok(Self {
            config,
            evaluator,
            reviser,
        })
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &dyn Stage {
        self.evaluator.as_ref()
    }

    pub fn reviser(&self) -> &dyn Stage {
        self.reviser.as_ref()
    }

    /// Keys that must exist before the first iteration.
    ///
    /// The verdict key is excluded because the evaluator provides it.
    pub fn required_keys(&self) -> BTreeSet<&str> {
        let mut keys: BTreeSet<&str> = self
            .evaluator
            .spec()
            .inputs
            .iter()
            .chain(self.reviser.spec().inputs.iter())
            .map(String::as_str)
            .collect();
        keys.insert(self.config.artifact_key.as_str());
        keys.remove(self.config.verdict_key.as_str());
        keys
    }

    pub fn run(&self, ctx: Context) -> Result<LoopOutcome, OrchestrationError> {
        self.run_observed(ctx, &mut |_| {})
    }

    /// Run up to `max_iterations` evaluate+revise cycles.
    ///
    /// Exhausting the budget is reported as [`LoopStop::NotConverged`], not an
    /// error. On approval the artifact is returned exactly as the evaluator saw it.
    #[instrument(skip_all, fields(max_iterations = self.config.max_iterations))]
    pub fn run_observed(
        &self,
        mut ctx: Context,
        on_event: &mut dyn FnMut(&RunEvent<'_>),
    ) -> Result<LoopOutcome, OrchestrationError> {
        let mut state = LoopState::default();
        if !ctx.contains(&self.config.artifact_key) {
            return Err(OrchestrationError::MissingInput {
                stage: self.reviser.name().to_string(),
                phase: Phase::Loop { iteration: 1 },
                missing: vec![self.config.artifact_key.clone()],
            });
        }

        for iteration in 1..=self.config.max_iterations {
            let verdict = self.evaluate(&mut ctx, iteration, on_event)?;

            let phase = Phase::Loop { iteration };
            let reviser = self.reviser.as_ref();
            ensure_inputs(reviser, &ctx, phase)?;
            on_event(&RunEvent::StageStarted {
                phase,
                stage: reviser.name(),
            });
            let outcome = reviser.execute(&ctx);

            match (verdict.approved, outcome) {
                (_, Outcome::Failed(source)) => {
                    warn!(stage = reviser.name(), iteration, err = %format!("{source:#}"), "reviser failed");
                    return Err(OrchestrationError::StageFailure {
                        stage: reviser.name().to_string(),
                        phase,
                        source,
                    });
                }
                (true, Outcome::Stop { reason }) => {
                    state.iteration_count = iteration;
                    state.stopped = true;
                    on_event(&RunEvent::IterationFinished {
                        iteration,
                        verdict: &verdict,
                        stopped: true,
                    });
                    info!(iteration, %reason, "artifact approved");
                    state.last_verdict = Some(verdict);
                    return Ok(LoopOutcome {
                        context: ctx,
                        state,
                        stop: LoopStop::Approved { reason },
                    });
                }
                (false, Outcome::Produced { key, value }) => {
                    record_output(reviser, &mut ctx, phase, &key, value, true)?;
                    if let Some(value) = ctx.get(&key) {
                        on_event(&RunEvent::OutputRecorded {
                            phase,
                            stage: reviser.name(),
                            key: &key,
                            value,
                        });
                    }
                }
                (true, Outcome::Produced { .. }) => {
                    return Err(OrchestrationError::InconsistentRevision {
                        stage: reviser.name().to_string(),
                        iteration,
                        approved: true,
                        action: "a revised artifact",
                    });
                }
                (false, Outcome::Stop { .. }) => {
                    return Err(OrchestrationError::InconsistentRevision {
                        stage: reviser.name().to_string(),
                        iteration,
                        approved: false,
                        action: "stop",
                    });
                }
            }

            state.iteration_count = iteration;
            on_event(&RunEvent::IterationFinished {
                iteration,
                verdict: &verdict,
                stopped: false,
            });
            info!(
                iteration,
                issues = verdict.issues.len(),
                "artifact revised"
            );
            state.last_verdict = Some(verdict);
        }

        warn!(
            max_iterations = self.config.max_iterations,
            "refinement budget exhausted without approval"
        );
        Ok(LoopOutcome {
            context: ctx,
            state,
            stop: LoopStop::NotConverged {
                max_iterations: self.config.max_iterations,
            },
        })
    }

    fn evaluate(
        &self,
        ctx: &mut Context,
        iteration: u32,
        on_event: &mut dyn FnMut(&RunEvent<'_>),
    ) -> Result<EvaluationVerdict, OrchestrationError> {
        let phase = Phase::Loop { iteration };
        let evaluator = self.evaluator.as_ref();
        ensure_inputs(evaluator, ctx, phase)?;
        on_event(&RunEvent::StageStarted {
            phase,
            stage: evaluator.name(),
        });

        let (key, value) = match evaluator.execute(ctx) {
            Outcome::Produced { key, value } => (key, value),
            Outcome::Stop { reason } => {
                return Err(OrchestrationError::UnexpectedStop {
                    stage: evaluator.name().to_string(),
                    phase,
                    reason,
                });
            }
            Outcome::Failed(source) => {
                warn!(stage = evaluator.name(), iteration, err = %format!("{source:#}"), "evaluator failed");
                return Err(OrchestrationError::StageFailure {
                    stage: evaluator.name().to_string(),
                    phase,
                    source,
                });
            }
        };

        let verdict = EvaluationVerdict::from_value(&value).map_err(|err| {
            OrchestrationError::MalformedVerdict {
                stage: evaluator.name().to_string(),
                iteration,
                reason: err.to_string(),
            }
        })?;
        if !verdict.is_consistent() {
            warn!(
                stage = evaluator.name(),
                iteration,
                blocking = verdict.blocking_issues().count(),
                "verdict approved despite blocking issues; trusting approval flag"
            );
        }

        record_output(evaluator, ctx, phase, &key, value, false)?;
        if let Some(value) = ctx.get(&key) {
            on_event(&RunEvent::OutputRecorded {
                phase,
                stage: evaluator.name(),
                key: &key,
                value,
            });
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::StageSpec;
    use crate::core::verdict::{Issue, Severity};
    use crate::test_support::{CallLog, Scripted, ScriptedStage, approved, rejected};
    use serde_json::json;

    fn seeded_context() -> Context {
        let mut ctx = Context::new();
        ctx.insert("draft", "plan", json!({"rev": 0})).expect("seed");
        ctx
    }

    fn refinement(
        max_iterations: u32,
        verdicts: Vec<Scripted>,
        revisions: Vec<Scripted>,
        log: &CallLog,
    ) -> RefinementLoop {
        RefinementLoop::new(
            RefinementConfig::new(max_iterations, "plan", "critique"),
            Box::new(ScriptedStage::new(
                StageSpec::new("critic", &["plan"], "critique"),
                verdicts,
                log.clone(),
            )),
            Box::new(ScriptedStage::new(
                StageSpec::new("refiner", &["plan", "critique"], "plan"),
                revisions,
                log.clone(),
            )),
        )
        .expect("loop")
    }

    #[test]
    fn approval_on_first_iteration_stops_after_one_cycle() {
        let log = CallLog::default();
        let refine = refinement(
            3,
            vec![approved()],
            vec![Scripted::Stop("approved".to_string())],
            &log,
        );

        let outcome = refine.run(seeded_context()).expect("run");

        assert_eq!(outcome.state.iteration_count, 1);
        assert!(outcome.state.stopped);
        assert_eq!(
            outcome.stop,
            LoopStop::Approved {
                reason: "approved".to_string()
            }
        );
        assert_eq!(outcome.context.get("plan"), Some(&json!({"rev": 0})));
        assert_eq!(log.calls(), vec!["critic", "refiner"]);
    }

    #[test]
    fn exhausting_budget_is_not_an_error() {
        let log = CallLog::default();
        let refine = refinement(
            3,
            vec![rejected(), rejected(), rejected()],
            vec![
                Scripted::Produce(json!({"rev": 1})),
                Scripted::Produce(json!({"rev": 2})),
                Scripted::Produce(json!({"rev": 3})),
            ],
            &log,
        );

        let outcome = refine.run(seeded_context()).expect("run");

        assert_eq!(outcome.state.iteration_count, 3);
        assert!(!outcome.state.stopped);
        assert_eq!(outcome.stop, LoopStop::NotConverged { max_iterations: 3 });
        assert_eq!(outcome.context.get("plan"), Some(&json!({"rev": 3})));
        assert_eq!(outcome.context.producer("plan"), Some("refiner"));
        assert_eq!(log.calls().len(), 6);
    }

    #[test]
    fn evaluator_sees_latest_revision() {
        let log = CallLog::default();
        let critic = ScriptedStage::new(
            StageSpec::new("critic", &["plan"], "critique"),
            vec![rejected(), approved()],
            log.clone(),
        );
        let seen = critic.seen_values("plan");
        let refine = RefinementLoop::new(
            RefinementConfig::new(3, "plan", "critique"),
            Box::new(critic),
            Box::new(ScriptedStage::new(
                StageSpec::new("refiner", &["plan", "critique"], "plan"),
                vec![
                    Scripted::Produce(json!({"rev": 1})),
                    Scripted::Stop("approved".to_string()),
                ],
                log.clone(),
            )),
        )
        .expect("loop");

        let outcome = refine.run(seeded_context()).expect("run");

        assert_eq!(outcome.state.iteration_count, 2);
        assert_eq!(
            seen.values(),
            vec![Some(json!({"rev": 0})), Some(json!({"rev": 1}))]
        );
    }

    #[test]
    fn approved_verdict_with_revision_is_inconsistent() {
        let log = CallLog::default();
        let refine = refinement(
            3,
            vec![approved()],
            vec![Scripted::Produce(json!({"rev": 1}))],
            &log,
        );

        let err = refine.run(seeded_context()).unwrap_err();
        match err {
            OrchestrationError::InconsistentRevision {
                stage,
                iteration,
                approved,
                ..
            } => {
                assert_eq!(stage, "refiner");
                assert_eq!(iteration, 1);
                assert!(approved);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejected_verdict_with_stop_is_inconsistent() {
        let refine = refinement(
            3,
            vec![rejected()],
            vec![Scripted::Stop("looks fine".to_string())],
            &CallLog::default(),
        );

        let err = refine.run(seeded_context()).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::InconsistentRevision {
                approved: false,
                action: "stop",
                ..
            }
        ));
    }

    #[test]
    fn rejection_without_issues_still_requests_revision() {
        let log = CallLog::default();
        let refine = refinement(
            1,
            vec![Scripted::Produce(json!({"approved": false, "issues": []}))],
            vec![Scripted::Produce(json!({"rev": 1}))],
            &log,
        );

        let outcome = refine.run(seeded_context()).expect("run");
        assert_eq!(outcome.stop, LoopStop::NotConverged { max_iterations: 1 });
        assert_eq!(outcome.context.get("plan"), Some(&json!({"rev": 1})));
    }

    #[test]
    fn approval_flag_wins_over_blocking_issues() {
        let verdict = json!({
            "approved": true,
            "issues": [serde_json::to_value(Issue::new("calories", Severity::Critical, "way off")).expect("issue")]
        });
        let refine = refinement(
            3,
            vec![Scripted::Produce(verdict)],
            vec![Scripted::Stop("approved".to_string())],
            &CallLog::default(),
        );

        let outcome = refine.run(seeded_context()).expect("run");
        assert!(outcome.state.stopped);
        assert_eq!(
            outcome.state.last_verdict.map(|v| v.issues.len()),
            Some(1)
        );
    }

    #[test]
    fn malformed_verdict_aborts_with_iteration() {
        let refine = refinement(
            3,
            vec![rejected(), Scripted::Produce(json!({"verdict": "ok"}))],
            vec![Scripted::Produce(json!({"rev": 1}))],
            &CallLog::default(),
        );

        let err = refine.run(seeded_context()).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::MalformedVerdict { iteration: 2, .. }
        ));
    }

    #[test]
    fn evaluator_failure_propagates_with_provenance() {
        let log = CallLog::default();
        let refine = refinement(
            3,
            vec![Scripted::Fail("lookup timed out".to_string())],
            Vec::new(),
            &log,
        );

        let err = refine.run(seeded_context()).unwrap_err();
        assert_eq!(err.stage(), Some("critic"));
        assert_eq!(err.phase(), Some(Phase::Loop { iteration: 1 }));
        assert_eq!(log.calls(), vec!["critic"]);
    }

    #[test]
    fn evaluator_stop_is_unexpected() {
        let refine = refinement(
            3,
            vec![Scripted::Stop("done".to_string())],
            Vec::new(),
            &CallLog::default(),
        );
        let err = refine.run(seeded_context()).unwrap_err();
        assert!(matches!(err, OrchestrationError::UnexpectedStop { .. }));
    }

    #[test]
    fn missing_artifact_is_reported_before_evaluating() {
        let log = CallLog::default();
        let refine = refinement(3, vec![approved()], Vec::new(), &log);

        let err = refine.run(Context::new()).unwrap_err();
        assert!(matches!(err, OrchestrationError::MissingInput { .. }));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn construction_rejects_zero_iterations_and_mismatched_keys() {
        let log = CallLog::default();
        let stage = |name: &str, output: &str| -> Box<dyn Stage> {
            Box::new(ScriptedStage::new(
                StageSpec::new(name, &[], output),
                Vec::new(),
                log.clone(),
            ))
        };

        assert!(matches!(
            RefinementLoop::new(
                RefinementConfig::new(0, "plan", "critique"),
                stage("critic", "critique"),
                stage("refiner", "plan"),
            ),
            Err(OrchestrationError::InvalidConfig(_))
        ));
        assert!(matches!(
            RefinementLoop::new(
                RefinementConfig::new(3, "plan", "critique"),
                stage("critic", "review"),
                stage("refiner", "plan"),
            ),
            Err(OrchestrationError::InvalidConfig(_))
        ));
        assert!(matches!(
            RefinementLoop::new(
                RefinementConfig::new(3, "plan", "critique"),
                stage("critic", "critique"),
                stage("refiner", "draft"),
            ),
            Err(OrchestrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn required_keys_exclude_verdict() {
        let refine = refinement(3, Vec::new(), Vec::new(), &CallLog::default());
        let keys: Vec<&str> = refine.required_keys().into_iter().collect();
        assert_eq!(keys, vec!["plan"]);
    }
}
