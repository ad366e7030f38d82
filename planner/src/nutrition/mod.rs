//! The meal-planning assistant assembled from generic stages.
//!
//! Pipeline: `patient_data` → `nutrition_calculator` → `meal_planner`.
//! Refinement: `meal_validator` judges `meal_plan`, `meal_refiner` either
//! stops on approval or rewrites the plan.

pub mod checks;
pub mod intake;
pub mod targets;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::core::stage::{Stage, StageSpec};
use crate::io::agent::{AgentRole, AgentStage};
use crate::io::config::{EvaluatorKind, PlannerConfig};
use crate::io::executor::Executor;
use crate::io::prompt::PromptEngine;
use crate::looping::{RefinementConfig, RefinementLoop};
use crate::orchestrator::{Orchestrator, REQUEST_KEY};
use crate::pipeline::Pipeline;

pub const PATIENT_DATA_KEY: &str = "patient_health_data";
pub const REQUIREMENTS_KEY: &str = "nutrition_requirements";
pub const MEAL_PLAN_KEY: &str = "meal_plan";
pub const CRITIQUE_KEY: &str = "critique";

pub const PATIENT_DATA_STAGE: &str = "patient_data";
pub const REQUIREMENTS_STAGE: &str = "nutrition_calculator";
pub const PLANNER_STAGE: &str = "meal_planner";
pub const VALIDATOR_STAGE: &str = "meal_validator";
pub const REFINER_STAGE: &str = "meal_refiner";

/// Request used when the caller does not supply one.
pub const DEFAULT_REQUEST: &str = "Generate a meal plan for the user";

/// Wire the meal-planning stages into an orchestrator.
pub fn build_orchestrator(
    cfg: &PlannerConfig,
    executor: Arc<dyn Executor>,
) -> Result<Orchestrator> {
    let prompts = Arc::new(PromptEngine::new()?);
    let settings = cfg.agent_settings();
    let agent = |spec: StageSpec, role: AgentRole| {
        AgentStage::new(spec, role, executor.clone(), prompts.clone(), settings.clone())
    };

    let pipeline = Pipeline::new(vec![
        Box::new(intake::IntakeStage::new(
            cfg.questionnaire_path.clone(),
            cfg.measurements_path.clone(),
        )),
        Box::new(targets::TargetsStage::new()),
        Box::new(agent(
            StageSpec::new(
                PLANNER_STAGE,
                &[REQUEST_KEY, PATIENT_DATA_KEY, REQUIREMENTS_KEY],
                MEAL_PLAN_KEY,
            ),
            AgentRole::Draft,
        )),
    ]);

    let evaluator: Box<dyn Stage> = match cfg.evaluator {
        EvaluatorKind::Agent => Box::new(agent(
            StageSpec::new(
                VALIDATOR_STAGE,
                &[REQUEST_KEY, MEAL_PLAN_KEY, REQUIREMENTS_KEY, PATIENT_DATA_KEY],
                CRITIQUE_KEY,
            ),
            AgentRole::Evaluate,
        )),
        EvaluatorKind::Targets => Box::new(checks::TargetCheckEvaluator::new()),
    };
    let reviser = agent(
        StageSpec::new(
            REFINER_STAGE,
            &[
                REQUEST_KEY,
                MEAL_PLAN_KEY,
                CRITIQUE_KEY,
                REQUIREMENTS_KEY,
                PATIENT_DATA_KEY,
            ],
            MEAL_PLAN_KEY,
        ),
        AgentRole::Revise,
    )
    .with_verdict_key(CRITIQUE_KEY);

    let refinement = RefinementLoop::new(
        RefinementConfig::new(cfg.max_iterations, MEAL_PLAN_KEY, CRITIQUE_KEY),
        evaluator,
        Box::new(reviser),
    )?;
    let orchestrator = Orchestrator::new(pipeline, refinement)?;
    info!(
        stages = orchestrator.pipeline().len(),
        evaluator = ?cfg.evaluator,
        max_iterations = cfg.max_iterations,
        "orchestrator assembled"
    );
    Ok(orchestrator)
}
