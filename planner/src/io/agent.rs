//! Stages backed by an external agent process.
//!
//! An [`AgentStage`] renders a prompt from its declared inputs, hands it to an
//! [`Executor`], and turns the agent's JSON answer into an [`Outcome`].
//! Executor failures are retried here, inside the stage; the orchestrator
//! only ever sees the final result. Output that arrives but does not parse or
//! fails its schema is a failure on the first attempt.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::context::Context;
use crate::core::stage::{Outcome, Stage, StageSpec};
use crate::io::executor::{ExecRequest, Executor, execute_and_read};
use crate::io::prompt::PromptEngine;
use crate::io::schema::{MEAL_PLAN_SCHEMA, REVISION_SCHEMA, VERDICT_SCHEMA, validate_against};

/// What an agent-backed stage is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Draft,
    Evaluate,
    Revise,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Evaluate => "evaluate",
            Self::Revise => "revise",
        }
    }

    fn output_schema(self) -> &'static str {
        match self {
            Self::Draft => MEAL_PLAN_SCHEMA,
            Self::Evaluate => VERDICT_SCHEMA,
            Self::Revise => REVISION_SCHEMA,
        }
    }
}

/// Exponential backoff for executor failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub backoff_base: u32,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_base: 1,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_base
            .checked_pow(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Execution settings shared by agent-backed stages.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Directory the agent runs in; per-call scratch dirs are created here.
    pub work_dir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub retry: RetryPolicy,
}

/// The reviser's answer: stop on approval, or a full replacement plan.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RevisionDecision {
    Stop { reason: String },
    Revise { meal_plan: Value },
}

pub struct AgentStage {
    spec: StageSpec,
    role: AgentRole,
    verdict_key: Option<String>,
    executor: Arc<dyn Executor>,
    prompts: Arc<PromptEngine>,
    settings: AgentSettings,
}

impl AgentStage {
    pub fn new(
        spec: StageSpec,
        role: AgentRole,
        executor: Arc<dyn Executor>,
        prompts: Arc<PromptEngine>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            spec,
            role,
            verdict_key: None,
            executor,
            prompts,
            settings,
        }
    }

    /// Context key of the verdict a reviser reacts to.
    pub fn with_verdict_key(mut self, key: impl Into<String>) -> Self {
        self.verdict_key = Some(key.into());
        self
    }

    fn run(&self, ctx: &Context) -> Result<Outcome> {
        let prompt =
            self.prompts
                .render(self.role, ctx, &self.spec.inputs, self.verdict_key.as_deref())?;
        let text = self.call_with_retry(&prompt)?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parse agent output for '{}'", self.spec.name))?;
        validate_against(self.role.output_schema(), &value, self.role.as_str())?;

        match self.role {
            AgentRole::Draft | AgentRole::Evaluate => {
                Ok(Outcome::produced(self.spec.output.clone(), value))
            }
            AgentRole::Revise => {
                let decision: RevisionDecision =
                    serde_json::from_value(value).context("decode revision decision")?;
                match decision {
                    RevisionDecision::Stop { reason } => Ok(Outcome::stop(reason)),
                    RevisionDecision::Revise { meal_plan } => {
                        validate_against(MEAL_PLAN_SCHEMA, &meal_plan, "revised meal plan")?;
                        Ok(Outcome::produced(self.spec.output.clone(), meal_plan))
                    }
                }
            }
        }
    }

    fn call_with_retry(&self, prompt: &str) -> Result<String> {
        fs::create_dir_all(&self.settings.work_dir).with_context(|| {
            format!("create agent work dir {}", self.settings.work_dir.display())
        })?;
        // Paths handed to the agent must not depend on its working directory.
        let work_dir = std::path::absolute(&self.settings.work_dir)
            .with_context(|| format!("resolve {}", self.settings.work_dir.display()))?;

        let attempts = self.settings.retry.attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.settings.retry.delay_before(attempt - 1);
                warn!(
                    stage = %self.spec.name,
                    attempt,
                    delay = ?delay,
                    "retrying agent call"
                );
                thread::sleep(delay);
            }
            match self.call_once(&work_dir, prompt) {
                Ok(text) => {
                    debug!(stage = %self.spec.name, attempt, "agent answered");
                    return Ok(text);
                }
                Err(err) => {
                    warn!(stage = %self.spec.name, attempt, err = %format!("{err:#}"), "agent call failed");
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("agent was never called"));
        Err(err.context(format!(
            "agent for '{}' failed after {attempts} attempt(s)",
            self.spec.name
        )))
    }

    fn call_once(&self, work_dir: &Path, prompt: &str) -> Result<String> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", self.spec.name))
            .tempdir_in(work_dir)
            .context("create agent scratch dir")?;
        let output_schema_path = scratch.path().join("output.schema.json");
        fs::write(&output_schema_path, self.role.output_schema())
            .with_context(|| format!("write {}", output_schema_path.display()))?;

        let request = ExecRequest {
            workdir: work_dir.to_path_buf(),
            prompt: prompt.to_string(),
            output_schema_path,
            output_path: scratch.path().join("output.json"),
            log_path: scratch.path().join("agent.log"),
            timeout: self.settings.timeout,
            output_limit_bytes: self.settings.output_limit_bytes,
        };
        execute_and_read(self.executor.as_ref(), &request)
    }
}

impl Stage for AgentStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &Context) -> Outcome {
        info!(stage = %self.spec.name, role = self.role.as_str(), "invoking agent");
        self.run(ctx).into()
    }
}
