//! Scripted stages and executors for tests.

use std::collections::VecDeque;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::context::Context;
use crate::core::stage::{Outcome, Stage, StageSpec};
use crate::io::executor::{ExecRequest, Executor};

/// Shared, ordered record of which stages executed.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, name: &str) {
        lock(&self.calls).push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

/// One scripted response of a [`ScriptedStage`].
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Produce a value under the stage's declared output.
    Produce(Value),
    /// Produce a value under an explicit key.
    ProduceUnder(String, Value),
    Stop(String),
    Fail(String),
}

/// Stage returning queued responses in order.
///
/// Fails once the queue is exhausted.
pub struct ScriptedStage {
    spec: StageSpec,
    script: Mutex<VecDeque<Scripted>>,
    log: CallLog,
    seen: Arc<Mutex<Vec<Context>>>,
}

impl ScriptedStage {
    pub fn new(spec: StageSpec, script: Vec<Scripted>, log: CallLog) -> Self {
        Self {
            spec,
            script: Mutex::new(script.into()),
            log,
            seen: Arc::default(),
        }
    }

    /// Handle to the values of `key` as observed on each execution.
    pub fn seen_values(&self, key: &str) -> SeenValues {
        SeenValues {
            key: key.to_string(),
            seen: self.seen.clone(),
        }
    }
}

impl Stage for ScriptedStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &Context) -> Outcome {
        self.log.record(&self.spec.name);
        lock(&self.seen).push(ctx.clone());
        match lock(&self.script).pop_front() {
            Some(Scripted::Produce(value)) => Outcome::produced(self.spec.output.clone(), value),
            Some(Scripted::ProduceUnder(key, value)) => Outcome::produced(key, value),
            Some(Scripted::Stop(reason)) => Outcome::stop(reason),
            Some(Scripted::Fail(message)) => Outcome::Failed(anyhow!(message)),
            None => Outcome::Failed(anyhow!("script for '{}' exhausted", self.spec.name)),
        }
    }
}

/// Values of one context key across executions of a [`ScriptedStage`].
#[derive(Debug, Clone)]
pub struct SeenValues {
    key: String,
    seen: Arc<Mutex<Vec<Context>>>,
}

impl SeenValues {
    pub fn values(&self) -> Vec<Option<Value>> {
        lock(&self.seen)
            .iter()
            .map(|ctx| ctx.get(&self.key).cloned())
            .collect()
    }
}

/// Scripted evaluator response approving the artifact.
pub fn approved() -> Scripted {
    Scripted::Produce(json!({"approved": true, "issues": []}))
}

/// Scripted evaluator response rejecting the artifact with one major issue.
pub fn rejected() -> Scripted {
    Scripted::Produce(json!({
        "approved": false,
        "issues": [{
            "category": "calories",
            "severity": "major",
            "description": "daily total misses target",
            "suggested_fix": "adjust portions"
        }]
    }))
}

/// One scripted executor response.
#[derive(Debug, Clone)]
pub enum ScriptedExec {
    /// Write this JSON to the request's output path.
    Output(Value),
    /// Write raw text (e.g. invalid JSON) to the output path.
    Raw(String),
    /// Return an error without writing output.
    Error(String),
}

/// Executor returning queued responses; records every prompt it receives.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<ScriptedExec>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(responses: Vec<ScriptedExec>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::default(),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        lock(&self.prompts).push(request.prompt.clone());
        match lock(&self.responses).pop_front() {
            Some(ScriptedExec::Output(value)) => {
                fs::write(&request.output_path, serde_json::to_string_pretty(&value)?)?;
                Ok(())
            }
            Some(ScriptedExec::Raw(text)) => {
                fs::write(&request.output_path, text)?;
                Ok(())
            }
            Some(ScriptedExec::Error(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted executor exhausted")),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
