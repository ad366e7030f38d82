//! Prompt rendering for agent-backed stages.

use anyhow::{Context as _, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::context::Context;
use crate::core::verdict::EvaluationVerdict;
use crate::io::agent::AgentRole;
use crate::orchestrator::REQUEST_KEY;

const DRAFT_TEMPLATE: &str = include_str!("prompts/draft.md");
const EVALUATE_TEMPLATE: &str = include_str!("prompts/evaluate.md");
const REVISE_TEMPLATE: &str = include_str!("prompts/revise.md");

/// One context entry rendered into a prompt.
#[derive(Debug, Clone, Serialize)]
struct PromptInput {
    key: String,
    json: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for role in [AgentRole::Draft, AgentRole::Evaluate, AgentRole::Revise] {
            env.add_template(role.as_str(), template_source(role))
                .with_context(|| format!("load {} template", role.as_str()))?;
        }
        Ok(Self { env })
    }

    /// Render the prompt for `role` from the declared `inputs`.
    ///
    /// Revision prompts also need `verdict_key` to tell the agent whether to
    /// stop or revise.
    pub fn render(
        &self,
        role: AgentRole,
        ctx: &Context,
        inputs: &[String],
        verdict_key: Option<&str>,
    ) -> Result<String> {
        let request = ctx
            .get(REQUEST_KEY)
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        let rendered_inputs = inputs
            .iter()
            .filter(|key| key.as_str() != REQUEST_KEY)
            .filter_map(|key| ctx.get(key).map(|value| (key, value)))
            .map(|(key, value)| -> Result<PromptInput> {
                Ok(PromptInput {
                    key: key.clone(),
                    json: serde_json::to_string_pretty(value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (approved, issue_count) = match verdict_key {
            Some(key) if role == AgentRole::Revise => {
                let verdict: EvaluationVerdict = ctx.get_as(key)?;
                (verdict.approved, verdict.issues.len())
            }
            _ => (false, 0),
        };

        let template = self.env.get_template(role.as_str())?;
        let prompt = template
            .render(context! {
                request => request,
                inputs => rendered_inputs,
                approved => approved,
                issue_count => issue_count,
                verdict_key => verdict_key,
            })
            .with_context(|| format!("render {} prompt", role.as_str()))?;
        debug!(role = role.as_str(), bytes = prompt.len(), "prompt rendered");
        Ok(prompt)
    }
}

fn template_source(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Draft => DRAFT_TEMPLATE,
        AgentRole::Evaluate => EVALUATE_TEMPLATE,
        AgentRole::Revise => REVISE_TEMPLATE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(verdict: serde_json::Value) -> Context {
        let mut ctx = Context::new();
        ctx.insert("orchestrator", REQUEST_KEY, json!("Generate a meal plan"))
            .expect("request");
        ctx.insert("meal_planner", "meal_plan", json!({"meals": []}))
            .expect("plan");
        ctx.insert("meal_validator", "critique", verdict)
            .expect("critique");
        ctx
    }

    #[test]
    fn draft_prompt_includes_request_and_inputs() {
        let engine = PromptEngine::new().expect("engine");
        let ctx = ctx_with(json!({"approved": false, "issues": []}));
        let inputs = vec![REQUEST_KEY.to_string(), "meal_plan".to_string()];

        let prompt = engine
            .render(AgentRole::Draft, &ctx, &inputs, None)
            .expect("render");

        assert!(prompt.contains("<!-- role:draft -->"));
        assert!(prompt.contains("Request: Generate a meal plan"));
        assert!(prompt.contains("## meal_plan"));
        assert!(!prompt.contains("## request"));
    }

    #[test]
    fn revise_prompt_asks_for_stop_when_approved() {
        let engine = PromptEngine::new().expect("engine");
        let ctx = ctx_with(json!({"approved": true, "issues": []}));
        let inputs = vec!["meal_plan".to_string(), "critique".to_string()];

        let prompt = engine
            .render(AgentRole::Revise, &ctx, &inputs, Some("critique"))
            .expect("render");

        assert!(prompt.contains("\"action\": \"stop\""));
        assert!(!prompt.contains("\"action\": \"revise\""));
    }

    #[test]
    fn revise_prompt_without_issues_asks_for_reverification() {
        let engine = PromptEngine::new().expect("engine");
        let ctx = ctx_with(json!({"approved": false, "issues": []}));
        let inputs = vec!["meal_plan".to_string(), "critique".to_string()];

        let prompt = engine
            .render(AgentRole::Revise, &ctx, &inputs, Some("critique"))
            .expect("render");

        assert!(prompt.contains("\"action\": \"revise\""));
        assert!(prompt.contains("re-verify portion sizes"));
    }

    #[test]
    fn revise_prompt_requires_a_verdict() {
        let engine = PromptEngine::new().expect("engine");
        let mut ctx = Context::new();
        ctx.insert("meal_planner", "meal_plan", json!({})).expect("plan");

        let err = engine
            .render(AgentRole::Revise, &ctx, &["meal_plan".to_string()], Some("critique"))
            .unwrap_err();
        assert!(err.to_string().contains("critique"));
    }
}
