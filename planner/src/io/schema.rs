//! Embedded JSON Schemas for agent output, with validation helpers.

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

pub const VERDICT_SCHEMA: &str = include_str!("../../schemas/verdict.schema.json");
pub const MEAL_PLAN_SCHEMA: &str = include_str!("../../schemas/meal_plan.schema.json");
pub const REVISION_SCHEMA: &str = include_str!("../../schemas/revision.schema.json");

/// Validate `value` against the schema text, naming `label` in errors.
pub fn validate_against(schema: &str, value: &Value, label: &str) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(schema).with_context(|| format!("parse {label} schema"))?;
    let compiled = validator_for(&schema_value)
        .map_err(|err| anyhow!("invalid {label} schema: {err}"))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{label} schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_schemas_compile() {
        for schema in [VERDICT_SCHEMA, MEAL_PLAN_SCHEMA, REVISION_SCHEMA] {
            let value: Value = serde_json::from_str(schema).expect("parse schema");
            validator_for(&value).expect("compile schema");
        }
    }

    #[test]
    fn verdict_schema_requires_known_severity() {
        let ok = json!({
            "approved": false,
            "issues": [{"category": "macros", "severity": "minor", "description": "d", "suggested_fix": null}]
        });
        validate_against(VERDICT_SCHEMA, &ok, "verdict").expect("valid");

        let bad = json!({
            "approved": false,
            "issues": [{"category": "macros", "severity": "urgent", "description": "d", "suggested_fix": null}]
        });
        let err = validate_against(VERDICT_SCHEMA, &bad, "verdict").unwrap_err();
        assert!(err.to_string().starts_with("verdict schema validation failed"));
    }

    #[test]
    fn revision_schema_distinguishes_actions() {
        validate_against(
            REVISION_SCHEMA,
            &json!({"action": "stop", "reason": "approved"}),
            "revision",
        )
        .expect("stop");
        validate_against(
            REVISION_SCHEMA,
            &json!({"action": "revise", "meal_plan": {"meals": []}}),
            "revision",
        )
        .expect("revise");
        assert!(
            validate_against(REVISION_SCHEMA, &json!({"action": "revise"}), "revision").is_err()
        );
    }

    #[test]
    fn revision_schema_rejects_stop_carrying_a_plan() {
        let both = json!({"action": "stop", "reason": "approved", "meal_plan": {"meals": []}});
        assert!(validate_against(REVISION_SCHEMA, &both, "revision").is_err());
    }
}
