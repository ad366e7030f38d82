//! CLI tests for `planner init` and `planner run`.
//!
//! Spawns the planner binary against a temp directory. The agent is a small
//! shell script that answers drafts and revisions with canned JSON, and the
//! built-in target checks act as the evaluator.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::{Value, json};

use planner::exit_codes;
use planner::io::config::{EvaluatorKind, PlannerConfig, RetryConfig, load_config, write_config};
use planner::io::executor::OUTPUT_PLACEHOLDER;
use planner::io::run_log::read_artifact;

const QUESTIONNAIRE: &str = r#"{
  "age": 30,
  "gender": "male",
  "height_cm": 180,
  "weight_kg": 80,
  "activity_level": "moderate",
  "dietary_preference": "vegetarian",
  "medical_conditions": [],
  "food_allergies": ["peanut"]
}"#;

/// Matches the targets derived from `QUESTIONNAIRE` (2759 kcal).
fn on_target_plan() -> Value {
    json!({
        "meals": [{
            "name": "lunch",
            "items": [{"food": "paneer with rice", "quantity": "1 plate"}],
            "totals": {"calories_kcal": 2759, "protein_g": 96, "carbs_g": 387, "fat_g": 92}
        }],
        "notes": null
    })
}

fn off_target_plan() -> Value {
    json!({
        "meals": [{
            "name": "lunch",
            "items": [{"food": "dal", "quantity": "1 bowl"}],
            "totals": {"calories_kcal": 1500, "protein_g": 50, "carbs_g": 200, "fat_g": 40}
        }],
        "notes": null
    })
}

/// Agent script: reads the prompt on stdin and writes `draft` for draft
/// prompts, `revise` for revision prompts.
fn agent_command(draft: &Value, revise: &Value) -> Vec<String> {
    let script = format!(
        "prompt=$(cat); case \"$prompt\" in *'role:revise'*) printf '%s' '{}' > \"$0\" ;; *) printf '%s' '{}' > \"$0\" ;; esac",
        revise, draft
    );
    vec![
        "sh".to_string(),
        "-c".to_string(),
        script,
        OUTPUT_PLACEHOLDER.to_string(),
    ]
}

fn setup(root: &Path, agent: Vec<String>) {
    fs::write(root.join("quest.json"), QUESTIONNAIRE).expect("write questionnaire");
    fs::write(root.join("measurements.json"), r#"{"hba1c": 5.2}"#).expect("write measurements");

    let mut cfg = PlannerConfig {
        evaluator: EvaluatorKind::Targets,
        retry: RetryConfig {
            attempts: 1,
            initial_delay_ms: 0,
            backoff_base: 1,
        },
        ..PlannerConfig::default()
    };
    cfg.agent.command = agent;
    cfg.agent.timeout_secs = 30;
    write_config(&root.join("planner.toml"), &cfg).expect("write config");
}

fn planner(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_planner"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("spawn planner")
}

fn single_run_dir(root: &Path) -> std::path::PathBuf {
    let runs: Vec<_> = fs::read_dir(root.join(".planner/runs"))
        .expect("runs dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(runs.len(), 1, "expected one run, found {runs:?}");
    runs.into_iter().next().expect("run dir")
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = planner(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join("planner.toml")).expect("load");
    assert_eq!(cfg, PlannerConfig::default());

    let second = planner(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = planner(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn approved_plan_is_printed_and_logged() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(
        temp.path(),
        agent_command(&on_target_plan(), &json!({"action": "stop", "reason": "approved"})),
    );

    let output = planner(temp.path(), &["run"]);

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let printed: Value = serde_json::from_slice(&output.stdout).expect("stdout json");
    assert_eq!(printed, on_target_plan());

    let run_dir = single_run_dir(temp.path());
    let targets = read_artifact(&run_dir.join("pipeline/nutrition_requirements.json")).expect("targets");
    assert_eq!(targets["calories_kcal"], json!(2759.0));
    let critique = read_artifact(&run_dir.join("iterations/1/critique.json")).expect("critique");
    assert_eq!(critique["approved"], json!(true));
    let result = read_artifact(&run_dir.join("result.json")).expect("result");
    assert_eq!(result["status"], json!("approved"));
    assert_eq!(result["iterations_used"], json!(1));
}

#[test]
fn unapproved_plan_exits_not_converged() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(
        temp.path(),
        agent_command(
            &off_target_plan(),
            &json!({"action": "revise", "meal_plan": off_target_plan()}),
        ),
    );

    let output = planner(temp.path(), &["run", "--max-iterations", "2"]);

    assert_eq!(
        output.status.code(),
        Some(exit_codes::NOT_CONVERGED),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let printed: Value = serde_json::from_slice(&output.stdout).expect("stdout json");
    assert_eq!(printed, off_target_plan());

    let run_dir = single_run_dir(temp.path());
    assert!(run_dir.join("iterations/2/meal_plan.json").is_file());
    let result = read_artifact(&run_dir.join("result.json")).expect("result");
    assert_eq!(result["status"], json!("not_converged"));
    assert_eq!(result["iterations_used"], json!(2));
}

#[test]
fn missing_questionnaire_fails_in_intake() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(
        temp.path(),
        agent_command(&on_target_plan(), &json!({"action": "stop", "reason": "approved"})),
    );
    fs::remove_file(temp.path().join("quest.json")).expect("remove questionnaire");

    let output = planner(temp.path(), &["run"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("stage 'patient_data' failed during pipeline"), "{stderr}");
    assert!(stderr.contains("file not found"), "{stderr}");
    assert!(output.stdout.is_empty());

    let result = read_artifact(&single_run_dir(temp.path()).join("result.json")).expect("result");
    assert_eq!(result["status"], json!("failed"));
    assert_eq!(result["error"]["stage"], json!("patient_data"));
}
