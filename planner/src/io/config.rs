//! Planner configuration stored in `planner.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::agent::{AgentSettings, RetryPolicy};
use crate::io::executor::{OUTPUT_PLACEHOLDER, SCHEMA_PLACEHOLDER};
use crate::looping::DEFAULT_MAX_ITERATIONS;

/// Config file name looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "planner.toml";

/// Planner configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults. Relative paths are
/// resolved against the process working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Upper bound on evaluate+revise cycles.
    pub max_iterations: u32,

    /// Patient questionnaire (JSON).
    pub questionnaire_path: PathBuf,

    /// Blood-test measurements (JSON).
    pub measurements_path: PathBuf,

    /// Directory agents run in; scratch files live here during a call.
    pub work_dir: PathBuf,

    /// Where per-run artifacts are written.
    pub runs_dir: PathBuf,

    pub evaluator: EvaluatorKind,

    pub agent: AgentConfig,

    pub retry: RetryConfig,
}

/// Which stage judges the meal plan.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    /// The external agent reviews the plan.
    #[default]
    Agent,
    /// Deterministic comparison against the computed targets.
    Targets,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command line of the agent CLI. `{output}` and `{schema}` are
    /// substituted per call; the prompt arrives on stdin.
    pub command: Vec<String>,

    /// Per-call wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "--output-schema".to_string(),
                SCHEMA_PLACEHOLDER.to_string(),
                "--output-last-message".to_string(),
                OUTPUT_PLACEHOLDER.to_string(),
                "-".to_string(),
            ],
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per agent call, including the first.
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_base: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay_ms: 1000,
            backoff_base: 7,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            questionnaire_path: PathBuf::from("quest.json"),
            measurements_path: PathBuf::from("measurements.json"),
            work_dir: PathBuf::from(".planner/work"),
            runs_dir: PathBuf::from(".planner/runs"),
            evaluator: EvaluatorKind::default(),
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.retry.attempts == 0 {
            return Err(anyhow!("retry.attempts must be > 0"));
        }
        if self.retry.backoff_base == 0 {
            return Err(anyhow!("retry.backoff_base must be > 0"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            backoff_base: self.retry.backoff_base,
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            work_dir: self.work_dir.clone(),
            timeout: Duration::from_secs(self.agent.timeout_secs),
            output_limit_bytes: self.agent.output_limit_bytes,
            retry: self.retry_policy(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlannerConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlannerConfig> {
    if !path.exists() {
        let cfg = PlannerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlannerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PlannerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PlannerConfig::default());
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.evaluator, EvaluatorKind::Agent);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("planner.toml");
        let cfg = PlannerConfig {
            evaluator: EvaluatorKind::Targets,
            max_iterations: 5,
            ..PlannerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("planner.toml");
        fs::write(
            &path,
            "max_iterations = 2\nevaluator = \"targets\"\n\n[retry]\nattempts = 1\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 2);
        assert_eq!(cfg.evaluator, EvaluatorKind::Targets);
        assert_eq!(cfg.retry.attempts, 1);
        assert_eq!(cfg.retry.backoff_base, 7);
        assert_eq!(cfg.agent, AgentConfig::default());
    }

    #[test]
    fn rejects_zero_iterations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("planner.toml");
        fs::write(&path, "max_iterations = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations must be > 0"));
    }

    #[test]
    fn retry_policy_uses_milliseconds() {
        let cfg = PlannerConfig::default();
        let policy = cfg.retry_policy();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay_before(2), Duration::from_secs(7));
    }
}
