//! Per-run artifacts under `.planner/runs/<run_id>/`.
//!
//! Layout:
//!
//! ```text
//! <run_id>/
//!   pipeline/<key>.json          outputs of the sequential pass
//!   iterations/<n>/<key>.json    verdict and revised artifact of cycle n
//!   iterations/<n>/summary.json  verdict plus whether the loop stopped
//!   result.json                  final status
//! ```
//!
//! The log is fed [`RunEvent`]s by the orchestrator; it is a product artifact
//! and independent of `RUST_LOG`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::{OrchestrationError, Phase};
use crate::core::event::RunEvent;
use crate::core::verdict::EvaluationVerdict;
use crate::looping::LoopStop;
use crate::orchestrator::FinalResult;

const MAX_ID_SUFFIX: u32 = 999;

/// Paths inside one run directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub pipeline_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub result_path: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            pipeline_dir: dir.join("pipeline"),
            iterations_dir: dir.join("iterations"),
            result_path: dir.join("result.json"),
            dir,
        }
    }

    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.iterations_dir.join(iteration.to_string())
    }
}

/// Final status written to `result.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Approved,
    NotConverged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: String,
    pub iterations_used: Option<u32>,
    pub stop: Option<LoopStop>,
    pub last_verdict: Option<EvaluationVerdict>,
    pub error: Option<RunFailure>,
}

/// Failure provenance recorded for a failed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub stage: Option<String>,
    pub phase: Option<Phase>,
    pub message: String,
}

impl RunFailure {
    pub fn from_error(err: &OrchestrationError) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            stage: err.stage().map(str::to_string),
            phase: err.phase(),
            message,
        }
    }
}

#[derive(Debug, Serialize)]
struct IterationSummary<'a> {
    iteration: u32,
    verdict: &'a EvaluationVerdict,
    stopped: bool,
}

/// Writer for one run's artifacts.
///
/// Event handlers cannot return errors, so the first write failure is kept
/// and reported by [`RunLog::finish`].
#[derive(Debug)]
pub struct RunLog {
    run_id: String,
    paths: RunPaths,
    started_at: DateTime<Utc>,
    write_error: Option<anyhow::Error>,
}

impl RunLog {
    /// Create a fresh run directory under `runs_dir`.
    ///
    /// The id is `run-<UTC timestamp>`; `-2`, `-3`, ... are appended when a
    /// directory with that name already exists.
    pub fn create(runs_dir: &Path, now: DateTime<Utc>) -> Result<Self> {
        fs::create_dir_all(runs_dir)
            .with_context(|| format!("create runs dir {}", runs_dir.display()))?;
        let base = format!("run-{}", now.format("%Y%m%dT%H%M%SZ"));

        for suffix in 1..=MAX_ID_SUFFIX {
            let run_id = if suffix == 1 {
                base.clone()
            } else {
                format!("{base}-{suffix}")
            };
            let paths = RunPaths::new(runs_dir, &run_id);
            match fs::create_dir(&paths.dir) {
                Ok(()) => {
                    debug!(run_id = %run_id, dir = %paths.dir.display(), "run dir created");
                    return Ok(Self {
                        run_id,
                        paths,
                        started_at: now,
                        write_error: None,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create run dir {}", paths.dir.display()));
                }
            }
        }

        Err(anyhow!(
            "unable to allocate run id from base '{base}' (too many existing runs)"
        ))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Persist whatever `event` carries. Safe to pass as the orchestrator's
    /// observer.
    pub fn record(&mut self, event: &RunEvent<'_>) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(err) = self.write_event(event) {
            warn!(run_id = %self.run_id, err = %format!("{err:#}"), "failed to write run artifact");
            self.write_error = Some(err);
        }
    }

    fn write_event(&self, event: &RunEvent<'_>) -> Result<()> {
        match *event {
            RunEvent::StageStarted { .. } => Ok(()),
            RunEvent::OutputRecorded {
                phase, key, value, ..
            } => {
                let dir = match phase {
                    Phase::Pipeline => self.paths.pipeline_dir.clone(),
                    Phase::Loop { iteration } => self.paths.iteration_dir(iteration),
                };
                write_json(&dir.join(artifact_file_name(key)), value)
            }
            RunEvent::IterationFinished {
                iteration,
                verdict,
                stopped,
            } => write_json(
                &self.paths.iteration_dir(iteration).join("summary.json"),
                &IterationSummary {
                    iteration,
                    verdict,
                    stopped,
                },
            ),
        }
    }

    /// Write `result.json` for a finished run, then surface any earlier write
    /// failure. The result is written even when artifacts are missing.
    pub fn finish(
        self,
        result: &Result<FinalResult, OrchestrationError>,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let record = match result {
            Ok(done) => RunRecord {
                run_id: self.run_id.clone(),
                status: if done.approved {
                    RunStatus::Approved
                } else {
                    RunStatus::NotConverged
                },
                started_at: timestamp(self.started_at),
                finished_at: timestamp(now),
                iterations_used: Some(done.iterations_used),
                stop: Some(done.stop.clone()),
                last_verdict: done.last_verdict.clone(),
                error: None,
            },
            Err(err) => RunRecord {
                run_id: self.run_id.clone(),
                status: RunStatus::Failed,
                started_at: timestamp(self.started_at),
                finished_at: timestamp(now),
                iterations_used: None,
                stop: None,
                last_verdict: None,
                error: Some(RunFailure::from_error(err)),
            },
        };
        write_json(&self.paths.result_path, &record)?;
        if let Some(err) = self.write_error {
            return Err(err.context(format!("run log {} is incomplete", self.run_id)));
        }
        Ok(self.paths.result_path)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Context keys are stage-chosen; keep them to a safe file name.
fn artifact_file_name(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.json")
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// Read back a JSON artifact, mainly for tests and tooling.
pub fn read_artifact(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
