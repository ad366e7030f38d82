//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples agent-backed stages from the actual agent
//! backend (an external CLI such as `codex exec`). Tests use scripted
//! executors that write predetermined outputs without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_with_deadline;

/// Placeholder replaced with the output path in command arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Placeholder replaced with the output JSON Schema path in command arguments.
pub const SCHEMA_PLACEHOLDER: &str = "{schema}";

/// Parameters for a single executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    /// JSON Schema constraining the agent's output.
    pub output_schema_path: PathBuf,
    /// Path where the agent must write its output JSON.
    pub output_path: PathBuf,
    /// Path to write the agent's stdout/stderr log.
    pub log_path: PathBuf,
    pub timeout: Duration,
    /// Truncate captured agent output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over agent execution backends.
pub trait Executor: Send + Sync {
    /// Run the agent. Must write output to `request.output_path`.
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Executor that spawns a configured command line.
///
/// `{output}` and `{schema}` inside any argument are substituted with the
/// request's paths; the prompt is written to stdin.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("agent command must be a non-empty array"));
        }
        Ok(Self { command })
    }

    fn build(&self, request: &ExecRequest) -> Command {
        let output = request.output_path.display().to_string();
        let schema = request.output_schema_path.display().to_string();
        let mut args = self.command.iter().map(|arg| {
            arg.replace(OUTPUT_PLACEHOLDER, &output)
                .replace(SCHEMA_PLACEHOLDER, &schema)
        });
        // `new` guarantees a program name.
        let mut cmd = Command::new(args.next().unwrap_or_default());
        cmd.args(args).current_dir(&request.workdir);
        cmd
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(program = %self.command[0], timeout_secs = request.timeout.as_secs()))]
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting agent");
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let output = run_with_deadline(
            self.build(request),
            Some(request.prompt.clone().into_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run agent command")?;
        write_log(&request.log_path, &output.render_log("agent"))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!(
                "agent exited with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(500)
            ));
        }

        debug!("agent completed successfully");
        Ok(())
    }
}

/// Execute the agent and return its raw output text.
///
/// Only execution problems surface here; what the text contains is the
/// caller's concern.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn execute_and_read<E: Executor + ?Sized>(
    executor: &E,
    request: &ExecRequest,
) -> Result<String> {
    executor.exec(request)?;
    if !request.output_path.exists() {
        return Err(anyhow!(
            "missing agent output {}",
            request.output_path.display()
        ));
    }
    fs::read_to_string(&request.output_path)
        .with_context(|| format!("read agent output {}", request.output_path.display()))
}

fn write_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write agent log {}", path.display()))
}
