//! Meal-planning assistant CLI.
//!
//! `planner run` loads the patient files, derives targets, drafts a plan, and
//! refines it until approval or the iteration budget runs out. The final plan
//! is printed to stdout; artifacts land in `.planner/runs/<run_id>/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use planner::exit_codes;
use planner::io::config::{DEFAULT_CONFIG_PATH, PlannerConfig, load_config, write_config};
use planner::io::executor::CommandExecutor;
use planner::io::run_log::RunLog;
use planner::logging;
use planner::nutrition::{DEFAULT_REQUEST, build_orchestrator};

#[derive(Parser)]
#[command(
    name = "planner",
    version,
    about = "Refine-until-approved meal planning assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `planner.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Draft and refine a meal plan, printing the final plan as JSON.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Request text handed to every stage.
        #[arg(long, default_value = DEFAULT_REQUEST)]
        request: String,
        /// Override `max_iterations` from the config.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run {
            config,
            request,
            max_iterations,
        } => cmd_run(&config, &request, max_iterations),
    }
}

fn cmd_init(config: &Path, force: bool) -> Result<i32> {
    if config.exists() && !force {
        bail!(
            "planner init: {} already exists (use --force to overwrite)",
            config.display()
        );
    }
    write_config(config, &PlannerConfig::default())?;
    println!("{}", config.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config: &Path, request: &str, max_iterations: Option<u32>) -> Result<i32> {
    let mut cfg = load_config(config)?;
    if let Some(max_iterations) = max_iterations {
        cfg.max_iterations = max_iterations;
        cfg.validate()?;
    }

    let executor = Arc::new(CommandExecutor::new(cfg.agent.command.clone())?);
    let orchestrator = build_orchestrator(&cfg, executor)?;
    let mut run_log = RunLog::create(&cfg.runs_dir, Utc::now())?;
    let run_id = run_log.run_id().to_string();
    info!(run_id = %run_id, "run started");

    let result = orchestrator.run_observed(request, |event| run_log.record(event));
    match run_log.finish(&result, Utc::now()) {
        Ok(path) => info!(run_id = %run_id, result = %path.display(), "run log written"),
        Err(err) => warn!(run_id = %run_id, err = %format!("{err:#}"), "run log incomplete"),
    }

    let done = result
        .map_err(|err| anyhow::Error::new(err).context(format!("run {run_id} failed")))?;
    println!("{}", serde_json::to_string_pretty(&done.artifact)?);
    if done.approved {
        eprintln!(
            "{run_id}: approved after {} iteration(s)",
            done.iterations_used
        );
        Ok(exit_codes::OK)
    } else {
        eprintln!(
            "{run_id}: not approved after {} iteration(s); printed the last revision",
            done.iterations_used
        );
        Ok(exit_codes::NOT_CONVERGED)
    }
}
