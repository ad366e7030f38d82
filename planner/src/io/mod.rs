//! Side-effecting helpers: config, agent processes, prompts, run artifacts.

pub mod agent;
pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod schema;
