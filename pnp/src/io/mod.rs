//! Side-effecting helpers: processes, git, files, telemetry and prompts.

pub mod backup;
pub mod branch_stack;
pub mod changelog;
pub mod config;
pub mod executor;
pub mod git;
pub mod hooks;
pub mod process;
pub mod prompt;
pub mod release;
pub mod remediation;
pub mod repo;
pub mod telemetry;
