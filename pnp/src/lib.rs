//! Release workflow automation for git repositories.
//!
//! A run walks seven steps (repository, hooks, branch stack, commit, push,
//! tag, release). Every git command goes through a resilient executor that
//! classifies failures, dispatches them to remediation handlers behind a
//! policy gate, and retries within a shared time budget.
//!
//! - **[`core`]**: Pure logic (classification, policy table, retry math,
//!   stable codes). No I/O.
//! - **[`io`]**: Processes, git, files, telemetry and prompts.
//!
//! [`policy`] dispatches classified failures to handlers and [`orchestrator`]
//! drives the steps.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod policy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
