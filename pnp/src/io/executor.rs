//! Resilient git command executor.
//!
//! Every git invocation made by the workflow goes through
//! [`ResilientExecutor::run`]. A failing command is classified, dispatched to
//! its remediation handler, and retried when the handler says `RETRY`, inside
//! a time budget that is shared by the whole retry chain. Two guards stop
//! runaway chains: the idempotency guard (identical failure signature seen
//! again) and the circuit breaker (too many failures with one code).

use std::cell::RefCell;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::classifier::Classifier;
use crate::core::retry::{GuardTrip, RetryState, failure_signature, policy_for};
use crate::core::types::StepVerdict;
use crate::exit_codes;
use crate::io::config::RuntimeFlags;
use crate::io::process::{CommandRunner, CommandSpec, ProcessOutput, interrupted, sleep_interruptibly};
use crate::io::telemetry::{EventSink, redact};
use crate::policy::PolicyEngine;

pub const BUDGET_EXCEEDED_MESSAGE: &str = "git step timeout budget exceeded";
pub const CANCELLED_MESSAGE: &str = "cancelled by user";
pub const IDEMPOTENCY_MESSAGE: &str = "idempotency guard: repeated identical failure";

/// Source of backoff jitter samples in `[0, 1)`.
pub trait Jitter {
    fn sample(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Always returns the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Sleeps between attempts. Returns `false` when interrupted.
pub type Sleeper = fn(Duration) -> bool;

/// Result of one logical command, after any retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub code: i32,
    pub output: String,
}

impl ExecResult {
    fn new(code: i32, output: impl Into<String>) -> Self {
        Self {
            code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == exit_codes::OK
    }
}

pub struct ResilientExecutor<'a> {
    runner: &'a dyn CommandRunner,
    classifier: Classifier,
    policy: PolicyEngine<'a>,
    events: &'a dyn EventSink,
    flags: &'a RuntimeFlags,
    jitter: Box<dyn Jitter>,
    sleeper: Sleeper,
    command_timeout: Duration,
    budget: Duration,
    last_code: RefCell<Option<String>>,
}

impl<'a> ResilientExecutor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        policy: PolicyEngine<'a>,
        events: &'a dyn EventSink,
        flags: &'a RuntimeFlags,
        command_timeout: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            runner,
            classifier: Classifier::new(),
            policy,
            events,
            flags,
            jitter: Box::new(RandomJitter),
            sleeper: sleep_interruptibly,
            command_timeout,
            budget,
            last_code: RefCell::new(None),
        }
    }

    pub fn with_jitter(mut self, jitter: impl Jitter + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn flags(&self) -> &RuntimeFlags {
        self.flags
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn policy(&self) -> &PolicyEngine<'a> {
        &self.policy
    }

    /// Most recent classified code since the last call, for failure attribution.
    pub fn take_last_code(&self) -> Option<String> {
        self.last_code.borrow_mut().take()
    }

    /// Run a mutating git command. Dry-run skips it without spawning anything.
    pub fn run(&self, args: &[&str], cwd: &Path) -> Result<ExecResult> {
        if self.flags.dry_run {
            let command = redact(&format!("git {}", args.join(" ")));
            info!(command = %command, "dry-run: command skipped");
            return Ok(ExecResult::new(exit_codes::INVALID, format!("[dry-run] skipped {command}")));
        }
        self.run_resilient(args, cwd)
    }

    /// Run a read-only git command; executed even in dry-run.
    pub fn run_read_only(&self, args: &[&str], cwd: &Path) -> Result<ExecResult> {
        self.run_resilient(args, cwd)
    }

    #[instrument(skip_all, fields(command = %redact(&args.join(" "))))]
    fn run_resilient(&self, args: &[&str], cwd: &Path) -> Result<ExecResult> {
        let result = self.attempt_chain(args, cwd);
        self.policy.remediator().restore_pending_stash(cwd);
        result
    }

    fn attempt_chain(&self, args: &[&str], cwd: &Path) -> Result<ExecResult> {
        let started = Instant::now();
        let mut state = RetryState::new(self.budget);
        let arg_vec: Vec<String> = args.iter().map(|a| a.to_string()).collect();

        loop {
            if interrupted() {
                return Ok(ExecResult::new(exit_codes::INTERRUPTED, CANCELLED_MESSAGE));
            }
            let Some(remaining) = remaining_budget(started, state.budget) else {
                return Ok(self.budget_exceeded(args));
            };

            let spec = CommandSpec::git(args, cwd, remaining.min(self.command_timeout));
            let out = self.runner.run(&spec)?;
            if out.code == exit_codes::INTERRUPTED {
                return Ok(ExecResult::new(exit_codes::INTERRUPTED, CANCELLED_MESSAGE));
            }
            if out.success() {
                return Ok(ExecResult::new(exit_codes::OK, out.combined()));
            }
            if out.stderr.trim().is_empty() {
                debug!(code = out.code, "command failed without stderr");
                return Ok(unchanged(&out));
            }

            let classification = self.classifier.classify(&out.stderr);
            let code = classification.code.clone();
            *self.last_code.borrow_mut() = Some(code.clone());
            self.events.emit(
                "classification",
                None,
                json!({
                    "command": format!("git {}", args.join(" ")),
                    "exit_code": out.code,
                    "code": code,
                    "severity": classification.severity.as_str(),
                    "handler": classification.handler.name(),
                    "attempt": state.tries + 1,
                }),
            );

            let decision = self.policy.decide(&classification, &out.stderr, cwd);

            let signature = failure_signature(cwd, &arg_vec, &code, &out.stderr);
            match state.record_failure(&code, &signature) {
                Some(GuardTrip::Idempotency) => {
                    warn!(code = %code, "identical failure repeated");
                    self.emit_guard("idempotency", &code);
                    return Ok(ExecResult::new(exit_codes::IDEMPOTENCY_GUARD, IDEMPOTENCY_MESSAGE));
                }
                Some(GuardTrip::CircuitBreaker { code }) => {
                    warn!(code = %code, "circuit breaker tripped");
                    self.emit_guard("circuit_breaker", &code);
                    return Ok(ExecResult::new(
                        exit_codes::CIRCUIT_BREAKER,
                        format!("circuit breaker: repeated failures for {code}"),
                    ));
                }
                None => {}
            }

            match decision.result {
                StepVerdict::Retry => {
                    let policy = policy_for(&code);
                    state.narrow_budget(&code);
                    let Some(ceiling) = state.retry_ceiling(&policy) else {
                        debug!(code = %code, tries = state.tries, "retry ceiling reached");
                        return Ok(unchanged(&out));
                    };
                    let Some(left) = remaining_budget(started, state.budget) else {
                        return Ok(self.budget_exceeded(args));
                    };
                    let delay = policy.delay(state.tries, self.jitter.sample()).min(left);
                    self.events.emit(
                        "retry",
                        None,
                        json!({
                            "code": code,
                            "attempt": state.tries + 1,
                            "max_retries": ceiling,
                            "delay_s": delay.as_secs_f64(),
                        }),
                    );
                    info!(code = %code, attempt = state.tries + 1, delay_ms = delay.as_millis() as u64, "retrying");
                    if !(self.sleeper)(delay) {
                        return Ok(ExecResult::new(exit_codes::INTERRUPTED, CANCELLED_MESSAGE));
                    }
                    state.tries += 1;
                }
                StepVerdict::Ok => return Ok(ExecResult::new(exit_codes::OK, out.combined())),
                _ => return Ok(unchanged(&out)),
            }
        }
    }

    fn budget_exceeded(&self, args: &[&str]) -> ExecResult {
        warn!(command = %redact(&args.join(" ")), "retry budget exhausted");
        self.events.emit(
            "timeout_budget_exceeded",
            None,
            json!({ "command": format!("git {}", args.join(" ")) }),
        );
        ExecResult::new(exit_codes::TIMEOUT, BUDGET_EXCEEDED_MESSAGE)
    }

    fn emit_guard(&self, guard: &str, code: &str) {
        self.events.emit("retry_guard", None, json!({ "guard": guard, "code": code }));
    }
}

fn unchanged(out: &ProcessOutput) -> ExecResult {
    ExecResult::new(out.code, out.combined())
}

/// Sleeper for tests: never waits.
pub fn no_sleep(_: Duration) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::remediation::Remediator;
    use crate::io::telemetry::MemorySink;
    use crate::test_support::{ScriptedPrompter, ScriptedRunner};

    fn flags(dry_run: bool) -> RuntimeFlags {
        RuntimeFlags {
            ci_mode: true,
            dry_run,
            ..RuntimeFlags::default()
        }
    }

    #[test]
    fn dry_run_spawns_nothing() {
        let runner = ScriptedRunner::new();
        let events = MemorySink::new();
        let prompter = ScriptedPrompter::new();
        let flags = flags(true);
        let remediator = Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5));
        let exec = ResilientExecutor::new(
            &runner,
            PolicyEngine::new(remediator, &events),
            &events,
            &flags,
            Duration::from_secs(5),
            Duration::from_secs(45),
        );

        let result = exec.run(&["push", "origin", "main"], Path::new(".")).expect("run");
        assert_eq!(result.code, exit_codes::INVALID);
        assert_eq!(result.output, "[dry-run] skipped git push origin main");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn zero_budget_returns_timeout_without_spawning() {
        let runner = ScriptedRunner::new();
        let events = MemorySink::new();
        let prompter = ScriptedPrompter::new();
        let flags = flags(false);
        let remediator = Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5));
        let exec = ResilientExecutor::new(
            &runner,
            PolicyEngine::new(remediator, &events),
            &events,
            &flags,
            Duration::from_secs(5),
            Duration::ZERO,
        );

        let result = exec.run(&["status"], Path::new(".")).expect("run");
        assert_eq!(result, ExecResult::new(exit_codes::TIMEOUT, BUDGET_EXCEEDED_MESSAGE));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn empty_stderr_failure_is_returned_unchanged() {
        let runner = ScriptedRunner::new().on(&["diff"], vec![ScriptedRunner::exit(1, "", "")]);
        let events = MemorySink::new();
        let prompter = ScriptedPrompter::new();
        let flags = flags(false);
        let remediator = Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5));
        let exec = ResilientExecutor::new(
            &runner,
            PolicyEngine::new(remediator, &events),
            &events,
            &flags,
            Duration::from_secs(5),
            Duration::from_secs(45),
        )
        .with_sleeper(no_sleep);

        let result = exec.run(&["diff", "--quiet"], Path::new(".")).expect("run");
        assert_eq!(result.code, 1);
        assert!(events.of_type("classification").is_empty());
        assert_eq!(exec.take_last_code(), None);
    }

    #[test]
    fn unhandled_failure_keeps_exit_code_and_records_code() {
        let runner = ScriptedRunner::new().on(&["merge"], vec![ScriptedRunner::exit(128, "", "fatal: weird")]);
        let events = MemorySink::new();
        let prompter = ScriptedPrompter::new();
        let flags = flags(false);
        let remediator = Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5));
        let exec = ResilientExecutor::new(
            &runner,
            PolicyEngine::new(remediator, &events),
            &events,
            &flags,
            Duration::from_secs(5),
            Duration::from_secs(45),
        )
        .with_sleeper(no_sleep);

        let result = exec.run(&["merge", "topic"], Path::new(".")).expect("run");
        assert_eq!(result.code, 128);
        assert_eq!(result.output, "fatal: weird");
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(exec.take_last_code().as_deref(), Some("PNP_GIT_UNCLASSIFIED"));
    }
}
