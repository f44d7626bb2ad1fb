//! Remediation handlers.
//!
//! One strategy per [`HandlerKind`](crate::core::types::HandlerKind). Every
//! handler passes the policy gate for its action before doing anything,
//! respects dry-run by only recording a `simulated` outcome, and emits a
//! `remediation` event for each gate decision and result.
//!
//! Handlers run their sub-commands on the raw [`CommandRunner`], never through
//! the resilient executor, so remediation cannot recurse into remediation.

mod hints;
mod index;
mod locks;
mod ownership;
mod remote;
mod sync;

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::remediation_policy::{GateDecision, RemediationAction, escalate, requires_confirmation};
use crate::core::types::StepVerdict;
use crate::io::config::RuntimeFlags;
use crate::io::process::{CommandRunner, CommandSpec, ProcessOutput};
use crate::io::prompt::Prompter;
use crate::io::telemetry::EventSink;

pub use locks::lock_candidates;
pub use ownership::safe_directory_targets;

/// Shared context for all handlers.
pub struct Remediator<'a> {
    runner: &'a dyn CommandRunner,
    events: &'a dyn EventSink,
    prompter: &'a dyn Prompter,
    flags: &'a RuntimeFlags,
    timeout: Duration,
    stash_pending: Cell<bool>,
    hints: RefCell<Vec<String>>,
}

impl<'a> Remediator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        events: &'a dyn EventSink,
        prompter: &'a dyn Prompter,
        flags: &'a RuntimeFlags,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            events,
            prompter,
            flags,
            timeout,
            stash_pending: Cell::new(false),
            hints: RefCell::new(Vec::new()),
        }
    }

    pub fn flags(&self) -> &RuntimeFlags {
        self.flags
    }

    /// Policy gate plus opt-in escalation. Always emits an `allowed`/`blocked` event.
    pub fn allow(&self, action: RemediationAction) -> GateDecision {
        let decision = escalate(action, self.flags.ci_mode, self.flags.autofix, self.flags.opt_ins());
        if decision.allowed {
            self.emit(action, "allowed", "");
        } else {
            debug!(action = %action, reason = %decision.reason, "remediation blocked");
            self.emit(action, "blocked", &decision.reason);
        }
        decision
    }

    /// Gate check without recording an event, for picking among candidate actions.
    fn permits(&self, action: RemediationAction) -> bool {
        escalate(action, self.flags.ci_mode, self.flags.autofix, self.flags.opt_ins()).allowed
    }

    /// Gate and dry-run check shared by every handler. `Some` ends the handler early.
    fn prepare(&self, action: RemediationAction) -> Option<StepVerdict> {
        let decision = self.allow(action);
        if !decision.allowed {
            self.hint(format!("{action} not permitted: {}", decision.reason));
            return Some(StepVerdict::Fail);
        }
        if self.flags.dry_run {
            info!(action = %action, "dry-run: remediation simulated");
            self.emit(action, "simulated", "");
            return Some(StepVerdict::Skip);
        }
        None
    }

    /// Record the result of an executed action and map it to a verdict.
    fn finish(&self, action: RemediationAction, succeeded: bool, on_success: StepVerdict) -> StepVerdict {
        if succeeded {
            self.emit(action, "success", "");
            on_success
        } else {
            warn!(action = %action, "remediation failed");
            self.emit(action, "failed", "");
            StepVerdict::Fail
        }
    }

    fn emit(&self, action: RemediationAction, outcome: &str, reason: &str) {
        self.events.emit(
            "remediation",
            None,
            json!({ "action": action.name(), "outcome": outcome, "reason": reason }),
        );
    }

    /// Queue an operator-facing hint for the failure report.
    pub fn hint(&self, text: impl Into<String>) {
        let text = text.into();
        info!(hint = %text, "remediation hint");
        self.hints.borrow_mut().push(text);
    }

    pub fn take_hints(&self) -> Vec<String> {
        self.hints.take()
    }

    fn git(&self, args: &[&str], cwd: &Path) -> Result<ProcessOutput> {
        self.runner.run(&CommandSpec::git(args, cwd, self.timeout))
    }

    /// Ask before a confirmable action. Auto-fix implies consent; CI never prompts.
    fn confirm(&self, action: RemediationAction, question: &str) -> Result<bool> {
        if !requires_confirmation(action, self.flags.autofix) || !self.flags.interactive {
            return Ok(true);
        }
        self.prompter.confirm(question, false)
    }

    /// Present a bounded menu of actions. `None` means the operator closed input.
    fn choose(&self, question: &str, actions: &[RemediationAction]) -> Result<Option<RemediationAction>> {
        let labels: Vec<&str> = actions.iter().map(|a| a.name()).collect();
        Ok(self.prompter.choose(question, &labels)?.and_then(|i| actions.get(i).copied()))
    }
}
