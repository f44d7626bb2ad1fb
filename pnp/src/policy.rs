//! Policy/dispatch engine: classification → remediation handler → decision.
//!
//! The dispatch table is a closed `match` over [`HandlerKind`]. Handler
//! faults never escape this boundary; they become `FAIL`.

use std::path::Path;

use serde::Serialize;
use serde_json::json;
use tracing::{error, instrument, warn};

use crate::core::error_model::codes;
use crate::core::types::{ErrorClassification, HandlerKind, StepVerdict};
use crate::io::remediation::Remediator;
use crate::io::telemetry::EventSink;

/// Outcome of dispatching one classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub classification: ErrorClassification,
    pub result: StepVerdict,
    pub handled: bool,
}

pub struct PolicyEngine<'a> {
    remediator: Remediator<'a>,
    events: &'a dyn EventSink,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(remediator: Remediator<'a>, events: &'a dyn EventSink) -> Self {
        Self { remediator, events }
    }

    pub fn remediator(&self) -> &Remediator<'a> {
        &self.remediator
    }

    #[instrument(skip_all, fields(code = %classification.code, handler = %classification.handler))]
    pub fn decide(&self, classification: &ErrorClassification, stderr: &str, cwd: &Path) -> PolicyDecision {
        let (result, handled) = match self.dispatch(classification, stderr, cwd) {
            None => {
                self.on_unhandled(classification);
                (StepVerdict::Fail, false)
            }
            Some(Ok(verdict)) => (verdict, true),
            Some(Err(e)) => {
                error!(err = %format!("{e:#}"), "remediation handler failed");
                self.remediator.hint(format!("remediation failed: {e:#}"));
                (StepVerdict::Fail, true)
            }
        };
        let decision = PolicyDecision {
            classification: classification.clone(),
            result,
            handled,
        };
        self.events.emit(
            "policy_decision",
            None,
            json!({
                "code": decision.classification.code,
                "handler": decision.classification.handler.name(),
                "result": decision.result.as_str(),
                "handled": decision.handled,
            }),
        );
        decision
    }

    /// `None` when no handler exists for the classification.
    fn dispatch(
        &self,
        classification: &ErrorClassification,
        stderr: &str,
        cwd: &Path,
    ) -> Option<anyhow::Result<StepVerdict>> {
        let r = &self.remediator;
        let outcome = match classification.handler {
            HandlerKind::Fallback => return None,
            HandlerKind::UpstreamMissing => r.upstream_missing(cwd),
            HandlerKind::AuthFailure => r.auth_failure(cwd),
            HandlerKind::LargeFileRejection => Ok(r.large_file(stderr)),
            HandlerKind::HookDeclined => Ok(r.hook_declined()),
            HandlerKind::SubmoduleInconsistent => r.submodule_inconsistent(cwd),
            HandlerKind::ProtectedBranch => Ok(r.protected_branch()),
            HandlerKind::DivergedBranch => r.diverged_branch(cwd),
            HandlerKind::DirtyWorktree => r.dirty_worktree(cwd),
            HandlerKind::LineEndings => r.line_endings(cwd),
            HandlerKind::DetachedHead => Ok(r.detached_head()),
            HandlerKind::RefConflict => r.ref_conflict(cwd),
            HandlerKind::IndexWorktreeMismatch => r.index_worktree_mismatch(cwd),
            HandlerKind::LockContention => r.lock_contention(stderr, cwd),
            HandlerKind::Network => Ok(r.network(&classification.code)),
            HandlerKind::DubiousOwnership => r.dubious_ownership(stderr, cwd),
            HandlerKind::InvalidObject => r.invalid_object(stderr, cwd),
            HandlerKind::MissingRemote => r.missing_remote(cwd),
        };
        Some(outcome)
    }

    fn on_unhandled(&self, classification: &ErrorClassification) {
        if classification.code == codes::GIT_EMPTY_STDERR {
            warn!("command failed without diagnostics");
        } else {
            warn!("no remediation for classification");
        }
        self.events.emit(
            "unhandled_classification",
            None,
            json!({ "code": classification.code }),
        );
    }
}
