//! Shared deterministic types for the release workflow core.
//!
//! These types define stable contracts between the classifier, the policy
//! engine, the remediation handlers and the orchestrator. They carry no I/O
//! and must serialize identically across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a workflow step or a remediation handler.
///
/// `Retry` is only meaningful to the resilient executor: it re-invokes the
/// failed command, never the workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepVerdict {
    Ok,
    Done,
    Skip,
    Fail,
    Retry,
    Abort,
}

impl StepVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            StepVerdict::Ok => "ok",
            StepVerdict::Done => "done",
            StepVerdict::Skip => "skip",
            StepVerdict::Fail => "fail",
            StepVerdict::Retry => "retry",
            StepVerdict::Abort => "abort",
        }
    }

    /// True for verdicts that end the whole workflow unsuccessfully.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, StepVerdict::Fail | StepVerdict::Abort)
    }
}

impl fmt::Display for StepVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation strategy selected by the classifier.
///
/// The set is closed: every variant has an arm in the dispatch table, and
/// `Fallback` is the explicit "nothing to do" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    UpstreamMissing,
    AuthFailure,
    LargeFileRejection,
    HookDeclined,
    SubmoduleInconsistent,
    ProtectedBranch,
    DivergedBranch,
    DirtyWorktree,
    LineEndings,
    DetachedHead,
    RefConflict,
    IndexWorktreeMismatch,
    LockContention,
    Network,
    DubiousOwnership,
    InvalidObject,
    MissingRemote,
    Fallback,
}

impl HandlerKind {
    pub fn name(self) -> &'static str {
        match self {
            HandlerKind::UpstreamMissing => "upstream_missing",
            HandlerKind::AuthFailure => "auth_failure",
            HandlerKind::LargeFileRejection => "large_file_rejection",
            HandlerKind::HookDeclined => "hook_declined",
            HandlerKind::SubmoduleInconsistent => "submodule_inconsistent",
            HandlerKind::ProtectedBranch => "protected_branch",
            HandlerKind::DivergedBranch => "diverged_branch",
            HandlerKind::DirtyWorktree => "dirty_worktree",
            HandlerKind::LineEndings => "line_endings",
            HandlerKind::DetachedHead => "detached_head",
            HandlerKind::RefConflict => "ref_conflict",
            HandlerKind::IndexWorktreeMismatch => "index_worktree_mismatch",
            HandlerKind::LockContention => "lock_contention",
            HandlerKind::Network => "network",
            HandlerKind::DubiousOwnership => "dubious_ownership",
            HandlerKind::InvalidObject => "invalid_object",
            HandlerKind::MissingRemote => "missing_remote",
            HandlerKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable classification of one failed command's stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub code: String,
    pub severity: Severity,
    pub handler: HandlerKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serializes_lowercase() {
        let json = serde_json::to_string(&StepVerdict::Retry).expect("serialize");
        assert_eq!(json, "\"retry\"");
    }

    #[test]
    fn handler_serializes_with_stable_name() {
        for kind in [
            HandlerKind::LockContention,
            HandlerKind::IndexWorktreeMismatch,
            HandlerKind::Fallback,
        ] {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test]
    fn only_fail_and_abort_are_terminal_failures() {
        assert!(StepVerdict::Fail.is_terminal_failure());
        assert!(StepVerdict::Abort.is_terminal_failure());
        assert!(!StepVerdict::Skip.is_terminal_failure());
        assert!(!StepVerdict::Done.is_terminal_failure());
    }
}
