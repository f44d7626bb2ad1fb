//! Stable error codes, their policies and the failure records built from them.
//!
//! Codes are a public contract: existing codes are never renumbered or
//! removed. Retired names stay resolvable through [`canonical_code`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::Severity;

/// Stable code identifiers.
pub mod codes {
    pub const NET_CONNECTIVITY: &str = "PNP_NET_CONNECTIVITY";
    pub const NET_TIMEOUT: &str = "PNP_NET_TIMEOUT";
    pub const NET_TLS_FAIL: &str = "PNP_NET_TLS_FAIL";
    pub const NET_AUTH_FAIL: &str = "PNP_NET_AUTH_FAIL";
    pub const NET_REMOTE_UNREADABLE: &str = "PNP_NET_REMOTE_UNREADABLE";
    pub const NET_REMOTE_URL_INVALID: &str = "PNP_NET_REMOTE_URL_INVALID";
    pub const NET_LARGE_FILE_REJECTED: &str = "PNP_NET_LARGE_FILE_REJECTED";
    pub const NET_PUSH_FAIL: &str = "PNP_NET_PUSH_FAIL";

    pub const GIT_DUBIOUS_OWNERSHIP: &str = "PNP_GIT_DUBIOUS_OWNERSHIP";
    pub const GIT_LOCK_CONTENTION: &str = "PNP_GIT_LOCK_CONTENTION";
    pub const GIT_INVALID_OBJECT: &str = "PNP_GIT_INVALID_OBJECT";
    pub const GIT_REF_CONFLICT: &str = "PNP_GIT_REF_CONFLICT";
    pub const GIT_NON_FAST_FORWARD: &str = "PNP_GIT_NON_FAST_FORWARD";
    pub const GIT_DETACHED_HEAD: &str = "PNP_GIT_DETACHED_HEAD";
    pub const GIT_DIRTY_WORKTREE: &str = "PNP_GIT_DIRTY_WORKTREE";
    pub const GIT_LINE_ENDING_NORMALIZATION: &str = "PNP_GIT_LINE_ENDING_NORMALIZATION";
    pub const GIT_INDEX_WORKTREE_MISMATCH: &str = "PNP_GIT_INDEX_WORKTREE_MISMATCH";
    pub const GIT_SUBMODULE_INCONSISTENT: &str = "PNP_GIT_SUBMODULE_INCONSISTENT";
    pub const GIT_PROTECTED_BRANCH: &str = "PNP_GIT_PROTECTED_BRANCH";
    pub const GIT_UPSTREAM_MISSING: &str = "PNP_GIT_UPSTREAM_MISSING";
    pub const GIT_HOOK_DECLINED: &str = "PNP_GIT_HOOK_DECLINED";
    pub const GIT_EMPTY_STDERR: &str = "PNP_GIT_EMPTY_STDERR";
    pub const GIT_UNCLASSIFIED: &str = "PNP_GIT_UNCLASSIFIED";

    pub const GIT_REPOSITORY_FAIL: &str = "PNP_GIT_REPOSITORY_FAIL";
    pub const REL_HOOKS_FAIL: &str = "PNP_REL_HOOKS_FAIL";
    pub const GIT_MACHETE_FAIL: &str = "PNP_GIT_MACHETE_FAIL";
    pub const GIT_COMMIT_FAIL: &str = "PNP_GIT_COMMIT_FAIL";
    pub const REL_PUBLISH_FAIL: &str = "PNP_REL_PUBLISH_FAIL";
    pub const REL_RELEASE_FAIL: &str = "PNP_REL_RELEASE_FAIL";

    pub const INT_WORKFLOW_EXIT_NONZERO: &str = "PNP_INT_WORKFLOW_EXIT_NONZERO";
    pub const INT_UNHANDLED_EXCEPTION: &str = "PNP_INT_UNHANDLED_EXCEPTION";
    pub const INT_KEYBOARD_INTERRUPT: &str = "PNP_INT_KEYBOARD_INTERRUPT";
    pub const INT_EOF_INTERRUPT: &str = "PNP_INT_EOF_INTERRUPT";
}

const DEPRECATED_ALIASES: &[(&str, &str)] = &[
    ("PNP_WORKFLOW_EXIT_NONZERO", codes::INT_WORKFLOW_EXIT_NONZERO),
    ("PNP_WORKFLOW_REPOSITORY_FAIL", codes::GIT_REPOSITORY_FAIL),
    ("PNP_WORKFLOW_HOOKS_FAIL", codes::REL_HOOKS_FAIL),
    ("PNP_WORKFLOW_MACHETE_FAIL", codes::GIT_MACHETE_FAIL),
    ("PNP_WORKFLOW_COMMIT_FAIL", codes::GIT_COMMIT_FAIL),
    ("PNP_WORKFLOW_PUSH_FAIL", codes::NET_PUSH_FAIL),
    ("PNP_WORKFLOW_PUBLISH_FAIL", codes::REL_PUBLISH_FAIL),
    ("PNP_WORKFLOW_RELEASE_FAIL", codes::REL_RELEASE_FAIL),
    ("PNP_RES_NETWORK_CONNECTIVITY", codes::NET_CONNECTIVITY),
    ("PNP_RES_DUBIOUS_OWNERSHIP", codes::GIT_DUBIOUS_OWNERSHIP),
    ("PNP_RES_INVALID_OBJECT", codes::GIT_INVALID_OBJECT),
    ("PNP_RES_REMOTE_URL_INVALID", codes::NET_REMOTE_URL_INVALID),
    ("PNP_RES_REMOTE_UNREADABLE", codes::NET_REMOTE_UNREADABLE),
    ("PNP_RES_UNCLASSIFIED", codes::GIT_UNCLASSIFIED),
    ("PNP_RES_EMPTY_STDERR", codes::GIT_EMPTY_STDERR),
    ("PNP_RES_AUTH_FAIL", codes::NET_AUTH_FAIL),
    ("PNP_RES_LARGE_FILE_REJECTED", codes::NET_LARGE_FILE_REJECTED),
    ("PNP_RES_HOOK_DECLINED", codes::GIT_HOOK_DECLINED),
    ("PNP_RES_SUBMODULE_INCONSISTENT", codes::GIT_SUBMODULE_INCONSISTENT),
    ("PNP_RES_NON_FAST_FORWARD", codes::GIT_NON_FAST_FORWARD),
    ("PNP_RES_PROTECTED_BRANCH", codes::GIT_PROTECTED_BRANCH),
    ("PNP_RES_DIRTY_WORKTREE", codes::GIT_DIRTY_WORKTREE),
    ("PNP_RES_LINE_ENDING_NORMALIZATION", codes::GIT_LINE_ENDING_NORMALIZATION),
    ("PNP_RES_DETACHED_HEAD", codes::GIT_DETACHED_HEAD),
    ("PNP_RES_REF_CONFLICT", codes::GIT_REF_CONFLICT),
    ("PNP_RES_LOCK_CONTENTION", codes::GIT_LOCK_CONTENTION),
    ("PNP_RES_UPSTREAM_MISSING", codes::GIT_UPSTREAM_MISSING),
    ("PNP_RES_TLS_FAIL", codes::NET_TLS_FAIL),
    ("PNP_RES_TIMEOUT", codes::NET_TIMEOUT),
    ("PNP_RES_INDEX_WORKTREE_MISMATCH", codes::GIT_INDEX_WORKTREE_MISMATCH),
];

/// Coarse grouping used by the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Network,
    Git,
    Release,
    Internal,
    Workflow,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Network => "network",
            Category::Git => "git",
            Category::Release => "release",
            Category::Internal => "internal",
            Category::Workflow => "workflow",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity and category attached to a stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePolicy {
    pub severity: Severity,
    pub category: Category,
}

const WARN_CODES: &[&str] = &[
    codes::GIT_DUBIOUS_OWNERSHIP,
    codes::GIT_LINE_ENDING_NORMALIZATION,
    codes::GIT_UNCLASSIFIED,
    codes::GIT_EMPTY_STDERR,
    codes::INT_KEYBOARD_INTERRUPT,
    codes::INT_EOF_INTERRUPT,
];

/// Resolve deprecated codes to the current namespace.
pub fn canonical_code(code: &str) -> &str {
    let token = code.trim();
    DEPRECATED_ALIASES
        .iter()
        .find(|(alias, _)| *alias == token)
        .map(|(_, current)| *current)
        .unwrap_or(token)
}

/// Severity/category for a code. Unknown codes fall back to `error`/`workflow`.
pub fn code_policy(code: &str) -> CodePolicy {
    let code = canonical_code(code);
    let severity = if WARN_CODES.contains(&code) {
        Severity::Warn
    } else {
        Severity::Error
    };
    let category = if code == codes::INT_UNHANDLED_EXCEPTION {
        Category::Internal
    } else if code.starts_with("PNP_NET_") {
        Category::Network
    } else if code.starts_with("PNP_GIT_") {
        Category::Git
    } else if code.starts_with("PNP_REL_") {
        Category::Release
    } else {
        Category::Workflow
    };
    CodePolicy { severity, category }
}

/// Short operator hint for codes that have an obvious manual fix.
pub fn suggested_fix(code: &str) -> &'static str {
    match canonical_code(code) {
        codes::NET_AUTH_FAIL => "refresh credentials (https://github.com/settings/tokens) or check SSH keys",
        codes::NET_CONNECTIVITY | codes::NET_TIMEOUT => "check network connectivity and retry",
        codes::NET_TLS_FAIL => "check system CA certificates and proxy settings",
        codes::NET_REMOTE_URL_INVALID => "run git remote set-url origin <correct-url>",
        codes::NET_REMOTE_UNREADABLE => "add or fix the remote with git remote add <name> <url>",
        codes::NET_LARGE_FILE_REJECTED => "remove the large file from history or track it with git lfs",
        codes::GIT_PROTECTED_BRANCH => "push to a feature branch and open a pull request",
        codes::GIT_NON_FAST_FORWARD | codes::NET_PUSH_FAIL => {
            "fetch and integrate remote changes, or rerun with --force"
        }
        codes::GIT_DETACHED_HEAD => "check out a branch before running the workflow",
        codes::GIT_DIRTY_WORKTREE => "commit or stash local changes",
        codes::GIT_SUBMODULE_INCONSISTENT => "run git submodule sync && git submodule update --init",
        codes::GIT_HOOK_DECLINED => "fix the issues reported by the git hook",
        codes::GIT_INVALID_OBJECT => "inspect git fsck --full output; rerun with --destructive-reset to rebuild the index",
        codes::GIT_DUBIOUS_OWNERSHIP => "git config --global --add safe.directory <repo>",
        codes::GIT_LOCK_CONTENTION => "make sure no other git process is running, then remove the stale .lock file",
        _ => "",
    }
}

/// The seven workflow steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStep {
    Repository,
    Hooks,
    Machete,
    Commit,
    Push,
    Publish,
    Release,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 7] = [
        WorkflowStep::Repository,
        WorkflowStep::Hooks,
        WorkflowStep::Machete,
        WorkflowStep::Commit,
        WorkflowStep::Push,
        WorkflowStep::Publish,
        WorkflowStep::Release,
    ];

    pub fn key(self) -> &'static str {
        match self {
            WorkflowStep::Repository => "repository",
            WorkflowStep::Hooks => "hooks",
            WorkflowStep::Machete => "machete",
            WorkflowStep::Commit => "commit",
            WorkflowStep::Push => "push",
            WorkflowStep::Publish => "publish",
            WorkflowStep::Release => "release",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkflowStep::Repository => "Detect repository",
            WorkflowStep::Hooks => "Run hooks",
            WorkflowStep::Machete => "Run git machete",
            WorkflowStep::Commit => "Stage and commit changes",
            WorkflowStep::Push => "Push to remote",
            WorkflowStep::Publish => "Publish tag",
            WorkflowStep::Release => "Create GitHub release",
        }
    }

    /// Canonical failure code for this step.
    pub fn code(self) -> &'static str {
        match self {
            WorkflowStep::Repository => codes::GIT_REPOSITORY_FAIL,
            WorkflowStep::Hooks => codes::REL_HOOKS_FAIL,
            WorkflowStep::Machete => codes::GIT_MACHETE_FAIL,
            WorkflowStep::Commit => codes::GIT_COMMIT_FAIL,
            WorkflowStep::Push => codes::NET_PUSH_FAIL,
            WorkflowStep::Publish => codes::REL_PUBLISH_FAIL,
            WorkflowStep::Release => codes::REL_RELEASE_FAIL,
        }
    }
}

/// Pick the code reported for a failed step.
///
/// A classified code observed while the step ran wins over the step's own code.
pub fn resolve_failure_code(step: Option<WorkflowStep>, preferred: Option<&str>) -> String {
    if let Some(code) = preferred.map(canonical_code).filter(|c| !c.is_empty()) {
        return code.to_string();
    }
    step.map(WorkflowStep::code)
        .unwrap_or(codes::INT_WORKFLOW_EXIT_NONZERO)
        .to_string()
}

/// Terminal failure of a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub step: String,
    pub label: String,
    pub result: String,
    pub message: String,
    pub code: String,
    pub severity: String,
    pub category: String,
}

impl FailureEvent {
    pub fn new(step: WorkflowStep, result: &str, message: &str, code: &str) -> Self {
        let policy = code_policy(code);
        Self {
            step: step.key().to_string(),
            label: step.label().to_string(),
            result: result.to_string(),
            message: message.to_string(),
            code: canonical_code(code).to_string(),
            severity: policy.severity.to_string(),
            category: policy.category.to_string(),
        }
    }
}

pub const ENVELOPE_SCHEMA: &str = "pnp.error_envelope.v1";
pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;

/// Machine-readable failure report written once at process exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub schema: String,
    pub schema_version: u32,
    pub generated_at: String,
    pub code: String,
    pub severity: String,
    pub category: String,
    pub actionable: bool,
    pub message: String,
    pub operation: String,
    pub step: String,
    pub stderr_excerpt: String,
    pub retryable: bool,
    pub user_action_required: bool,
    pub suggested_fix: String,
    pub context: BTreeMap<String, String>,
}

impl ErrorEnvelope {
    pub fn from_failure(
        event: &FailureEvent,
        generated_at: String,
        retryable: bool,
        context: BTreeMap<String, String>,
    ) -> Self {
        let fix = suggested_fix(&event.code);
        Self {
            schema: ENVELOPE_SCHEMA.to_string(),
            schema_version: ENVELOPE_SCHEMA_VERSION,
            generated_at,
            code: event.code.clone(),
            severity: event.severity.clone(),
            category: event.category.clone(),
            actionable: !fix.is_empty(),
            message: event.message.clone(),
            operation: "workflow".to_string(),
            step: event.step.clone(),
            stderr_excerpt: excerpt(&event.message, 300),
            retryable,
            user_action_required: !retryable,
            suggested_fix: fix.to_string(),
            context,
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deprecated_alias_resolves_to_current_code() {
        assert_eq!(canonical_code("PNP_RES_LOCK_CONTENTION"), codes::GIT_LOCK_CONTENTION);
        assert_eq!(canonical_code(" PNP_WORKFLOW_PUSH_FAIL "), codes::NET_PUSH_FAIL);
        assert_eq!(canonical_code("PNP_NET_TIMEOUT"), codes::NET_TIMEOUT);
    }

    #[test]
    fn policy_assigns_warn_to_soft_codes() {
        assert_eq!(code_policy(codes::GIT_UNCLASSIFIED).severity, Severity::Warn);
        assert_eq!(code_policy(codes::GIT_LOCK_CONTENTION).severity, Severity::Error);
        assert_eq!(code_policy("PNP_RES_DUBIOUS_OWNERSHIP").severity, Severity::Warn);
    }

    #[test]
    fn policy_derives_category_from_namespace() {
        assert_eq!(code_policy(codes::NET_PUSH_FAIL).category, Category::Network);
        assert_eq!(code_policy(codes::REL_HOOKS_FAIL).category, Category::Release);
        assert_eq!(code_policy(codes::INT_UNHANDLED_EXCEPTION).category, Category::Internal);
        assert_eq!(code_policy(codes::INT_EOF_INTERRUPT).category, Category::Workflow);
        assert_eq!(code_policy("SOMETHING_ELSE").category, Category::Workflow);
    }

    #[test]
    fn every_step_has_a_distinct_code() {
        let mut seen: Vec<&str> = WorkflowStep::ALL.iter().map(|s| s.code()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), WorkflowStep::ALL.len());
    }

    #[test]
    fn failure_code_prefers_classified_code() {
        let code = resolve_failure_code(Some(WorkflowStep::Push), Some("PNP_RES_AUTH_FAIL"));
        assert_eq!(code, codes::NET_AUTH_FAIL);
        let code = resolve_failure_code(Some(WorkflowStep::Push), None);
        assert_eq!(code, codes::NET_PUSH_FAIL);
        let code = resolve_failure_code(None, Some(""));
        assert_eq!(code, codes::INT_WORKFLOW_EXIT_NONZERO);
    }

    #[test]
    fn envelope_carries_schema_and_failure_fields() {
        let event = FailureEvent::new(WorkflowStep::Push, "abort", "remote ahead", codes::NET_PUSH_FAIL);
        let env = ErrorEnvelope::from_failure(&event, "2026-01-01T00:00:00Z".into(), true, BTreeMap::new());
        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["schema"], ENVELOPE_SCHEMA);
        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["code"], codes::NET_PUSH_FAIL);
        assert_eq!(json["category"], "network");
        assert_eq!(json["step"], "push");
        assert_eq!(json["actionable"], true);
        assert_eq!(json["user_action_required"], false);
    }
}
