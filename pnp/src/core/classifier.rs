//! Deterministic classification of git stderr into stable codes.
//!
//! Classification runs an ordered table of substring rules over normalized
//! text. All rules are evaluated so that disagreements can be counted, but the
//! first match in table order always wins. The only state is a pair of
//! diagnostic counters; they never influence the result.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;

use crate::core::error_model::{code_policy, codes};
use crate::core::types::{ErrorClassification, HandlerKind};

/// What a rule resolves to when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Code(&'static str, HandlerKind),
    /// "could not read from remote" needs a second look to tell an unreadable
    /// remote from an invalid URL.
    RemoteRoute,
}

/// Declarative classification rule: any needle present in the normalized text matches.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub target: RuleTarget,
    pub needles: &'static [&'static str],
}

impl ClassificationRule {
    pub const fn code(code: &'static str, handler: HandlerKind, needles: &'static [&'static str]) -> Self {
        Self {
            target: RuleTarget::Code(code, handler),
            needles,
        }
    }

    fn matches(&self, normalized: &str) -> bool {
        self.needles.iter().any(|needle| normalized.contains(needle))
    }
}

const NETWORK: &[&str] = &[
    "no address associated with hostname",
    "could not resolve host",
    "software caused connection abort",
    "failed to connect",
    "connect to",
];
const TIMEOUT: &[&str] = &["operation timed out", "connection timed out", "timed out"];
const TLS: &[&str] = &[
    "ssl certificate problem",
    "server certificate verification failed",
    "tls handshake timeout",
    "gnutls_handshake()",
    "ssl connect error",
];
const AUTH: &[&str] = &[
    "authentication failed",
    "permission denied (publickey)",
    "could not read username",
    "repository not found",
];
const LARGE_FILE: &[&str] = &[
    "exceeds github's file size limit",
    "exceeds gitlab's file size limit",
    "file size limit of 100.00 mb",
    "file size limit of",
];
const HOOK: &[&str] = &["pre-push hook declined", "pre-commit hook declined", "hook declined"];
const SUBMODULE: &[&str] = &[
    "upload-pack: not our ref",
    "not our ref",
    "in a submodule path",
    "no submodule mapping found in .gitmodules",
];
const PROTECTED: &[&str] = &[
    "protected branch update failed",
    "gh006",
    "required status check",
    "approving review is required",
];
const NON_FAST_FORWARD: &[&str] = &[
    "non-fast-forward",
    "fetch first",
    "failed to push some refs",
    "tip of your current branch is behind",
];
const DIRTY: &[&str] = &[
    "would be overwritten by merge",
    "please commit your changes or stash them before you merge",
    "please commit your changes or stash them before you rebase",
    "your local changes to the following files would be overwritten",
];
const LINE_ENDINGS: &[&str] = &["lf will be replaced by crlf", "crlf will be replaced by lf"];
const INDEX_MISMATCH: &[&str] = &["short read while indexing", "unable to index", "unable to stat"];
const LOCK: &[&str] = &[
    "another git process seems to be running",
    "unable to create '.git/index.lock'",
    "unable to create '.git/shallow.lock'",
    "index.lock",
];
const DETACHED: &[&str] = &[
    "you are not currently on a branch",
    "you are in 'detached head' state",
    "detached head",
];
const REF_CONFLICT: &[&str] = &[
    "cannot lock ref",
    "tag already exists",
    "would clobber existing tag",
    "failed to update ref",
];
const UPSTREAM: &[&str] = &["has no upstream branch", "no upstream configured", "set-upstream"];
const DUBIOUS: &[&str] = &["dubious ownership"];
const INVALID_OBJECT: &[&str] = &[
    "invalid object",
    "broken pipe",
    "has null sha1",
    "object corrupt",
    "unexpected diff status a",
    "is empty fatal:",
];
const REMOTE_ROUTE: &[&str] = &["could not read from remote"];

/// Rule table in priority order.
pub const DEFAULT_RULES: &[ClassificationRule] = &[
    ClassificationRule::code(codes::GIT_UPSTREAM_MISSING, HandlerKind::UpstreamMissing, UPSTREAM),
    ClassificationRule::code(codes::NET_AUTH_FAIL, HandlerKind::AuthFailure, AUTH),
    ClassificationRule::code(codes::NET_LARGE_FILE_REJECTED, HandlerKind::LargeFileRejection, LARGE_FILE),
    ClassificationRule::code(codes::GIT_HOOK_DECLINED, HandlerKind::HookDeclined, HOOK),
    ClassificationRule::code(codes::GIT_SUBMODULE_INCONSISTENT, HandlerKind::SubmoduleInconsistent, SUBMODULE),
    ClassificationRule::code(codes::GIT_PROTECTED_BRANCH, HandlerKind::ProtectedBranch, PROTECTED),
    ClassificationRule::code(codes::GIT_NON_FAST_FORWARD, HandlerKind::DivergedBranch, NON_FAST_FORWARD),
    ClassificationRule::code(codes::GIT_DIRTY_WORKTREE, HandlerKind::DirtyWorktree, DIRTY),
    ClassificationRule::code(codes::GIT_LINE_ENDING_NORMALIZATION, HandlerKind::LineEndings, LINE_ENDINGS),
    ClassificationRule::code(codes::GIT_DETACHED_HEAD, HandlerKind::DetachedHead, DETACHED),
    ClassificationRule::code(codes::GIT_REF_CONFLICT, HandlerKind::RefConflict, REF_CONFLICT),
    ClassificationRule::code(codes::GIT_INDEX_WORKTREE_MISMATCH, HandlerKind::IndexWorktreeMismatch, INDEX_MISMATCH),
    ClassificationRule::code(codes::GIT_LOCK_CONTENTION, HandlerKind::LockContention, LOCK),
    ClassificationRule::code(codes::NET_TLS_FAIL, HandlerKind::Network, TLS),
    ClassificationRule::code(codes::NET_TIMEOUT, HandlerKind::Network, TIMEOUT),
    ClassificationRule::code(codes::NET_CONNECTIVITY, HandlerKind::Network, NETWORK),
    ClassificationRule::code(codes::GIT_DUBIOUS_OWNERSHIP, HandlerKind::DubiousOwnership, DUBIOUS),
    ClassificationRule::code(codes::GIT_INVALID_OBJECT, HandlerKind::InvalidObject, INVALID_OBJECT),
    ClassificationRule {
        target: RuleTarget::RemoteRoute,
        needles: REMOTE_ROUTE,
    },
];

pub const URL_PLACEHOLDER: &str = "<url>";

static HTTPS_CREDENTIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(https://)[^/\s@]+(@)").unwrap());
static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s'"`]+"#).unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize stderr before matching.
///
/// Lowercases, unifies quotes, masks `https://user@` credentials, replaces
/// URLs with [`URL_PLACEHOLDER`] and collapses whitespace. Credentials never
/// reach the rule predicates.
pub fn normalize(stderr: &str) -> String {
    let text = stderr.trim().to_lowercase();
    if text.is_empty() {
        return text;
    }
    let text = text.replace(['`', '\u{2019}', '"'], "'");
    let text = HTTPS_CREDENTIAL_RE.replace_all(&text, "${1}<token>${2}");
    let text = URL_RE.replace_all(&text, URL_PLACEHOLDER);
    WHITESPACE_RE.replace_all(&text, " ").into_owned()
}

/// Snapshot of the classifier's diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub unknown_classifications: u64,
    pub rule_conflicts: u64,
}

/// Error classifier over an ordered rule table.
#[derive(Debug)]
pub struct Classifier {
    rules: &'static [ClassificationRule],
    unknown: AtomicU64,
    conflicts: AtomicU64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES)
    }

    pub fn with_rules(rules: &'static [ClassificationRule]) -> Self {
        Self {
            rules,
            unknown: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn classify(&self, stderr: &str) -> ErrorClassification {
        let normalized = normalize(stderr);
        if normalized.is_empty() {
            return classification(codes::GIT_EMPTY_STDERR, HandlerKind::Fallback);
        }

        let matched: Vec<&ClassificationRule> =
            self.rules.iter().filter(|rule| rule.matches(&normalized)).collect();
        let Some(first) = matched.first() else {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            return classification(codes::GIT_UNCLASSIFIED, HandlerKind::Fallback);
        };

        let mut resolved: Vec<&str> = matched
            .iter()
            .filter_map(|rule| match rule.target {
                RuleTarget::Code(code, _) => Some(code),
                RuleTarget::RemoteRoute => None,
            })
            .collect();
        resolved.sort_unstable();
        resolved.dedup();
        if resolved.len() > 1 {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
        }

        match first.target {
            RuleTarget::Code(code, handler) => classification(code, handler),
            RuleTarget::RemoteRoute => route_remote(&normalized),
        }
    }

    pub fn stats(&self) -> ClassifierStats {
        ClassifierStats {
            unknown_classifications: self.unknown.load(Ordering::Relaxed),
            rule_conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.unknown.store(0, Ordering::Relaxed);
        self.conflicts.store(0, Ordering::Relaxed);
    }
}

fn route_remote(normalized: &str) -> ErrorClassification {
    if normalized.contains(URL_PLACEHOLDER) {
        classification(codes::NET_REMOTE_URL_INVALID, HandlerKind::Network)
    } else {
        classification(codes::NET_REMOTE_UNREADABLE, HandlerKind::MissingRemote)
    }
}

fn classification(code: &str, handler: HandlerKind) -> ErrorClassification {
    ErrorClassification {
        code: code.to_string(),
        severity: code_policy(code).severity,
        handler,
    }
}
