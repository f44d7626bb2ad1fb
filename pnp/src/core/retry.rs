//! Retry policy tables and the per-chain retry state.
//!
//! Everything here is pure: the executor owns the clock, the sleeper and the
//! random source, and feeds them in.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::core::error_model::{canonical_code, codes};

/// Maximum failures of one code within a chain before the breaker trips.
pub const CIRCUIT_BREAKER_MAX_PER_CODE: u32 = 3;

/// Budget for one logical command across all its retries.
pub const DEFAULT_TIMEOUT_BUDGET: Duration = Duration::from_secs(45);

/// Stderr prefix length that participates in failure signatures.
pub const SIGNATURE_STDERR_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retryable: bool,
    pub max_retries: u32,
    pub base_delay_s: f64,
    pub max_delay_s: f64,
    pub jitter_s: f64,
}

impl RetryPolicy {
    const fn retryable(max_retries: u32, base_delay_s: f64, max_delay_s: f64, jitter_s: f64) -> Self {
        Self {
            retryable: true,
            max_retries,
            base_delay_s,
            max_delay_s,
            jitter_s,
        }
    }

    pub const NEVER: RetryPolicy = RetryPolicy {
        retryable: false,
        max_retries: 0,
        base_delay_s: 0.0,
        max_delay_s: 0.0,
        jitter_s: 0.0,
    };

    /// Backoff delay before attempt `tries + 1`.
    ///
    /// `jitter_sample` is expected in `[0, 1)`; it is clamped so the result
    /// always lies in `[exp, exp + jitter_s]` where `exp = min(base * 2^tries, max)`.
    pub fn delay(&self, tries: u32, jitter_sample: f64) -> Duration {
        let exp = (self.base_delay_s * 2f64.powi(tries.min(30) as i32)).min(self.max_delay_s);
        let jitter = self.jitter_s * jitter_sample.clamp(0.0, 1.0);
        Duration::from_secs_f64((exp + jitter).max(0.0))
    }
}

const ALLOWLIST: &[&str] = &[
    codes::NET_CONNECTIVITY,
    codes::NET_REMOTE_UNREADABLE,
    codes::NET_TIMEOUT,
    codes::NET_PUSH_FAIL,
    codes::GIT_DUBIOUS_OWNERSHIP,
    codes::GIT_LOCK_CONTENTION,
    codes::GIT_UPSTREAM_MISSING,
    codes::GIT_NON_FAST_FORWARD,
    codes::GIT_LINE_ENDING_NORMALIZATION,
    codes::GIT_INDEX_WORKTREE_MISMATCH,
];

const DENYLIST: &[&str] = &[
    codes::GIT_INVALID_OBJECT,
    codes::GIT_EMPTY_STDERR,
    codes::GIT_UNCLASSIFIED,
    codes::INT_WORKFLOW_EXIT_NONZERO,
    codes::INT_UNHANDLED_EXCEPTION,
];

/// Codes whose failures legitimately repeat with an identical signature.
const REPEATABLE: &[&str] = &[
    codes::NET_CONNECTIVITY,
    codes::NET_TIMEOUT,
    codes::GIT_LINE_ENDING_NORMALIZATION,
    codes::GIT_INDEX_WORKTREE_MISMATCH,
];

const GENERIC_ALLOWED: RetryPolicy = RetryPolicy::retryable(1, 0.10, 0.50, 0.05);

pub fn policy_for(code: &str) -> RetryPolicy {
    let code = canonical_code(code);
    if DENYLIST.contains(&code) || !ALLOWLIST.contains(&code) {
        return RetryPolicy::NEVER;
    }
    match code {
        codes::NET_CONNECTIVITY => RetryPolicy::retryable(3, 0.25, 2.0, 0.10),
        codes::NET_REMOTE_UNREADABLE => RetryPolicy::retryable(1, 0.10, 0.50, 0.05),
        codes::NET_TIMEOUT => RetryPolicy::retryable(2, 0.25, 1.0, 0.10),
        codes::NET_PUSH_FAIL => RetryPolicy::retryable(2, 0.20, 1.0, 0.08),
        codes::GIT_DUBIOUS_OWNERSHIP | codes::GIT_LOCK_CONTENTION | codes::GIT_UPSTREAM_MISSING => {
            RetryPolicy::retryable(1, 0.05, 0.20, 0.02)
        }
        codes::GIT_NON_FAST_FORWARD => RetryPolicy::retryable(1, 0.10, 0.30, 0.04),
        codes::GIT_LINE_ENDING_NORMALIZATION | codes::GIT_INDEX_WORKTREE_MISMATCH => {
            RetryPolicy::retryable(3, 0.05, 0.20, 0.02)
        }
        _ => GENERIC_ALLOWED,
    }
}

pub fn is_retryable(code: &str) -> bool {
    policy_for(code).retryable
}

pub fn is_repeatable(code: &str) -> bool {
    REPEATABLE.contains(&canonical_code(code))
}

/// Per-code cap on the chain's time budget.
pub fn timeout_budget_for(code: &str) -> Duration {
    let secs = match canonical_code(code) {
        codes::NET_CONNECTIVITY => 30,
        codes::NET_REMOTE_UNREADABLE => 15,
        codes::NET_TIMEOUT | codes::NET_PUSH_FAIL => 20,
        codes::GIT_DUBIOUS_OWNERSHIP | codes::GIT_LOCK_CONTENTION | codes::GIT_UPSTREAM_MISSING => 12,
        codes::GIT_NON_FAST_FORWARD | codes::GIT_LINE_ENDING_NORMALIZATION | codes::GIT_INDEX_WORKTREE_MISMATCH => 20,
        _ => return DEFAULT_TIMEOUT_BUDGET,
    };
    Duration::from_secs(secs)
}

/// Hex SHA-256 over `cwd|args|code|stderr-prefix`.
pub fn failure_signature(cwd: &Path, args: &[String], code: &str, stderr: &str) -> String {
    let excerpt: String = stderr.trim().chars().take(SIGNATURE_STDERR_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(cwd.to_string_lossy().as_bytes());
    hasher.update(b"|");
    hasher.update(args.join(" ").as_bytes());
    hasher.update(b"|");
    hasher.update(code.as_bytes());
    hasher.update(b"|");
    hasher.update(excerpt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Why a retry chain stopped before the normal verdict handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardTrip {
    Idempotency,
    CircuitBreaker { code: String },
}

/// Mutable state of one command's retry chain.
///
/// Counters are never shared between unrelated commands.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub tries: u32,
    pub budget: Duration,
    failure_counts: HashMap<String, u32>,
    signature_counts: HashMap<String, u32>,
}

impl RetryState {
    pub fn new(budget: Duration) -> Self {
        Self {
            tries: 0,
            budget,
            failure_counts: HashMap::new(),
            signature_counts: HashMap::new(),
        }
    }

    /// Record one classified failure and check both guards.
    ///
    /// The idempotency guard is checked first: a repeated identical failure
    /// of a non-repeatable code stops the chain even if the breaker has room.
    pub fn record_failure(&mut self, code: &str, signature: &str) -> Option<GuardTrip> {
        let seen = self.signature_counts.entry(signature.to_string()).or_insert(0);
        *seen += 1;
        if *seen > 1 && !is_repeatable(code) {
            return Some(GuardTrip::Idempotency);
        }
        if code.is_empty() {
            return None;
        }
        let failures = self.failure_counts.entry(code.to_string()).or_insert(0);
        *failures += 1;
        if *failures > CIRCUIT_BREAKER_MAX_PER_CODE {
            return Some(GuardTrip::CircuitBreaker { code: code.to_string() });
        }
        None
    }

    /// Narrow the budget to the code's cap. Never widens it.
    pub fn narrow_budget(&mut self, code: &str) {
        self.budget = self.budget.min(timeout_budget_for(code));
    }

    pub fn failures_for(&self, code: &str) -> u32 {
        self.failure_counts.get(code).copied().unwrap_or(0)
    }

    /// Decide whether a `RETRY` verdict may re-run the command.
    ///
    /// Returns the effective ceiling when a retry is permitted. A non-retryable
    /// code still gets one immediate retry on the first attempt, since the
    /// handler may have repaired the precondition.
    pub fn retry_ceiling(&self, policy: &RetryPolicy) -> Option<u32> {
        let (retryable, max_retries) = if !policy.retryable && self.tries == 0 {
            (true, 1)
        } else {
            (policy.retryable, policy.max_retries)
        };
        (retryable && self.tries < max_retries).then_some(max_retries)
    }
}
