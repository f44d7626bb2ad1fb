//! Time budget helpers for retry chains.

use std::time::{Duration, Instant};

/// Remaining time of `budget` measured from `started_at`, or `None` once exhausted.
pub fn remaining_budget(started_at: Instant, budget: Duration) -> Option<Duration> {
    let remaining = budget.saturating_sub(started_at.elapsed());
    (!remaining.is_zero()).then_some(remaining)
}
