//! Stable exit codes for the `pnp` CLI and the resilient executor.

/// Command or workflow succeeded.
pub const OK: i32 = 0;
/// Workflow failed, configuration was invalid, or a dry-run skipped the command.
pub const INVALID: i32 = 1;
/// The same failure signature repeated; remediation had no effect.
pub const IDEMPOTENCY_GUARD: i32 = 65;
/// Too many failures with the same classified code in one retry chain.
pub const CIRCUIT_BREAKER: i32 = 75;
/// The retry chain ran out of its time budget.
pub const TIMEOUT: i32 = 124;
/// Interrupted by the operator (SIGINT).
pub const INTERRUPTED: i32 = 130;
