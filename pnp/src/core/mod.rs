//! Deterministic, pure logic for the release workflow.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod commit_message;
pub mod error_model;
pub mod remediation_policy;
pub mod retry;
pub mod semver;
pub mod types;
