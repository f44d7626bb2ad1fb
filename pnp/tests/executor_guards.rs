use std::fs;
use std::path::Path;
use std::time::Duration;

use pnp::exit_codes;
use pnp::io::config::RuntimeFlags;
use pnp::io::executor::{FixedJitter, ResilientExecutor, no_sleep};
use pnp::io::remediation::Remediator;
use pnp::io::telemetry::MemorySink;
use pnp::policy::PolicyEngine;
use pnp::test_support::{ScriptedPrompter, ScriptedRunner};

const LINE_ENDING_WARNING: &str = "warning: LF will be replaced by CRLF in notes.txt.";

fn ci_flags() -> RuntimeFlags {
    RuntimeFlags {
        ci_mode: true,
        ..RuntimeFlags::default()
    }
}

fn executor<'a>(
    runner: &'a ScriptedRunner,
    events: &'a MemorySink,
    prompter: &'a ScriptedPrompter,
    flags: &'a RuntimeFlags,
) -> ResilientExecutor<'a> {
    let remediator = Remediator::new(runner, events, prompter, flags, Duration::from_secs(5));
    ResilientExecutor::new(
        runner,
        PolicyEngine::new(remediator, events),
        events,
        flags,
        Duration::from_secs(5),
        Duration::from_secs(45),
    )
    .with_jitter(FixedJitter(0.0))
    .with_sleeper(no_sleep)
}

fn lock_stderr(lock: &Path) -> String {
    format!(
        "fatal: Unable to create '{}': File exists.\n\nAnother git process seems to be running in this repository.",
        lock.display()
    )
}

#[test]
fn identical_failure_after_remediation_trips_idempotency_guard() {
    let temp = tempfile::tempdir().expect("tempdir");
    let git_dir = temp.path().join(".git");
    fs::create_dir_all(&git_dir).expect("mkdir .git");
    let lock = git_dir.join("index.lock");
    fs::write(&lock, "").expect("write lock");

    let runner = ScriptedRunner::new().on(&["fetch"], vec![ScriptedRunner::exit(128, "", &lock_stderr(&lock))]);
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = ci_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let result = exec.run(&["fetch", "origin"], temp.path()).expect("run");

    assert_eq!(result.code, exit_codes::IDEMPOTENCY_GUARD);
    assert_eq!(runner.count(&["fetch"]), 2);
    let guards = events.of_type("retry_guard");
    assert_eq!(guards.len(), 1);
    assert_eq!(guards[0].payload["guard"], "idempotency");
}

#[test]
fn repeatable_failure_trips_circuit_breaker_on_fourth_attempt() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(&["commit"], vec![ScriptedRunner::exit(1, "", LINE_ENDING_WARNING)]);
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = ci_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let result = exec.run(&["commit", "-m", "msg"], temp.path()).expect("run");

    assert_eq!(result.code, exit_codes::CIRCUIT_BREAKER);
    assert_eq!(runner.count(&["commit"]), 4);
    assert_eq!(runner.count(&["add", "--renormalize", "."]), 4);
    assert_eq!(events.of_type("retry").len(), 3);
    assert!(temp.path().join(".gitattributes").is_file());
    assert_eq!(exec.take_last_code().as_deref(), Some("PNP_GIT_LINE_ENDING_NORMALIZATION"));
}

#[test]
fn remediated_failure_succeeds_on_retry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(
        &["commit"],
        vec![
            ScriptedRunner::exit(1, "", LINE_ENDING_WARNING),
            ScriptedRunner::exit(0, "[main abc123] msg", ""),
        ],
    );
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = ci_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let result = exec.run(&["commit", "-m", "msg"], temp.path()).expect("run");

    assert!(result.success());
    assert_eq!(result.output, "[main abc123] msg");
    assert_eq!(runner.count(&["commit"]), 2);
    assert_eq!(events.of_type("classification").len(), 1);
}

#[test]
fn guard_counters_do_not_leak_between_commands() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(&["commit"], vec![ScriptedRunner::exit(1, "", LINE_ENDING_WARNING)]);
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = ci_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let first = exec.run(&["commit", "-m", "one"], temp.path()).expect("run");
    let second = exec.run(&["commit", "-m", "two"], temp.path()).expect("run");

    assert_eq!(first.code, exit_codes::CIRCUIT_BREAKER);
    assert_eq!(second.code, exit_codes::CIRCUIT_BREAKER);
    assert_eq!(runner.count(&["commit"]), 8);
}

#[test]
fn non_retryable_code_fails_without_retry_in_ci() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(
        &["push"],
        vec![ScriptedRunner::exit(
            1,
            "",
            "remote: error: GH006: Protected branch update failed for refs/heads/main.",
        )],
    );
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = ci_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let result = exec.run(&["push", "origin", "main"], temp.path()).expect("run");

    assert_eq!(result.code, 1);
    assert_eq!(runner.count(&["push"]), 1);
    assert!(events.of_type("retry").is_empty());
    let hints = exec.policy().remediator().take_hints();
    assert!(hints.iter().any(|h| h.contains("protected")));
}

const DIRTY_MERGE: &str = "error: Your local changes to the following files would be overwritten by merge:\n\tREADME.md\nPlease commit your changes or stash them before you merge.\nAborting";

fn autofix_flags() -> RuntimeFlags {
    RuntimeFlags {
        ci_mode: true,
        autofix: true,
        ..RuntimeFlags::default()
    }
}

fn stash_outcomes(events: &MemorySink) -> Vec<String> {
    events
        .of_type("remediation")
        .iter()
        .filter(|e| e.payload["action"] == "auto_stash")
        .map(|e| e.payload["outcome"].as_str().unwrap_or("").to_string())
        .collect()
}

#[test]
fn auto_stash_is_gated_and_restored_after_success() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(
        &["merge"],
        vec![ScriptedRunner::exit(1, "", DIRTY_MERGE), ScriptedRunner::exit(0, "merged", "")],
    );
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = autofix_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let result = exec.run(&["merge", "topic"], temp.path()).expect("run");

    assert_eq!(result.code, exit_codes::OK);
    assert_eq!(result.output, "merged");
    assert_eq!(runner.count(&["stash", "push"]), 1);
    assert_eq!(runner.count(&["stash", "pop"]), 1);
    assert_eq!(stash_outcomes(&events), vec!["allowed", "success", "restored"]);
}

#[test]
fn stash_is_restored_when_the_retry_fails_and_not_popped_again() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(
        &["merge"],
        vec![ScriptedRunner::exit(1, "", DIRTY_MERGE), ScriptedRunner::exit(128, "", "fatal: weird")],
    );
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = autofix_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let failed = exec.run(&["merge", "topic"], temp.path()).expect("run");
    assert_eq!(failed.code, 128);
    assert_eq!(runner.count(&["stash", "pop"]), 1);

    let later = exec.run(&["status"], temp.path()).expect("run");
    assert!(later.success());
    assert_eq!(runner.count(&["stash", "pop"]), 1);
    assert_eq!(stash_outcomes(&events), vec!["allowed", "success", "restored"]);
}

#[test]
fn dirty_worktree_without_auto_fix_never_stashes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(&["merge"], vec![ScriptedRunner::exit(1, "", DIRTY_MERGE)]);
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = ci_flags();
    let exec = executor(&runner, &events, &prompter, &flags);

    let result = exec.run(&["merge", "topic"], temp.path()).expect("run");

    assert_eq!(result.code, 1);
    assert_eq!(runner.count(&["stash"]), 0);
    assert!(stash_outcomes(&events).is_empty());
    let hints = exec.policy().remediator().take_hints();
    assert!(hints.iter().any(|h| h.contains("commit or stash")));
}
