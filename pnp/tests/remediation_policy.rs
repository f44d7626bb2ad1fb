use std::path::Path;
use std::time::Duration;

use pnp::core::classifier::Classifier;
use pnp::core::remediation_policy::{OptIns, RemediationAction, can_run, escalate};
use pnp::core::types::StepVerdict;
use pnp::io::config::RuntimeFlags;
use pnp::io::remediation::Remediator;
use pnp::io::telemetry::MemorySink;
use pnp::policy::PolicyEngine;
use pnp::test_support::{ScriptedPrompter, ScriptedRunner};

const NON_FAST_FORWARD: &str = " ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs to 'git@github.com:o/r.git'";

fn remediation_outcomes(events: &MemorySink) -> Vec<String> {
    events
        .of_type("remediation")
        .iter()
        .map(|e| {
            format!(
                "{}:{}",
                e.payload["action"].as_str().unwrap_or(""),
                e.payload["outcome"].as_str().unwrap_or("")
            )
        })
        .collect()
}

#[test]
fn destructive_sync_needs_opt_in_under_auto_fix() {
    let runner = ScriptedRunner::new();
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = RuntimeFlags {
        ci_mode: true,
        autofix: true,
        ..RuntimeFlags::default()
    };
    let engine = PolicyEngine::new(
        Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5)),
        &events,
    );

    let classification = Classifier::new().classify(NON_FAST_FORWARD);
    let decision = engine.decide(&classification, NON_FAST_FORWARD, Path::new("."));

    assert_eq!(decision.result, StepVerdict::Fail);
    assert!(runner.calls().is_empty());
    assert_eq!(remediation_outcomes(&events), vec!["sync_with_remote:blocked"]);
    let blocked = &events.of_type("remediation")[0];
    assert_eq!(blocked.payload["reason"], "action requires --destructive-reset in auto-fix mode");
}

#[test]
fn dry_run_simulates_allowed_remediation_without_commands() {
    let runner = ScriptedRunner::new();
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let flags = RuntimeFlags {
        ci_mode: true,
        autofix: true,
        dry_run: true,
        allow_destructive_reset: true,
        ..RuntimeFlags::default()
    };
    let engine = PolicyEngine::new(
        Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5)),
        &events,
    );

    let classification = Classifier::new().classify(NON_FAST_FORWARD);
    let decision = engine.decide(&classification, NON_FAST_FORWARD, Path::new("."));

    assert_eq!(decision.result, StepVerdict::Skip);
    assert!(runner.calls().is_empty());
    assert_eq!(
        remediation_outcomes(&events),
        vec!["sync_with_remote:allowed", "sync_with_remote:simulated"]
    );
}

#[test]
fn interactive_only_actions_are_blocked_in_ci() {
    for action in [
        RemediationAction::OpenShellManual,
        RemediationAction::AddOriginHttps,
        RemediationAction::OpenTokenPage,
    ] {
        let decision = can_run(action, true, false, false);
        assert!(!decision.allowed, "{action} should be blocked in CI");
    }
    assert!(can_run(RemediationAction::StaleLockCleanup, true, false, false).allowed);
}

#[test]
fn opt_in_lifts_table_block_under_auto_fix() {
    let opt_ins = OptIns {
        safe_reset: false,
        destructive_reset: true,
    };
    assert!(escalate(RemediationAction::DestructiveReset, true, true, opt_ins).allowed);
    assert!(!escalate(RemediationAction::DestructiveReset, true, false, opt_ins).allowed);
    assert!(!escalate(RemediationAction::SafeFixNetwork, true, true, opt_ins).allowed);
}

#[test]
fn declined_interactive_sync_aborts_with_hint() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runner = ScriptedRunner::new().on(&["branch", "--show-current"], vec![ScriptedRunner::exit(0, "main\n", "")]);
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new().with_confirms(vec![false]);
    let flags = RuntimeFlags {
        interactive: true,
        ..RuntimeFlags::default()
    };
    let engine = PolicyEngine::new(
        Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5)),
        &events,
    );

    let classification = Classifier::new().classify(NON_FAST_FORWARD);
    let decision = engine.decide(&classification, NON_FAST_FORWARD, temp.path());

    assert_eq!(decision.result, StepVerdict::Abort);
    assert_eq!(prompter.asked().len(), 1);
    assert_eq!(runner.calls().len(), 1);
    let hints = engine.remediator().take_hints();
    assert!(hints.iter().any(|h| h.contains("git pull --rebase origin main")));
}

#[test]
fn declined_interactive_stash_leaves_worktree_alone() {
    let dirty = "error: Your local changes to the following files would be overwritten by checkout:\n\tREADME.md";
    let runner = ScriptedRunner::new();
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new().with_confirms(vec![false]);
    let flags = RuntimeFlags {
        interactive: true,
        ..RuntimeFlags::default()
    };
    let engine = PolicyEngine::new(
        Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(5)),
        &events,
    );

    let classification = Classifier::new().classify(dirty);
    let decision = engine.decide(&classification, dirty, Path::new("."));

    assert_eq!(decision.result, StepVerdict::Abort);
    assert_eq!(prompter.asked(), vec!["Stash local changes and retry?".to_string()]);
    assert!(runner.calls().is_empty());
    assert_eq!(remediation_outcomes(&events), vec!["auto_stash:allowed"]);
}
