use std::fs;
use std::time::Duration;

use anyhow::{Result, bail};
use pnp::core::error_model::WorkflowStep;
use pnp::core::types::StepVerdict;
use pnp::io::changelog::CHANGES_FILE;
use pnp::io::config::{RunConfig, RuntimeFlags};
use pnp::io::executor::{ResilientExecutor, no_sleep};
use pnp::io::process::SystemRunner;
use pnp::io::release::{ReleasePublisher, ReleaseRequest};
use pnp::io::remediation::Remediator;
use pnp::io::telemetry::MemorySink;
use pnp::orchestrator::{GitWorkflow, Orchestrator, RunContext, RunOutcome, RunReport, WorkflowSteps};
use pnp::policy::PolicyEngine;
use pnp::test_support::{ScriptedPrompter, TestRepo};

struct NoPublisher;

impl ReleasePublisher for NoPublisher {
    fn publish(&self, _request: &ReleaseRequest) -> Result<String> {
        bail!("release publishing is not available in tests")
    }
}

fn ci_config(force: bool) -> RunConfig {
    RunConfig {
        push: true,
        force,
        ci: true,
        interactive: false,
        ..RunConfig::default()
    }
}

/// Run only the push step against the work clone.
fn push_step(repo: &TestRepo, cfg: &RunConfig) -> (StepVerdict, String) {
    let flags = RuntimeFlags::from_config(cfg);
    let runner = SystemRunner::default();
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let remediator = Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(30));
    let exec = ResilientExecutor::new(
        &runner,
        PolicyEngine::new(remediator, &events),
        &events,
        &flags,
        Duration::from_secs(30),
        Duration::from_secs(45),
    )
    .with_sleeper(no_sleep);
    let publisher = NoPublisher;
    let mut workflow = GitWorkflow::new(cfg, &exec, &runner, &prompter, &publisher, &events);

    let mut ctx = RunContext::new(&repo.work);
    ctx.repo = Some(repo.work.clone());
    let outcome = workflow.run_step(WorkflowStep::Push, &mut ctx).expect("push step");
    (outcome.verdict, outcome.message)
}

/// Run the whole workflow against the work clone.
fn full_run(repo: &TestRepo, cfg: &RunConfig) -> RunReport {
    let flags = RuntimeFlags::from_config(cfg);
    let runner = SystemRunner::default();
    let events = MemorySink::new();
    let prompter = ScriptedPrompter::new();
    let remediator = Remediator::new(&runner, &events, &prompter, &flags, Duration::from_secs(30));
    let exec = ResilientExecutor::new(
        &runner,
        PolicyEngine::new(remediator, &events),
        &events,
        &flags,
        Duration::from_secs(30),
        Duration::from_secs(45),
    )
    .with_sleeper(no_sleep);
    let publisher = NoPublisher;
    let mut workflow = GitWorkflow::new(cfg, &exec, &runner, &prompter, &publisher, &events);

    Orchestrator::new(&events).run(&mut workflow, RunContext::new(&repo.work))
}

fn release_config(force: bool) -> RunConfig {
    RunConfig {
        publish: true,
        ..ci_config(force)
    }
}

#[test]
fn diverged_remote_aborts_push_without_force() {
    let repo = TestRepo::new();
    repo.push_conflicting_commit();
    repo.commit_file("local.txt", "local\n", "local change");
    let remote_before = repo.remote_head();

    let (verdict, message) = push_step(&repo, &ci_config(false));

    assert_eq!(verdict, StepVerdict::Abort, "{message}");
    assert!(message.contains("ahead"), "{message}");
    assert_eq!(repo.remote_head(), remote_before);
}

#[test]
fn force_overwrites_diverged_remote() {
    let repo = TestRepo::new();
    repo.push_conflicting_commit();
    repo.commit_file("local.txt", "local\n", "local change");

    let (verdict, message) = push_step(&repo, &ci_config(true));

    assert_eq!(verdict, StepVerdict::Ok, "{message}");
    assert_eq!(repo.remote_head(), repo.local_head());
}

#[test]
fn push_disabled_is_skipped() {
    let repo = TestRepo::new();
    let cfg = RunConfig {
        push: false,
        ..ci_config(false)
    };

    let (verdict, _) = push_step(&repo, &cfg);

    assert_eq!(verdict, StepVerdict::Skip);
}

#[test]
fn batch_run_commits_pushes_and_tags() {
    let repo = TestRepo::new();
    fs::write(repo.work.join("feature.txt"), "new feature\n").expect("write");
    let cfg = RunConfig {
        batch_commit: true,
        ..release_config(false)
    };
    let report = full_run(&repo, &cfg);

    assert_eq!(report.outcome, RunOutcome::Completed, "{:?}", report.steps);
    let verdicts: Vec<StepVerdict> = report.steps.iter().map(|s| s.verdict).collect();
    assert_eq!(
        verdicts,
        vec![
            StepVerdict::Ok,
            StepVerdict::Skip,
            StepVerdict::Skip,
            StepVerdict::Ok,
            StepVerdict::Ok,
            StepVerdict::Ok,
            StepVerdict::Skip,
        ]
    );
    assert_eq!(report.context.tag.as_deref(), Some("v0.0.1"));
    assert_eq!(repo.remote_head(), repo.local_head());
    assert!(repo.remote_git(&["tag", "--list"]).contains("v0.0.1"));
    let message = report.context.commit_message.expect("commit message");
    assert!(message.contains("feature.txt"), "{message}");
    let changes = fs::read_to_string(repo.work.join("pnplog").join(CHANGES_FILE)).expect("changes log");
    assert!(changes.contains("initial commit"));
}

#[test]
fn diverged_release_run_aborts_at_push_and_leaves_remote_alone() {
    let repo = TestRepo::new();
    repo.push_conflicting_commit();
    repo.commit_file("local.txt", "local\n", "local change");
    let remote_before = repo.remote_head();

    let report = full_run(&repo, &release_config(false));

    assert_eq!(
        report.executed(),
        vec![
            WorkflowStep::Repository,
            WorkflowStep::Hooks,
            WorkflowStep::Machete,
            WorkflowStep::Commit,
            WorkflowStep::Push,
        ]
    );
    let push = report.steps.last().expect("push record");
    assert_eq!(push.verdict, StepVerdict::Abort, "{}", push.message);
    let failure = report.failure().expect("failure");
    assert_eq!(failure.step, "push");
    assert_eq!(failure.result, "abort");
    assert_eq!(failure.code, "PNP_NET_PUSH_FAIL");
    assert_eq!(repo.remote_head(), remote_before);
    assert!(repo.remote_git(&["tag", "--list"]).is_empty());
}

#[test]
fn forced_release_run_completes_and_publishes_first_tag() {
    let repo = TestRepo::new();
    repo.push_conflicting_commit();
    repo.commit_file("local.txt", "local\n", "local change");

    let report = full_run(&repo, &release_config(true));

    assert_eq!(report.outcome, RunOutcome::Completed, "{:?}", report.steps);
    let publish = report
        .steps
        .iter()
        .find(|s| s.step == WorkflowStep::Publish)
        .expect("publish record");
    assert_eq!(publish.verdict, StepVerdict::Ok, "{}", publish.message);
    assert_eq!(report.context.tag.as_deref(), Some("v0.0.1"));
    assert_eq!(repo.remote_head(), repo.local_head());
    assert!(repo.remote_git(&["tag", "--list"]).contains("v0.0.1"));
}
