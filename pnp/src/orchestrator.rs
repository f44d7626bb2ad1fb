//! Workflow orchestrator and the concrete git release steps.
//!
//! The [`Orchestrator`] drives the seven steps in fixed order and owns the
//! [`RunContext`]; it knows nothing about git. [`GitWorkflow`] implements the
//! steps on top of the resilient executor.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::core::commit_message::{generate, parse_name_status};
use crate::core::error_model::{FailureEvent, WorkflowStep, codes, resolve_failure_code};
use crate::core::semver::bump_tag;
use crate::core::types::StepVerdict;
use crate::io::branch_stack::{MACHETE_BINARY, find_on_path, sync_stack};
use crate::io::changelog::{append_entry, format_entry, latest_entry};
use crate::io::config::RunConfig;
use crate::io::executor::ResilientExecutor;
use crate::io::git::Git;
use crate::io::hooks::{parse_hooks, run_hook};
use crate::io::process::{CommandRunner, interrupted};
use crate::io::prompt::Prompter;
use crate::io::release::{ReleasePublisher, ReleaseRequest};
use crate::io::repo::{find_package, find_repo, log_dir};
use crate::io::telemetry::{EventSink, utc_timestamp};

/// State shared between steps. Each step reads what earlier steps wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub start: PathBuf,
    pub repo: Option<PathBuf>,
    pub package: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub tag: Option<String>,
    pub commit_message: Option<String>,
    pub changelog: Option<String>,
}

impl RunContext {
    pub fn new(start: impl Into<PathBuf>) -> Self {
        Self {
            start: start.into(),
            ..Self::default()
        }
    }

    fn repo(&self) -> Result<&Path> {
        self.repo
            .as_deref()
            .ok_or_else(|| anyhow!("repository not resolved"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub verdict: StepVerdict,
    pub message: String,
}

impl StepOutcome {
    pub fn new(verdict: StepVerdict, message: impl Into<String>) -> Self {
        Self {
            verdict,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(StepVerdict::Ok, message)
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(StepVerdict::Skip, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(StepVerdict::Fail, message)
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(StepVerdict::Abort, message)
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(StepVerdict::Done, message)
    }
}

/// The step implementations driven by the orchestrator.
pub trait WorkflowSteps {
    fn run_step(&mut self, step: WorkflowStep, ctx: &mut RunContext) -> Result<StepOutcome>;

    /// Most recent classified error code seen while the last step ran.
    fn last_classified_code(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: WorkflowStep,
    pub verdict: StepVerdict,
    pub message: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step returned `OK` or `SKIP`.
    Completed,
    /// A step ended the run early and successfully.
    Done { step: WorkflowStep, message: String },
    Failed(FailureEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub steps: Vec<StepRecord>,
    pub outcome: RunOutcome,
    pub context: RunContext,
}

impl RunReport {
    pub fn failure(&self) -> Option<&FailureEvent> {
        match &self.outcome {
            RunOutcome::Failed(event) => Some(event),
            _ => None,
        }
    }

    pub fn executed(&self) -> Vec<WorkflowStep> {
        self.steps.iter().map(|r| r.step).collect()
    }
}

pub struct Orchestrator<'a> {
    events: &'a dyn EventSink,
}

impl<'a> Orchestrator<'a> {
    pub fn new(events: &'a dyn EventSink) -> Self {
        Self { events }
    }

    /// Run all steps in order until one fails, aborts or finishes the run.
    #[instrument(skip_all, fields(start = %ctx.start.display()))]
    pub fn run(&self, steps: &mut dyn WorkflowSteps, mut ctx: RunContext) -> RunReport {
        let mut records = Vec::new();
        self.events.emit("run_start", None, json!({ "start": ctx.start.display().to_string() }));

        for step in WorkflowStep::ALL {
            if interrupted() {
                let event = FailureEvent::new(step, "abort", "cancelled by user", codes::INT_KEYBOARD_INTERRUPT);
                return self.finish(records, RunOutcome::Failed(event), ctx);
            }

            self.events.emit("step_start", Some(step.key()), json!({ "label": step.label() }));
            let started = Instant::now();
            let outcome = steps.run_step(step, &mut ctx).unwrap_or_else(|e| {
                error!(step = step.key(), err = %format!("{e:#}"), "step errored");
                StepOutcome::fail(format!("{e:#}"))
            });
            let elapsed_ms = started.elapsed().as_millis() as u64;
            self.events.emit(
                "step_end",
                Some(step.key()),
                json!({
                    "result": outcome.verdict.as_str(),
                    "message": outcome.message,
                    "elapsed_ms": elapsed_ms,
                }),
            );
            debug!(step = step.key(), result = %outcome.verdict, "step finished");
            records.push(StepRecord {
                step,
                verdict: outcome.verdict,
                message: outcome.message.clone(),
                elapsed_ms,
            });

            match outcome.verdict {
                StepVerdict::Ok | StepVerdict::Skip => {}
                StepVerdict::Done => {
                    info!(step = step.key(), "run finished early");
                    let done = RunOutcome::Done {
                        step,
                        message: outcome.message,
                    };
                    return self.finish(records, done, ctx);
                }
                // Retry never escapes the executor; a step returning it is a bug in the step.
                StepVerdict::Fail | StepVerdict::Abort | StepVerdict::Retry => {
                    let classified = steps.last_classified_code();
                    let code = if interrupted() {
                        codes::INT_KEYBOARD_INTERRUPT.to_string()
                    } else {
                        resolve_failure_code(Some(step), classified.as_deref())
                    };
                    let result = match outcome.verdict {
                        StepVerdict::Abort => "abort",
                        _ => "fail",
                    };
                    warn!(step = step.key(), code = %code, "step failed");
                    let event = FailureEvent::new(step, result, &outcome.message, &code);
                    return self.finish(records, RunOutcome::Failed(event), ctx);
                }
            }
        }
        self.finish(records, RunOutcome::Completed, ctx)
    }

    fn finish(&self, steps: Vec<StepRecord>, outcome: RunOutcome, context: RunContext) -> RunReport {
        let payload = match &outcome {
            RunOutcome::Completed => json!({ "result": "completed" }),
            RunOutcome::Done { step, .. } => json!({ "result": "done", "step": step.key() }),
            RunOutcome::Failed(event) => json!({ "result": "failed", "failure": event }),
        };
        self.events.emit("run_end", None, payload);
        RunReport {
            steps,
            outcome,
            context,
        }
    }
}

/// The git release workflow.
pub struct GitWorkflow<'w, 'a> {
    cfg: &'w RunConfig,
    exec: &'w ResilientExecutor<'a>,
    runner: &'w dyn CommandRunner,
    prompter: &'w dyn Prompter,
    publisher: &'w dyn ReleasePublisher,
    events: &'w dyn EventSink,
    last_code: Option<String>,
}

impl<'w, 'a> GitWorkflow<'w, 'a> {
    pub fn new(
        cfg: &'w RunConfig,
        exec: &'w ResilientExecutor<'a>,
        runner: &'w dyn CommandRunner,
        prompter: &'w dyn Prompter,
        publisher: &'w dyn ReleasePublisher,
        events: &'w dyn EventSink,
    ) -> Self {
        Self {
            cfg,
            exec,
            runner,
            prompter,
            publisher,
            events,
            last_code: None,
        }
    }

    fn git(&self, ctx: &RunContext) -> Result<Git<'w, 'a>> {
        Ok(Git::new(self.exec, ctx.repo()?))
    }

    fn interactive(&self) -> bool {
        self.exec.flags().interactive
    }

    fn dry_run(&self) -> bool {
        self.exec.flags().dry_run
    }

    fn repository(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        let Some(repo) = find_repo(&ctx.start) else {
            return self.missing_repository(ctx);
        };
        ctx.package = find_package(&ctx.start, &repo);
        ctx.log_dir = Some(log_dir(&repo));
        let message = match &ctx.package {
            Some(package) if package != &repo => {
                format!("repository {} (package {})", repo.display(), package.display())
            }
            _ => format!("repository {}", repo.display()),
        };
        ctx.repo = Some(repo);
        Ok(StepOutcome::ok(message))
    }

    fn missing_repository(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        let flags = self.exec.flags();
        if flags.ci_mode && !flags.autofix {
            return Ok(StepOutcome::abort("no git repository found"));
        }
        if !self.interactive() {
            return Ok(StepOutcome::done("no git repository found; nothing to release"));
        }
        let question = format!("No git repository found at {}. Initialize one?", ctx.start.display());
        if !self.prompter.confirm(&question, false)? {
            return Ok(StepOutcome::done("repository initialization declined"));
        }
        if self.dry_run() {
            return Ok(StepOutcome::done("[dry-run] would run git init"));
        }
        let init = Git::new(self.exec, &ctx.start).init()?;
        if !init.success() {
            return Ok(StepOutcome::abort(format!("git init failed: {}", init.output.trim())));
        }
        ctx.package = find_package(&ctx.start, &ctx.start);
        ctx.log_dir = Some(log_dir(&ctx.start));
        ctx.repo = Some(ctx.start.clone());
        Ok(StepOutcome::ok(format!("initialized repository {}", ctx.start.display())))
    }

    fn hooks(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        let hooks = self.cfg.hooks.as_deref().map(parse_hooks).unwrap_or_default();
        if hooks.is_empty() {
            return Ok(StepOutcome::skip("no hooks configured"));
        }
        if self.dry_run() {
            return Ok(StepOutcome::ok(format!("[dry-run] would run {} hook(s)", hooks.len())));
        }
        let cwd = match &ctx.package {
            Some(package) => package.clone(),
            None => ctx.repo()?.to_path_buf(),
        };
        let mut continued = 0usize;
        for hook in &hooks {
            let failure = match run_hook(self.runner, hook, &cwd, self.cfg.hook_timeout()) {
                Ok(out) => {
                    self.events.emit(
                        "hook",
                        Some(WorkflowStep::Hooks.key()),
                        json!({ "label": hook.label, "exit_code": out.code }),
                    );
                    (!out.success()).then(|| format!("hook '{}' failed (exit {}): {}", hook.label, out.code, out.combined()))
                }
                Err(e) => Some(format!("{e:#}")),
            };
            let Some(failure) = failure else {
                continue;
            };
            if !self.interactive() {
                return Ok(StepOutcome::fail(failure));
            }
            let question = format!("{failure}\nHow do you want to proceed?");
            match self.prompter.choose(&question, &["continue", "abort"])? {
                Some(0) => continued += 1,
                _ => return Ok(StepOutcome::abort(failure)),
            }
        }
        Ok(StepOutcome::ok(match continued {
            0 => format!("{} hook(s) passed", hooks.len()),
            n => format!("{} hook(s) ran, {n} failure(s) accepted", hooks.len()),
        }))
    }

    fn machete(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        let machete = &self.cfg.machete;
        if !machete.enabled {
            return Ok(StepOutcome::skip("branch stack sync disabled"));
        }
        if find_on_path(MACHETE_BINARY).is_none() {
            return Ok(StepOutcome::abort(format!("{MACHETE_BINARY} not found on PATH")));
        }
        if self.dry_run() {
            return Ok(StepOutcome::ok("[dry-run] would run git machete traverse"));
        }
        let git = self.git(ctx)?;
        Ok(match sync_stack(&git, machete, self.interactive())? {
            Some(failure) => StepOutcome::fail(failure),
            None => StepOutcome::ok("branch stack synced"),
        })
    }

    #[instrument(skip_all)]
    fn commit(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        let git = self.git(ctx)?;
        if !git.has_changes()? {
            let latest = match &ctx.log_dir {
                Some(dir) => latest_entry(dir)?,
                None => None,
            };
            return Ok(StepOutcome::skip(match latest {
                Some(entry) => format!("no changes to commit; last entry:\n{entry}"),
                None => "no changes to commit".to_string(),
            }));
        }
        let flags = self.exec.flags();
        if self.interactive() && !flags.autofix && !self.prompter.confirm("Stage and commit all changes?", true)? {
            return Ok(StepOutcome::skip("commit declined"));
        }
        if self.dry_run() {
            return Ok(StepOutcome::ok("[dry-run] would stage and commit all changes"));
        }

        let staged = git.stage_all()?;
        if !staged.success() {
            self.unstage(&git);
            return Ok(StepOutcome::abort(format!("staging failed: {}", staged.output.trim())));
        }
        let message = match &self.cfg.tag.message {
            Some(message) => message.clone(),
            None => generate(&parse_name_status(&git.staged_name_status()?)),
        };
        let committed = git.commit(&message)?;
        if !committed.success() {
            self.unstage(&git);
            return Ok(StepOutcome::abort(format!("commit failed: {}", committed.output.trim())));
        }
        info!(message = %message, "changes committed");
        ctx.commit_message = Some(message.clone());

        let since = git.tags_sorted(&self.cfg.tag.prefix)?.into_iter().next();
        let log = git.log_since(since.as_deref())?;
        if let Some(dir) = &ctx.log_dir {
            let range = match &since {
                Some(tag) => format!("{tag}..HEAD"),
                None => "HEAD".to_string(),
            };
            append_entry(dir, &format_entry(&utc_timestamp(), &range, &log))?;
        }
        ctx.changelog = Some(log);
        Ok(StepOutcome::ok(format!("committed: {message}")))
    }

    fn unstage(&self, git: &Git<'_, '_>) {
        match git.unstage() {
            Ok(out) if out.success() => debug!("staged changes reset"),
            Ok(out) => warn!(code = out.code, "unstage failed"),
            Err(e) => warn!(err = %format!("{e:#}"), "unstage failed"),
        }
    }

    /// Configured remote, else the upstream's remote, else the first remote.
    fn remote(&self, git: &Git<'_, '_>, upstream: Option<&str>) -> Result<String> {
        if let Some(remote) = &self.cfg.remote {
            return Ok(remote.clone());
        }
        if let Some((remote, _)) = upstream.and_then(|u| u.split_once('/')) {
            return Ok(remote.to_string());
        }
        Ok(git.remotes()?.into_iter().next().unwrap_or_else(|| "origin".to_string()))
    }

    #[instrument(skip_all)]
    fn push(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        if !self.cfg.push {
            return Ok(StepOutcome::skip("push disabled"));
        }
        let git = self.git(ctx)?;
        let fetched = git.fetch_all()?;
        if !fetched.success() {
            return Ok(StepOutcome::fail(format!("fetch failed: {}", fetched.output.trim())));
        }
        let Some(branch) = git.current_branch()? else {
            return Ok(StepOutcome::abort("HEAD is detached; check out a branch before pushing"));
        };
        let upstream = git.upstream_of(&branch)?;
        let remote = self.remote(&git, upstream.as_deref())?;

        let mut force = false;
        if let Some(upstream) = &upstream {
            let divergence = git.divergence(upstream, &branch)?;
            if divergence.remote_ahead > 0 {
                let behind = format!("{upstream} is ahead of {branch} by {} commit(s)", divergence.remote_ahead);
                if self.cfg.force {
                    warn!(%behind, "force pushing");
                    force = true;
                } else if !self.interactive() {
                    return Ok(StepOutcome::abort(format!("{behind}; rerun with --force or sync first")));
                } else if self.prompter.confirm(&format!("{behind}. Force push?"), false)? {
                    force = true;
                } else {
                    return Ok(StepOutcome::abort(format!("{behind}; push cancelled")));
                }
            }
        }

        if self.dry_run() {
            return Ok(StepOutcome::ok(format!("[dry-run] would push {branch} to {remote}")));
        }
        let pushed = git.push_branch(&remote, &branch, force, upstream.is_none())?;
        if !pushed.success() {
            return Ok(StepOutcome::fail(format!("push failed: {}", pushed.output.trim())));
        }
        Ok(StepOutcome::ok(format!("pushed {branch} to {remote}")))
    }

    #[instrument(skip_all)]
    fn publish(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        if !self.cfg.publish {
            return Ok(StepOutcome::skip("tag publishing disabled"));
        }
        let git = self.git(ctx)?;
        let tag_cfg = &self.cfg.tag;
        let latest = git.tags_sorted(&tag_cfg.prefix)?.into_iter().next().unwrap_or_default();
        let tag = match bump_tag(&latest, tag_cfg.bump, &tag_cfg.prefix) {
            Ok(tag) => tag,
            Err(e) => return Ok(StepOutcome::fail(format!("{e:#}"))),
        };
        if git.tag_exists(&tag)? {
            return Ok(StepOutcome::fail(format!("tag {tag} already exists")));
        }
        let message = tag_cfg
            .message
            .clone()
            .or_else(|| ctx.commit_message.clone())
            .unwrap_or_else(|| format!("Release {tag}"));
        if self.dry_run() {
            ctx.tag = Some(tag.clone());
            return Ok(StepOutcome::ok(format!("[dry-run] would create and push {tag}")));
        }

        let created = git.create_tag(&tag, &message, tag_cfg.sign)?;
        if !created.success() {
            return Ok(StepOutcome::fail(format!("creating {tag} failed: {}", created.output.trim())));
        }
        let remote = self.remote(&git, None)?;
        let pushed = git.push_tags(&remote, self.cfg.force)?;
        if !pushed.success() {
            if let Err(e) = git.delete_tag(&tag) {
                warn!(err = %format!("{e:#}"), tag = %tag, "could not delete tag after failed push");
            }
            return Ok(StepOutcome::abort(format!("pushing {tag} failed: {}", pushed.output.trim())));
        }
        ctx.tag = Some(tag.clone());
        Ok(StepOutcome::ok(format!("published {tag}")))
    }

    fn release(&mut self, ctx: &mut RunContext) -> Result<StepOutcome> {
        if !self.cfg.release {
            return Ok(StepOutcome::skip("release disabled"));
        }
        let tag = match ctx.tag.clone() {
            Some(tag) => Some(tag),
            None => self.git(ctx)?.tags_sorted(&self.cfg.tag.prefix)?.into_iter().next(),
        };
        let Some(tag) = tag else {
            return Ok(StepOutcome::fail("no tag to release; enable publishing or create a tag first"));
        };
        let Some(token) = self.cfg.github_token() else {
            return Ok(StepOutcome::fail("missing GitHub token (github.token or GITHUB_TOKEN)"));
        };
        let Some(repo) = self.exec.flags().gh_repo.clone() else {
            return Ok(StepOutcome::fail("missing github.repo (owner/name)"));
        };
        if self.dry_run() {
            return Ok(StepOutcome::ok(format!("[dry-run] would create release {tag} on {repo}")));
        }
        let request = ReleaseRequest {
            repo,
            notes: ctx.changelog.clone().unwrap_or_else(|| format!("Release {tag}")),
            tag,
            token,
            draft: self.cfg.github.draft,
            prerelease: self.cfg.github.prerelease,
            assets: self.cfg.github.assets.clone(),
        };
        Ok(match self.publisher.publish(&request) {
            Ok(summary) => StepOutcome::ok(summary),
            Err(e) => StepOutcome::fail(format!("{e:#}")),
        })
    }
}

impl WorkflowSteps for GitWorkflow<'_, '_> {
    fn run_step(&mut self, step: WorkflowStep, ctx: &mut RunContext) -> Result<StepOutcome> {
        // Codes and hints from earlier steps must not be attributed to this one.
        self.exec.take_last_code();
        self.exec.policy().remediator().take_hints();

        let result = match step {
            WorkflowStep::Repository => self.repository(ctx),
            WorkflowStep::Hooks => self.hooks(ctx),
            WorkflowStep::Machete => self.machete(ctx),
            WorkflowStep::Commit => self.commit(ctx),
            WorkflowStep::Push => self.push(ctx),
            WorkflowStep::Publish => self.publish(ctx),
            WorkflowStep::Release => self.release(ctx),
        };
        self.last_code = self.exec.take_last_code();

        let mut outcome = result?;
        let hints = self.exec.policy().remediator().take_hints();
        if outcome.verdict.is_terminal_failure() && !hints.is_empty() {
            outcome.message = format!("{} (hint: {})", outcome.message, hints.join("; "));
        }
        Ok(outcome)
    }

    fn last_classified_code(&self) -> Option<String> {
        self.last_code.clone()
    }
}
