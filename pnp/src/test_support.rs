//! Test doubles and throwaway repositories.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::error_model::WorkflowStep;
use crate::core::types::StepVerdict;
use crate::io::process::{CommandRunner, CommandSpec, ProcessOutput};
use crate::io::prompt::Prompter;
use crate::orchestrator::{RunContext, StepOutcome, WorkflowSteps};

struct Script {
    prefix: Vec<String>,
    outputs: VecDeque<ProcessOutput>,
    spawn_error: bool,
}

impl Script {
    fn matches(&self, spec: &CommandSpec) -> bool {
        let prefix: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        spec.args_start_with(&prefix)
    }

    /// Pops queued outputs; the last one repeats forever.
    fn next_output(&mut self) -> ProcessOutput {
        if self.outputs.len() > 1 {
            self.outputs.pop_front().unwrap_or_default()
        } else {
            self.outputs.front().cloned().unwrap_or_default()
        }
    }
}

/// Command runner that replays canned outputs by argument prefix.
///
/// The first matching script wins. Commands with no script succeed with
/// empty output. Every call is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: RefCell<Vec<Script>>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, prefix: &[&str], outputs: Vec<ProcessOutput>) -> Self {
        self.scripts.borrow_mut().push(Script {
            prefix: prefix.iter().map(|p| p.to_string()).collect(),
            outputs: outputs.into(),
            spawn_error: false,
        });
        self
    }

    /// Commands starting with `prefix` fail to spawn.
    pub fn failing_spawn(self, prefix: &[&str]) -> Self {
        self.scripts.borrow_mut().push(Script {
            prefix: prefix.iter().map(|p| p.to_string()).collect(),
            outputs: VecDeque::new(),
            spawn_error: true,
        });
        self
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Number of recorded calls whose arguments start with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls.borrow().iter().filter(|c| c.args_start_with(prefix)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        self.calls.borrow_mut().push(spec.clone());
        let mut scripts = self.scripts.borrow_mut();
        let Some(script) = scripts.iter_mut().find(|s| s.matches(spec)) else {
            return Ok(ProcessOutput::default());
        };
        if script.spawn_error {
            return Err(anyhow!("failed to spawn {}", spec.display()));
        }
        Ok(script.next_output())
    }
}

/// Prompter with queued answers.
///
/// An empty confirm queue answers with the question's default; an empty
/// choice queue behaves like EOF.
#[derive(Default)]
pub struct ScriptedPrompter {
    confirms: RefCell<VecDeque<bool>>,
    choices: RefCell<VecDeque<Option<usize>>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirms(self, answers: Vec<bool>) -> Self {
        self.confirms.borrow_mut().extend(answers);
        self
    }

    pub fn with_choices(self, answers: Vec<Option<usize>>) -> Self {
        self.choices.borrow_mut().extend(answers);
        self
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        self.asked.borrow_mut().push(question.to_string());
        Ok(self.confirms.borrow_mut().pop_front().unwrap_or(default))
    }

    fn choose(&self, question: &str, _options: &[&str]) -> Result<Option<usize>> {
        self.asked.borrow_mut().push(question.to_string());
        Ok(self.choices.borrow_mut().pop_front().flatten())
    }
}

/// Workflow steps that return scripted verdicts in step order.
///
/// Steps past the end of the script return `OK`.
#[derive(Default)]
pub struct ScriptedSteps {
    verdicts: VecDeque<StepVerdict>,
    classified_code: Option<String>,
    error_at: Option<WorkflowStep>,
    executed: Vec<WorkflowStep>,
}

impl ScriptedSteps {
    pub fn new(verdicts: Vec<StepVerdict>) -> Self {
        Self {
            verdicts: verdicts.into(),
            ..Self::default()
        }
    }

    pub fn with_classified_code(mut self, code: &str) -> Self {
        self.classified_code = Some(code.to_string());
        self
    }

    /// Make `step` return an error instead of a verdict.
    pub fn erroring_at(mut self, step: WorkflowStep) -> Self {
        self.error_at = Some(step);
        self
    }

    pub fn executed(&self) -> &[WorkflowStep] {
        &self.executed
    }
}

impl WorkflowSteps for ScriptedSteps {
    fn run_step(&mut self, step: WorkflowStep, _ctx: &mut RunContext) -> Result<StepOutcome> {
        self.executed.push(step);
        if self.error_at == Some(step) {
            return Err(anyhow!("scripted error in {}", step.key()));
        }
        let verdict = self.verdicts.pop_front().unwrap_or(StepVerdict::Ok);
        Ok(StepOutcome::new(verdict, format!("{} {}", step.key(), verdict)))
    }

    fn last_classified_code(&self) -> Option<String> {
        self.classified_code.clone()
    }
}

/// A work clone on branch `main` tracking a bare `origin`.
pub struct TestRepo {
    temp: TempDir,
    pub remote: PathBuf,
    pub work: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = temp.path().join("remote.git");
        let work = temp.path().join("work");
        fs::create_dir_all(&remote).expect("create remote dir");
        fs::create_dir_all(&work).expect("create work dir");

        git(&remote, &["init", "--bare"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        git(&work, &["init"]);
        git(&work, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        configure_identity(&work);
        fs::write(work.join("README.md"), "hello\n").expect("write readme");
        git(&work, &["add", "README.md"]);
        git(&work, &["commit", "-m", "initial commit"]);
        let remote_url = remote.display().to_string();
        git(&work, &["remote", "add", "origin", &remote_url]);
        git(&work, &["push", "-u", "origin", "main"]);

        Self { temp, remote, work }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Run git in the work clone and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        git(&self.work, args)
    }

    pub fn commit_file(&self, name: &str, contents: &str, message: &str) {
        fs::write(self.work.join(name), contents).expect("write file");
        self.git(&["add", name]);
        self.git(&["commit", "-m", message]);
    }

    /// Push a commit to `origin/main` from a second clone, leaving the work clone behind.
    pub fn push_conflicting_commit(&self) {
        let other = self.temp.path().join("other");
        let remote_url = self.remote.display().to_string();
        let other_path = other.display().to_string();
        git(self.temp.path(), &["clone", &remote_url, &other_path]);
        configure_identity(&other);
        fs::write(other.join("CONFLICT.md"), "from elsewhere\n").expect("write file");
        git(&other, &["add", "CONFLICT.md"]);
        git(&other, &["commit", "-m", "remote change"]);
        git(&other, &["push", "origin", "main"]);
    }

    /// Run git in the bare remote and return trimmed stdout.
    pub fn remote_git(&self, args: &[&str]) -> String {
        git(&self.remote, args)
    }

    pub fn remote_head(&self) -> String {
        git(&self.remote, &["rev-parse", "refs/heads/main"])
    }

    pub fn local_head(&self) -> String {
        self.git(&["rev-parse", "HEAD"])
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "test"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["config", "tag.gpgsign", "false"]);
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
