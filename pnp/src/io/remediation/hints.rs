//! Failures that need a human: diagnose, explain, fail.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::Remediator;
use crate::core::remediation_policy::RemediationAction;
use crate::core::types::StepVerdict;

const AUTO_STASH_MESSAGE: &str = "pnp auto-stash";

impl Remediator<'_> {
    pub fn protected_branch(&self) -> StepVerdict {
        self.hint("the branch is protected; push to a feature branch and open a pull request");
        StepVerdict::Fail
    }

    pub fn large_file(&self, stderr: &str) -> StepVerdict {
        let offending: Vec<&str> = stderr
            .lines()
            .filter(|l| l.to_lowercase().contains("file size limit"))
            .map(str::trim)
            .collect();
        if !offending.is_empty() {
            self.hint(offending.join("; "));
        }
        self.hint("remove the large files from history (git filter-repo) or track them with git lfs");
        StepVerdict::Fail
    }

    #[instrument(skip_all)]
    pub fn submodule_inconsistent(&self, cwd: &Path) -> Result<StepVerdict> {
        let status = self.git(&["submodule", "status", "--recursive"], cwd)?;
        info!(code = status.code, "submodule status collected");
        if !status.combined().is_empty() {
            self.hint(format!("submodule status: {}", status.combined()));
        }
        self.hint("run: git submodule sync --recursive && git submodule update --init --recursive");
        Ok(StepVerdict::Fail)
    }

    pub fn hook_declined(&self) -> StepVerdict {
        self.hint("a git hook declined the operation; fix what the hook reports and rerun");
        StepVerdict::Fail
    }

    pub fn detached_head(&self) -> StepVerdict {
        self.hint("HEAD is detached; run: git switch <branch>");
        StepVerdict::Fail
    }

    /// Stash local changes so the command can be retried. The executor pops
    /// the stash when the attempt chain ends.
    #[instrument(skip_all)]
    pub fn dirty_worktree(&self, cwd: &Path) -> Result<StepVerdict> {
        if !self.flags.autofix && !self.flags.interactive {
            self.hint("commit or stash your local changes, then rerun");
            return Ok(StepVerdict::Fail);
        }
        let action = RemediationAction::AutoStash;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        if !self.confirm(action, "Stash local changes and retry?")? {
            self.hint("commit or stash your local changes, then rerun");
            return Ok(StepVerdict::Abort);
        }
        let out = self.git(&["stash", "push", "--include-untracked", "-m", AUTO_STASH_MESSAGE], cwd)?;
        if !out.success() {
            self.hint("automatic stash failed; commit or stash your local changes");
            return Ok(self.finish(action, false, StepVerdict::Retry));
        }
        info!("local changes stashed");
        self.stash_pending.set(true);
        Ok(self.finish(action, true, StepVerdict::Retry))
    }

    /// Pop a stash left by [`Self::dirty_worktree`], if any. A failed pop
    /// leaves the changes stashed and is only reported.
    pub fn restore_pending_stash(&self, cwd: &Path) {
        if !self.stash_pending.replace(false) {
            return;
        }
        let action = RemediationAction::AutoStash;
        match self.git(&["stash", "pop"], cwd) {
            Ok(out) if out.success() => {
                info!("auto-stash restored");
                self.emit(action, "restored", "");
            }
            Ok(out) => {
                warn!(code = out.code, stderr = %out.stderr.trim(), "stash pop failed; changes remain stashed");
                self.emit(action, "restore_failed", out.stderr.trim());
                self.hint("local changes remain stashed; run: git stash pop");
            }
            Err(e) => {
                warn!(err = %format!("{e:#}"), "stash pop failed; changes remain stashed");
                self.emit(action, "restore_failed", "stash pop could not run");
                self.hint("local changes remain stashed; run: git stash pop");
            }
        }
    }
}
