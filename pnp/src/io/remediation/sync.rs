use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::Remediator;
use crate::core::remediation_policy::RemediationAction;
use crate::core::types::StepVerdict;
use crate::io::backup::{self, RestoreGuard};

pub const RESTORE_COMMIT_MESSAGE: &str = "restored local changes after remote conflict";

impl Remediator<'_> {
    /// Local history diverged from the remote.
    ///
    /// Snapshots the working tree, hard-resets onto `origin/<branch>`, copies
    /// the snapshot back and commits it. Any failure after the snapshot
    /// restores the working tree.
    #[instrument(skip_all)]
    pub fn diverged_branch(&self, cwd: &Path) -> Result<StepVerdict> {
        let action = RemediationAction::SyncWithRemote;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        let branch = self.git(&["branch", "--show-current"], cwd)?.stdout.trim().to_string();
        if branch.is_empty() {
            self.hint("cannot sync a detached HEAD with the remote");
            return Ok(self.finish(action, false, StepVerdict::Retry));
        }
        if !self.confirm(
            action,
            &format!("Reset '{branch}' to origin/{branch} and re-apply local changes on top?"),
        )? {
            self.hint(format!("run: git pull --rebase origin {branch}"));
            return Ok(StepVerdict::Abort);
        }

        let snapshot = backup::snapshot(cwd)?;
        let mut guard = RestoreGuard::new(snapshot, cwd.to_path_buf());
        info!(backup = %guard.backup().display(), "working tree backed up before sync");

        let target = format!("origin/{branch}");
        let steps: [&[&str]; 2] = [&["fetch", "origin"], &["reset", "--hard", &target]];
        for args in steps {
            let out = self.git(args, cwd)?;
            if !out.success() {
                warn!(command = %args.join(" "), code = out.code, "sync with remote failed");
                self.hint(format!("local changes were restored from {}", guard.backup().display()));
                return Ok(self.finish(action, false, StepVerdict::Retry));
            }
        }

        backup::restore(guard.backup(), cwd)?;
        guard.disarm();

        let added = self.git(&["add", "."], cwd)?;
        if !added.success() {
            return Ok(self.finish(action, false, StepVerdict::Retry));
        }
        let status = self.git(&["status", "--porcelain"], cwd)?;
        if status.success() && !status.stdout.trim().is_empty() {
            let committed = self.git(&["commit", "-m", RESTORE_COMMIT_MESSAGE], cwd)?;
            if !committed.success() {
                return Ok(self.finish(action, false, StepVerdict::Retry));
            }
        }
        Ok(self.finish(action, true, StepVerdict::Retry))
    }
}
