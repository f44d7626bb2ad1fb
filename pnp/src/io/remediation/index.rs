use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::Remediator;
use crate::core::remediation_policy::RemediationAction;
use crate::core::types::StepVerdict;
use crate::io::repo::find_git_dir;

const GITATTRIBUTES_RULE: &str = "* text=auto";
const INDEX_MISMATCH_SIGNATURES: &[&str] = &["short read while indexing", "unable to index", "unable to stat"];

fn has_index_mismatch(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    INDEX_MISMATCH_SIGNATURES.iter().any(|s| lower.contains(s))
}

/// Ensure `.gitattributes` exists with a normalization rule. Returns true if written.
fn ensure_gitattributes(root: &Path) -> Result<bool> {
    let path = root.join(".gitattributes");
    if path.exists() {
        return Ok(false);
    }
    fs::write(&path, format!("{GITATTRIBUTES_RULE}\n")).with_context(|| format!("write {}", path.display()))?;
    Ok(true)
}

impl Remediator<'_> {
    /// Renormalize line endings, falling back to a full re-add and an index rebuild.
    #[instrument(skip_all)]
    pub fn line_endings(&self, cwd: &Path) -> Result<StepVerdict> {
        let action = RemediationAction::RenormalizeLineEndings;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        if ensure_gitattributes(cwd)? {
            info!("created .gitattributes with text=auto");
        }
        let out = self.git(&["add", "--renormalize", "."], cwd)?;
        if out.success() {
            return Ok(self.finish(action, true, StepVerdict::Retry));
        }
        if !out.stderr.to_lowercase().contains("unknown option") && !has_index_mismatch(&out.stderr) {
            return Ok(self.finish(action, false, StepVerdict::Retry));
        }
        debug!("renormalize unavailable, re-adding all files");
        let out = self.git(&["add", "-A"], cwd)?;
        if out.success() {
            return Ok(self.finish(action, true, StepVerdict::Retry));
        }
        if has_index_mismatch(&out.stderr) {
            return self.rebuild_index_and_add(cwd);
        }
        Ok(self.finish(action, false, StepVerdict::Retry))
    }

    /// The index disagrees with the worktree: rebuild the index only, then re-add.
    #[instrument(skip_all)]
    pub fn index_worktree_mismatch(&self, cwd: &Path) -> Result<StepVerdict> {
        self.rebuild_index_and_add(cwd)
    }

    fn rebuild_index_and_add(&self, cwd: &Path) -> Result<StepVerdict> {
        let action = RemediationAction::RebuildIndex;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        // Index only; the worktree is never touched.
        let rebuilt = self.git(&["read-tree", "HEAD"], cwd)?;
        if !rebuilt.success() {
            warn!(code = rebuilt.code, "read-tree failed");
            return Ok(self.finish(action, false, StepVerdict::Retry));
        }
        let added = self.git(&["add", "-A"], cwd)?;
        Ok(self.finish(action, added.success(), StepVerdict::Retry))
    }

    /// Corrupt objects or index. Diagnostics first; anything destructive is gated.
    #[instrument(skip_all)]
    pub fn invalid_object(&self, stderr: &str, cwd: &Path) -> Result<StepVerdict> {
        let fsck = self.git(&["fsck", "--full"], cwd)?;
        info!(code = fsck.code, "git fsck --full finished");
        if !fsck.success() {
            self.hint(format!("git fsck reported problems: {}", fsck.combined()));
        }
        if self.flags.ci_mode && !self.flags.autofix {
            self.hint("repository objects look corrupt; rerun with --auto-fix --destructive-reset to rebuild the index");
            return Ok(StepVerdict::Fail);
        }
        let choice = if self.flags.autofix {
            [RemediationAction::DestructiveReset, RemediationAction::SafeFixNetwork]
                .into_iter()
                .find(|a| self.permits(*a))
                .unwrap_or(RemediationAction::SkipContinue)
        } else {
            let menu = [
                RemediationAction::OpenShellManual,
                RemediationAction::DestructiveReset,
                RemediationAction::SafeFixNetwork,
                RemediationAction::SkipContinue,
                RemediationAction::Abort,
            ];
            match self.choose("Repository objects look corrupt. How do you want to proceed?", &menu)? {
                Some(action) => action,
                None => RemediationAction::Abort,
            }
        };
        match choice {
            RemediationAction::OpenShellManual => Ok(self.manual_shell(cwd)),
            RemediationAction::DestructiveReset => self.destructive_index_reset(stderr, cwd),
            RemediationAction::SafeFixNetwork => Ok(self.safe_network_fix()),
            RemediationAction::SkipContinue => Ok(self.skip()),
            _ => Ok(StepVerdict::Abort),
        }
    }

    fn destructive_index_reset(&self, stderr: &str, cwd: &Path) -> Result<StepVerdict> {
        let action = RemediationAction::DestructiveReset;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        if !self.confirm(action, "Remove the index and re-stage all files?")? {
            return Ok(StepVerdict::Abort);
        }
        if stderr.to_lowercase().contains("null sha1")
            && let Some(git_dir) = find_git_dir(cwd)?
        {
            let index = git_dir.join("index");
            if index.exists() {
                fs::remove_file(&index).with_context(|| format!("remove {}", index.display()))?;
                info!("removed corrupt index");
            }
        }
        let reset = self.git(&["reset"], cwd)?;
        if !reset.success() {
            return Ok(self.finish(action, false, StepVerdict::Retry));
        }
        let added = self.git(&["add", "."], cwd)?;
        Ok(self.finish(action, added.success(), StepVerdict::Retry))
    }

    /// Network re-clone is a known gap; it must never look like success.
    fn safe_network_fix(&self) -> StepVerdict {
        let action = RemediationAction::SafeFixNetwork;
        if let Some(verdict) = self.prepare(action) {
            return verdict;
        }
        self.hint("safe network re-clone is not implemented; re-clone the repository manually");
        self.finish(action, false, StepVerdict::Fail)
    }
}
