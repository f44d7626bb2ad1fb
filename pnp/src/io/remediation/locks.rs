use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, instrument, warn};

use super::Remediator;
use crate::core::remediation_policy::RemediationAction;
use crate::core::types::StepVerdict;
use crate::io::repo::find_git_dir;

static LOCK_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[./A-Za-z0-9_-]+\.lock").unwrap());

const WELL_KNOWN_LOCKS: &[&str] = &["index.lock", "shallow.lock", "packed-refs.lock", "HEAD.lock", "config.lock"];

/// Candidate lock files, stderr-derived first, then well-known names in `git_dir`.
///
/// Paths are not validated here; see [`is_contained`].
pub fn lock_candidates(stderr: &str, repo_root: &Path, git_dir: &Path) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for m in LOCK_PATH_RE.find_iter(stderr) {
        let raw = m.as_str();
        let path = if Path::new(raw).is_absolute() {
            PathBuf::from(raw)
        } else if raw.starts_with(".git/") {
            repo_root.join(raw)
        } else {
            git_dir.join(raw)
        };
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }
    for name in WELL_KNOWN_LOCKS {
        let path = git_dir.join(name);
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }
    candidates
}

/// True when `path` resolves inside `git_dir`.
fn is_contained(path: &Path, git_dir: &Path) -> bool {
    let Ok(git_dir) = git_dir.canonicalize() else {
        return false;
    };
    path.canonicalize().is_ok_and(|p| p.starts_with(&git_dir) && p != git_dir)
}

impl Remediator<'_> {
    /// Remove the first existing stale lock file inside the git metadata directory.
    #[instrument(skip_all)]
    pub fn lock_contention(&self, stderr: &str, cwd: &Path) -> Result<StepVerdict> {
        let action = RemediationAction::StaleLockCleanup;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        let Some(git_dir) = find_git_dir(cwd)? else {
            self.hint("lock contention outside a git repository");
            return Ok(self.finish(action, false, StepVerdict::Retry));
        };
        let repo_root = git_dir.parent().unwrap_or(cwd).to_path_buf();
        let candidates = lock_candidates(stderr, &repo_root, &git_dir);
        let Some(lock) = candidates.iter().find(|p| p.is_file() && is_contained(p, &git_dir)) else {
            warn!(candidates = candidates.len(), "no removable lock file found");
            self.hint("make sure no other git process is running, then remove the stale .lock file");
            return Ok(self.finish(action, false, StepVerdict::Retry));
        };
        fs::remove_file(lock).with_context(|| format!("remove {}", lock.display()))?;
        info!(lock = %lock.display(), "removed stale lock file");
        Ok(self.finish(action, true, StepVerdict::Retry))
    }
}
