use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{instrument, warn};

use super::Remediator;
use crate::core::remediation_policy::RemediationAction;
use crate::core::types::StepVerdict;

static SAFE_DIRECTORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"safe\.directory\s+'?([^'\s]+)'?").unwrap());

/// Directories to mark safe: the one git suggests, then the canonical and literal cwd.
pub fn safe_directory_targets(stderr: &str, cwd: &Path) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    let suggested = SAFE_DIRECTORY_RE
        .captures_iter(stderr)
        .map(|caps| caps[1].to_string());
    let canonical = cwd.canonicalize().ok().map(PathBuf::into_os_string);
    let candidates = suggested
        .chain(canonical.map(|p| p.to_string_lossy().to_string()))
        .chain(std::iter::once(cwd.to_string_lossy().to_string()));
    for candidate in candidates {
        if !candidate.is_empty() && !targets.contains(&candidate) {
            targets.push(candidate);
        }
    }
    targets
}

impl Remediator<'_> {
    /// Mark the repository as a safe directory in the global git config.
    #[instrument(skip_all)]
    pub fn dubious_ownership(&self, stderr: &str, cwd: &Path) -> Result<StepVerdict> {
        let action = RemediationAction::GitSafeDirectory;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        if !self.confirm(action, &format!("Mark {} as a safe git directory?", cwd.display()))? {
            self.hint("run: git config --global --add safe.directory <repo>");
            return Ok(StepVerdict::Abort);
        }
        for target in safe_directory_targets(stderr, cwd) {
            let out = self.git(&["config", "--global", "--add", "safe.directory", &target], cwd)?;
            if !out.success() {
                warn!(target = %target, code = out.code, "failed to add safe.directory");
                return Ok(self.finish(action, false, StepVerdict::Retry));
            }
        }
        Ok(self.finish(action, true, StepVerdict::Retry))
    }
}
