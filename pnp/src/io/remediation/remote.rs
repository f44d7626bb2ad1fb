use std::path::Path;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use super::Remediator;
use crate::core::error_model::codes;
use crate::core::remediation_policy::RemediationAction;
use crate::core::types::StepVerdict;

const TOKEN_PAGE: &str = "https://github.com/settings/tokens";

impl Remediator<'_> {
    /// Push the current branch with `--set-upstream` to the first remote.
    #[instrument(skip_all)]
    pub fn upstream_missing(&self, cwd: &Path) -> Result<StepVerdict> {
        let action = RemediationAction::SetUpstreamTracking;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        let branch = self.git(&["branch", "--show-current"], cwd)?.stdout.trim().to_string();
        if branch.is_empty() {
            self.hint("cannot set upstream on a detached HEAD; check out a branch first");
            return Ok(self.finish(action, false, StepVerdict::Retry));
        }
        let remotes = self.git(&["remote"], cwd)?;
        let remote = remotes
            .stdout
            .lines()
            .map(str::trim)
            .find(|r| !r.is_empty())
            .unwrap_or("origin")
            .to_string();
        debug!(branch = %branch, remote = %remote, "setting upstream");
        let out = self.git(&["push", "--set-upstream", &remote, &branch], cwd)?;
        if !out.success() {
            self.hint(format!("run: git push --set-upstream {remote} {branch}"));
        }
        Ok(self.finish(action, out.success(), StepVerdict::Retry))
    }

    /// Credentials were rejected. Only ever guides the operator.
    #[instrument(skip_all)]
    pub fn auth_failure(&self, cwd: &Path) -> Result<StepVerdict> {
        if self.flags.ci_mode && !self.flags.autofix {
            self.hint("authentication failed; provide credentials (GITHUB_TOKEN or an SSH key) to the CI job");
            return Ok(StepVerdict::Fail);
        }
        if self.flags.autofix {
            self.hint(format!("authentication failed; create a token at {TOKEN_PAGE}"));
            return Ok(StepVerdict::Fail);
        }
        let menu = [
            RemediationAction::OpenTokenPage,
            RemediationAction::OpenShellManual,
            RemediationAction::Abort,
        ];
        match self.choose("Authentication failed. How do you want to proceed?", &menu)? {
            Some(RemediationAction::OpenTokenPage) => self.token_page(),
            Some(RemediationAction::OpenShellManual) => Ok(self.manual_shell(cwd)),
            _ => Ok(StepVerdict::Abort),
        }
    }

    /// No usable remote configured.
    #[instrument(skip_all)]
    pub fn missing_remote(&self, cwd: &Path) -> Result<StepVerdict> {
        if self.flags.ci_mode && !self.flags.autofix {
            self.hint("no readable remote; add one with: git remote add origin <url>");
            return Ok(StepVerdict::Fail);
        }
        let choice = if self.flags.autofix {
            if self.permits(RemediationAction::AddOriginSsh) {
                Some(RemediationAction::AddOriginSsh)
            } else {
                Some(RemediationAction::SkipContinue)
            }
        } else {
            let menu = [
                RemediationAction::AddOriginHttps,
                RemediationAction::AddOriginSsh,
                RemediationAction::AddOriginToken,
                RemediationAction::OpenTokenPage,
                RemediationAction::OpenShellManual,
                RemediationAction::SkipContinue,
                RemediationAction::Abort,
            ];
            self.choose("Remote is not readable. How do you want to proceed?", &menu)?
        };
        match choice {
            Some(action @ (RemediationAction::AddOriginHttps
            | RemediationAction::AddOriginSsh
            | RemediationAction::AddOriginToken)) => self.add_origin(action, cwd),
            Some(RemediationAction::OpenTokenPage) => self.token_page(),
            Some(RemediationAction::OpenShellManual) => Ok(self.manual_shell(cwd)),
            Some(RemediationAction::SkipContinue) => Ok(self.skip()),
            _ => Ok(StepVerdict::Abort),
        }
    }

    fn add_origin(&self, action: RemediationAction, cwd: &Path) -> Result<StepVerdict> {
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        let Some(repo) = self.flags.gh_repo.clone() else {
            self.hint("set github.repo (owner/name) so the remote URL can be built");
            return Ok(self.finish(action, false, StepVerdict::Retry));
        };
        let url = match action {
            RemediationAction::AddOriginSsh => format!("git@github.com:{repo}.git"),
            RemediationAction::AddOriginToken => {
                let Some(token) = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()) else {
                    self.hint("GITHUB_TOKEN is not set");
                    return Ok(self.finish(action, false, StepVerdict::Retry));
                };
                format!("https://{token}@github.com/{repo}.git")
            }
            _ => format!("https://github.com/{repo}.git"),
        };
        if !self.confirm(action, "Add remote 'origin'?")? {
            return Ok(StepVerdict::Abort);
        }
        let out = self.git(&["remote", "add", "origin", &url], cwd)?;
        Ok(self.finish(action, out.success(), StepVerdict::Retry))
    }

    fn token_page(&self) -> Result<StepVerdict> {
        let action = RemediationAction::OpenTokenPage;
        if let Some(verdict) = self.prepare(action) {
            return Ok(verdict);
        }
        self.hint(format!("create a personal access token at {TOKEN_PAGE} and export it as GITHUB_TOKEN"));
        Ok(self.finish(action, true, StepVerdict::Fail))
    }

    pub(super) fn manual_shell(&self, cwd: &Path) -> StepVerdict {
        let action = RemediationAction::OpenShellManual;
        if let Some(verdict) = self.prepare(action) {
            return verdict;
        }
        self.hint(format!("resolve the problem manually in {} and rerun", cwd.display()));
        self.finish(action, true, StepVerdict::Abort)
    }

    pub(super) fn skip(&self) -> StepVerdict {
        let action = RemediationAction::SkipContinue;
        if let Some(verdict) = self.prepare(action) {
            return verdict;
        }
        self.finish(action, true, StepVerdict::Ok)
    }

    /// Ref or tag already exists, or a ref could not be locked.
    #[instrument(skip_all)]
    pub fn ref_conflict(&self, cwd: &Path) -> Result<StepVerdict> {
        if self.flags.ci_mode && !self.flags.autofix {
            self.hint("ref conflict; delete or rename the conflicting ref or tag");
            return Ok(StepVerdict::Fail);
        }
        if self.flags.autofix {
            return Ok(self.skip());
        }
        let menu = [
            RemediationAction::OpenShellManual,
            RemediationAction::SkipContinue,
            RemediationAction::Abort,
        ];
        match self.choose("A ref conflict was detected. How do you want to proceed?", &menu)? {
            Some(RemediationAction::OpenShellManual) => Ok(self.manual_shell(cwd)),
            Some(RemediationAction::SkipContinue) => Ok(self.skip()),
            _ => Ok(StepVerdict::Abort),
        }
    }

    /// Connectivity, timeout, TLS and URL problems cannot be fixed locally.
    pub fn network(&self, code: &str) -> StepVerdict {
        let hint = match code {
            codes::NET_TLS_FAIL => "TLS verification failed; check the system clock, proxy and CA certificates",
            codes::NET_TIMEOUT => "the remote timed out; retry later or check the network",
            codes::NET_REMOTE_URL_INVALID => "the remote URL is invalid; check it with: git remote -v",
            _ => "no network connection to the remote; check connectivity and DNS",
        };
        warn!(code, "network failure");
        self.hint(hint);
        StepVerdict::Fail
    }
}
