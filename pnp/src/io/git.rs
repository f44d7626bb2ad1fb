//! Typed git helpers for the workflow steps.
//!
//! Every call goes through the [`ResilientExecutor`], so failures are
//! classified and remediated before a helper sees the result. Read-only
//! queries run even in dry-run mode; mutations are skipped there.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::executor::{ExecResult, ResilientExecutor};

/// Commits only on one side of `upstream...branch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divergence {
    /// Commits the remote has that the local branch lacks.
    pub remote_ahead: u32,
    /// Commits the local branch has that the remote lacks.
    pub local_ahead: u32,
}

/// Git operations bound to one working directory.
pub struct Git<'e, 'a> {
    exec: &'e ResilientExecutor<'a>,
    workdir: PathBuf,
}

impl<'e, 'a> Git<'e, 'a> {
    pub fn new(exec: &'e ResilientExecutor<'a>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            exec,
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn run(&self, args: &[&str]) -> Result<ExecResult> {
        self.exec.run(args, &self.workdir)
    }

    fn query(&self, args: &[&str]) -> Result<ExecResult> {
        self.exec.run_read_only(args, &self.workdir)
    }

    /// Read-only query that must succeed.
    fn capture(&self, args: &[&str]) -> Result<String> {
        let out = self.query(args)?;
        if !out.success() {
            return Err(anyhow!("git {} failed (exit {}): {}", args.join(" "), out.code, out.output));
        }
        Ok(out.output)
    }

    /// Current branch, or `None` on a detached HEAD.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<Option<String>> {
        let name = self.capture(&["branch", "--show-current"])?;
        let name = name.trim();
        debug!(branch = %name, "current branch");
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    pub fn has_changes(&self) -> Result<bool> {
        Ok(!self.capture(&["status", "--porcelain"])?.trim().is_empty())
    }

    pub fn remotes(&self) -> Result<Vec<String>> {
        Ok(self
            .capture(&["remote"])?
            .lines()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Tracking ref of `branch` (`origin/main`), if configured.
    pub fn upstream_of(&self, branch: &str) -> Result<Option<String>> {
        let spec = format!("{branch}@{{u}}");
        let out = self.query(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", &spec])?;
        Ok(out
            .success()
            .then(|| out.output.trim().to_string())
            .filter(|u| !u.is_empty()))
    }

    /// Compare `branch` with `upstream` via `rev-list --left-right --count`.
    pub fn divergence(&self, upstream: &str, branch: &str) -> Result<Divergence> {
        let range = format!("{upstream}...{branch}");
        let out = self.capture(&["rev-list", "--left-right", "--count", &range])?;
        parse_divergence(&out).ok_or_else(|| anyhow!("unexpected rev-list output: {out}"))
    }

    pub fn fetch_all(&self) -> Result<ExecResult> {
        self.query(&["fetch", "--all", "--tags"])
    }

    pub fn stage_all(&self) -> Result<ExecResult> {
        self.run(&["add", "-A"])
    }

    pub fn unstage(&self) -> Result<ExecResult> {
        self.run(&["reset"])
    }

    pub fn staged_name_status(&self) -> Result<String> {
        self.capture(&["diff", "--cached", "--name-status"])
    }

    pub fn commit(&self, message: &str) -> Result<ExecResult> {
        self.run(&["commit", "-m", message])
    }

    pub fn push_branch(&self, remote: &str, branch: &str, force: bool, set_upstream: bool) -> Result<ExecResult> {
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        if set_upstream {
            args.push("--set-upstream");
        }
        args.extend([remote, branch]);
        self.run(&args)
    }

    /// Tags matching `<prefix>*`, highest version first.
    pub fn tags_sorted(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}*");
        Ok(self
            .capture(&["tag", "--list", &pattern, "--sort=-v:refname"])?
            .lines()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn tag_exists(&self, tag: &str) -> Result<bool> {
        let reference = format!("refs/tags/{tag}");
        Ok(self.query(&["rev-parse", "--verify", "--quiet", &reference])?.success())
    }

    pub fn create_tag(&self, tag: &str, message: &str, sign: bool) -> Result<ExecResult> {
        let mut args = vec!["tag"];
        if sign {
            args.push("-s");
        }
        args.extend(["-a", tag, "-m", message]);
        self.run(&args)
    }

    pub fn push_tags(&self, remote: &str, force: bool) -> Result<ExecResult> {
        let mut args = vec!["push", remote, "--tags"];
        if force {
            args.push("--force");
        }
        self.run(&args)
    }

    pub fn delete_tag(&self, tag: &str) -> Result<ExecResult> {
        self.run(&["tag", "-d", tag])
    }

    /// One line per commit since `since` (or the last 50 commits).
    pub fn log_since(&self, since: Option<&str>) -> Result<String> {
        let range = since.map(|s| format!("{s}..HEAD"));
        let mut args = vec!["log", "--pretty=format:%h %s (%an)"];
        match &range {
            Some(range) => args.push(range),
            None => args.extend(["-n", "50"]),
        }
        self.capture(&args)
    }

    pub fn init(&self) -> Result<ExecResult> {
        self.run(&["init"])
    }

    pub fn machete(&self, args: &[&str]) -> Result<ExecResult> {
        let mut full = vec!["machete"];
        full.extend_from_slice(args);
        self.run(&full)
    }
}

fn parse_divergence(output: &str) -> Option<Divergence> {
    let mut parts = output.split_whitespace();
    let remote_ahead = parts.next()?.parse().ok()?;
    let local_ahead = parts.next()?.parse().ok()?;
    Some(Divergence {
        remote_ahead,
        local_ahead,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_left_right_counts() {
        assert_eq!(
            parse_divergence("2\t1\n"),
            Some(Divergence {
                remote_ahead: 2,
                local_ahead: 1,
            })
        );
        assert_eq!(parse_divergence("garbage"), None);
    }
}
