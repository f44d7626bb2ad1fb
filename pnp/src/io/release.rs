//! Platform release publishing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument};

use crate::io::process::{CommandRunner, CommandSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// `owner/name`.
    pub repo: String,
    pub tag: String,
    pub notes: String,
    pub token: String,
    pub draft: bool,
    pub prerelease: bool,
    pub assets: Vec<String>,
}

/// Creates a release for a pushed tag. Returns a human-readable summary.
pub trait ReleasePublisher {
    fn publish(&self, request: &ReleaseRequest) -> Result<String>;
}

/// Publishes through `gh release create`.
pub struct GhCliPublisher<'a> {
    runner: &'a dyn CommandRunner,
    cwd: PathBuf,
    timeout: Duration,
}

impl<'a> GhCliPublisher<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cwd: PathBuf, timeout: Duration) -> Self {
        Self { runner, cwd, timeout }
    }

    fn args(request: &ReleaseRequest) -> Vec<String> {
        let mut args = vec![
            "release".to_string(),
            "create".to_string(),
            request.tag.clone(),
            "--repo".to_string(),
            request.repo.clone(),
            "--title".to_string(),
            request.tag.clone(),
            "--notes".to_string(),
            request.notes.clone(),
        ];
        if request.draft {
            args.push("--draft".to_string());
        }
        if request.prerelease {
            args.push("--prerelease".to_string());
        }
        args.extend(request.assets.iter().cloned());
        args
    }
}

impl ReleasePublisher for GhCliPublisher<'_> {
    #[instrument(skip_all, fields(repo = %request.repo, tag = %request.tag))]
    fn publish(&self, request: &ReleaseRequest) -> Result<String> {
        let spec = CommandSpec::new("gh", &Self::args(request), &self.cwd, self.timeout)
            .with_env("GH_TOKEN", &request.token);
        let out = self.runner.run(&spec)?;
        if !out.success() {
            return Err(anyhow!("gh release create failed (exit {}): {}", out.code, out.combined()));
        }
        info!("release published");
        let url = out.stdout.trim();
        Ok(if url.is_empty() {
            format!("release {} created", request.tag)
        } else {
            format!("release {} created: {url}", request.tag)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_gh_arguments() {
        let request = ReleaseRequest {
            repo: "acme/widgets".to_string(),
            tag: "v1.2.0".to_string(),
            notes: "abc fix (me)".to_string(),
            token: "t".to_string(),
            draft: true,
            prerelease: false,
            assets: vec!["dist/app.tar.gz".to_string()],
        };
        assert_eq!(
            GhCliPublisher::args(&request),
            vec![
                "release",
                "create",
                "v1.2.0",
                "--repo",
                "acme/widgets",
                "--title",
                "v1.2.0",
                "--notes",
                "abc fix (me)",
                "--draft",
                "dist/app.tar.gz",
            ]
        );
    }
}
