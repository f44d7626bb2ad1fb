//! Run configuration stored in `<repo>/.pnp.toml`, plus the resolved runtime flags.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::remediation_policy::OptIns;
use crate::core::semver::Bump;

pub const CONFIG_FILE: &str = ".pnp.toml";

/// Workflow configuration (TOML).
///
/// Every field is optional in the file; CLI flags override file values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Remote to push to. When unset the branch upstream (or the first remote) is used.
    pub remote: Option<String>,
    pub push: bool,
    pub publish: bool,
    pub release: bool,
    pub force: bool,

    pub ci: bool,
    pub interactive: bool,
    pub auto_fix: bool,
    /// Non-interactive commit of all changes; implies `auto_fix`.
    pub batch_commit: bool,
    pub dry_run: bool,
    /// Opt-in for network re-clone style remediations in auto-fix mode.
    pub safe_reset: bool,
    /// Opt-in for history-rewriting remediations in auto-fix mode.
    pub destructive_reset: bool,

    /// `;`-separated hook commands, optionally `label::command`.
    pub hooks: Option<String>,
    pub hook_timeout_secs: u64,

    /// Per-command wall-clock limit for git invocations.
    pub command_timeout_secs: u64,
    /// Budget for one git command across all its retries.
    pub retry_budget_secs: u64,
    pub output_limit_bytes: usize,

    pub tag: TagConfig,
    pub machete: MacheteConfig,
    pub github: GithubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TagConfig {
    pub prefix: String,
    pub bump: Bump,
    /// Used for the annotated tag and as the commit message when set.
    pub message: Option<String>,
    pub sign: bool,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            prefix: "v".to_string(),
            bump: Bump::Patch,
            message: None,
            sign: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MacheteConfig {
    pub enabled: bool,
    /// Run `traverse --fetch --sync` instead of a plain traverse.
    pub sync: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    /// `owner/name`.
    pub repo: Option<String>,
    /// Falls back to `GITHUB_TOKEN`.
    pub token: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
    pub assets: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            remote: None,
            push: false,
            publish: false,
            release: false,
            force: false,
            ci: false,
            interactive: true,
            auto_fix: false,
            batch_commit: false,
            dry_run: false,
            safe_reset: false,
            destructive_reset: false,
            hooks: None,
            hook_timeout_secs: 300,
            command_timeout_secs: 120,
            retry_budget_secs: 45,
            output_limit_bytes: 1_000_000,
            tag: TagConfig::default(),
            machete: MacheteConfig::default(),
            github: GithubConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hook_timeout_secs == 0 {
            return Err(anyhow!("hook_timeout_secs must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.retry_budget_secs == 0 {
            return Err(anyhow!("retry_budget_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.tag.prefix.chars().any(char::is_whitespace) {
            return Err(anyhow!("tag.prefix must not contain whitespace"));
        }
        if let Some(remote) = &self.remote
            && remote.trim().is_empty()
        {
            return Err(anyhow!("remote must not be empty"));
        }
        if let Some(repo) = &self.github.repo {
            let mut parts = repo.split('/');
            let valid = matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
            );
            if !valid {
                return Err(anyhow!("github.repo must be 'owner/name', got '{repo}'"));
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retry_budget(&self) -> Duration {
        Duration::from_secs(self.retry_budget_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    /// Release token from the config, else `GITHUB_TOKEN`.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig = toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Immutable execution mode, resolved once per run and passed by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeFlags {
    pub ci_mode: bool,
    pub autofix: bool,
    pub dry_run: bool,
    pub interactive: bool,
    pub allow_safe_reset: bool,
    pub allow_destructive_reset: bool,
    pub gh_repo: Option<String>,
}

impl RuntimeFlags {
    /// Non-interactive runs are treated as CI.
    pub fn from_config(cfg: &RunConfig) -> Self {
        let ci_mode = cfg.ci || !cfg.interactive;
        Self {
            ci_mode,
            autofix: cfg.auto_fix || cfg.batch_commit,
            dry_run: cfg.dry_run,
            interactive: !ci_mode,
            allow_safe_reset: cfg.safe_reset,
            allow_destructive_reset: cfg.destructive_reset,
            gh_repo: cfg.github.repo.clone(),
        }
    }

    pub fn opt_ins(&self) -> OptIns {
        OptIns {
            safe_reset: self.allow_safe_reset,
            destructive_reset: self.allow_destructive_reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        let mut cfg = RunConfig::default();
        cfg.push = true;
        cfg.tag.bump = Bump::Minor;
        cfg.github.repo = Some("acme/widgets".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "publish = true\n[tag]\nbump = \"major\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(cfg.publish);
        assert_eq!(cfg.tag.bump, Bump::Major);
        assert_eq!(cfg.tag.prefix, "v");
        assert_eq!(cfg.retry_budget_secs, 45);
    }

    #[test]
    fn rejects_malformed_github_repo() {
        let mut cfg = RunConfig::default();
        cfg.github.repo = Some("just-a-name".to_string());
        assert!(cfg.validate().is_err());
        cfg.github.repo = Some("a/b/c".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_interactive_runs_are_ci() {
        let cfg = RunConfig {
            interactive: false,
            batch_commit: true,
            ..RunConfig::default()
        };
        let flags = RuntimeFlags::from_config(&cfg);
        assert!(flags.ci_mode);
        assert!(!flags.interactive);
        assert!(flags.autofix);
    }
}
