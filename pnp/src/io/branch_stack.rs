//! `git machete` branch-stack integration.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, instrument};

use crate::io::config::MacheteConfig;
use crate::io::git::Git;

pub const MACHETE_BINARY: &str = "git-machete";

/// Locate an executable on `PATH`.
pub fn find_on_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Arguments for `git machete traverse`.
pub fn traverse_args(cfg: &MacheteConfig, interactive: bool) -> Vec<&'static str> {
    let mut args = vec!["traverse"];
    if cfg.sync {
        args.extend(["--fetch", "--sync"]);
    }
    if !interactive {
        args.push("--yes");
    }
    args
}

/// Outcome of a branch-stack sync: `Ok(None)` on success, else the failing output.
#[instrument(skip_all, fields(sync = cfg.sync))]
pub fn sync_stack(git: &Git<'_, '_>, cfg: &MacheteConfig, interactive: bool) -> Result<Option<String>> {
    let status = git.machete(&["status"])?;
    if !status.success() {
        return Ok(Some(format!("git machete status failed: {}", status.output.trim())));
    }
    info!("branch stack status collected");
    let traverse = git.machete(&traverse_args(cfg, interactive))?;
    if !traverse.success() {
        return Ok(Some(format!("git machete traverse failed: {}", traverse.output.trim())));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traverse_args_follow_config() {
        let plain = MacheteConfig {
            enabled: true,
            sync: false,
        };
        assert_eq!(traverse_args(&plain, true), vec!["traverse"]);

        let sync = MacheteConfig {
            enabled: true,
            sync: true,
        };
        assert_eq!(traverse_args(&sync, false), vec!["traverse", "--fetch", "--sync", "--yes"]);
    }

    #[test]
    fn missing_binary_is_not_found() {
        assert!(find_on_path("pnp-definitely-not-installed-binary").is_none());
    }
}
