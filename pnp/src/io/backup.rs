//! Working-tree snapshots taken before history-rewriting remediation.
//!
//! A snapshot lives next to the repository in
//! `<repo-name>-backup-YYYYmmdd_HHMMSS`. [`RestoreGuard`] copies it back when
//! dropped while still armed, so every early exit restores local changes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use tracing::{debug, error, info};
use walkdir::{DirEntry, WalkDir};

const EXCLUDED_DIRS: &[&str] = &[".git", ".github", "__pycache__"];

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && EXCLUDED_DIRS.iter().any(|name| entry.file_name() == *name)
}

/// Copy the working tree of `repo` into a fresh timestamped directory.
pub fn snapshot(repo: &Path) -> Result<PathBuf> {
    let name = repo
        .file_name()
        .ok_or_else(|| anyhow!("repository path has no name: {}", repo.display()))?
        .to_string_lossy();
    let parent = repo
        .parent()
        .ok_or_else(|| anyhow!("repository path has no parent: {}", repo.display()))?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup = parent.join(format!("{name}-backup-{stamp}"));
    copy_tree(repo, &backup)?;
    info!(backup = %backup.display(), "working tree snapshot created");
    Ok(backup)
}

/// Copy the snapshot back over the working tree. Files absent from the snapshot are left alone.
pub fn restore(backup: &Path, repo: &Path) -> Result<()> {
    copy_tree(backup, repo)?;
    debug!(backup = %backup.display(), "working tree restored");
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).with_context(|| format!("create directory {}", to.display()))?;
    for entry in WalkDir::new(from).into_iter().filter_entry(|e| !is_excluded(e)) {
        let entry = entry.with_context(|| format!("walk {}", from.display()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create directory {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {} to {}", entry.path().display(), target.display()))?;
        }
    }
    Ok(())
}

/// Restores a snapshot on drop unless disarmed.
#[derive(Debug)]
pub struct RestoreGuard {
    backup: PathBuf,
    repo: PathBuf,
    armed: bool,
}

impl RestoreGuard {
    pub fn new(backup: PathBuf, repo: PathBuf) -> Self {
        Self {
            backup,
            repo,
            armed: true,
        }
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = restore(&self.backup, &self.repo) {
            error!(err = %format!("{e:#}"), backup = %self.backup.display(), "failed to restore working tree");
        }
    }
}
