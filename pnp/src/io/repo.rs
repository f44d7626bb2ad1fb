//! Repository discovery on the filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Per-run output directory, relative to the repository root.
pub const LOG_DIR: &str = "pnplog";

/// Files that mark the root of a project inside a (mono)repository.
pub const PROJECT_MARKERS: &[&str] = &[
    "Cargo.toml",
    "pyproject.toml",
    "package.json",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "composer.json",
    "Gemfile",
    "mix.exs",
    "Project.toml",
];

/// Find the repository root for `start`.
///
/// Walks up through the ancestors first, then looks one level down for a
/// single child holding a `.git` entry.
pub fn find_repo(start: &Path) -> Option<PathBuf> {
    if let Some(found) = start.ancestors().find(|dir| dir.join(".git").exists()) {
        return Some(found.to_path_buf());
    }
    let mut children: Vec<PathBuf> = fs::read_dir(start)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir() && path.join(".git").exists())
        .collect();
    children.sort();
    children.into_iter().next()
}

/// Nearest directory between `start` and `repo` (inclusive) with a project marker.
pub fn find_package(start: &Path, repo: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take_while(|dir| dir.starts_with(repo))
        .find(|dir| PROJECT_MARKERS.iter().any(|marker| dir.join(marker).is_file()))
        .map(Path::to_path_buf)
}

/// Resolve the metadata directory of the repository containing `cwd`.
///
/// Handles worktrees and submodules where `.git` is a `gitdir:` pointer file.
pub fn find_git_dir(cwd: &Path) -> Result<Option<PathBuf>> {
    let Some(root) = cwd.ancestors().find(|dir| dir.join(".git").exists()) else {
        return Ok(None);
    };
    let dot_git = root.join(".git");
    if dot_git.is_dir() {
        return Ok(Some(dot_git));
    }
    let contents = fs::read_to_string(&dot_git).with_context(|| format!("read {}", dot_git.display()))?;
    let Some(pointer) = contents.lines().find_map(|line| line.strip_prefix("gitdir:")) else {
        debug!(path = %dot_git.display(), "unrecognized .git file");
        return Ok(None);
    };
    let target = PathBuf::from(pointer.trim());
    let resolved = if target.is_absolute() { target } else { root.join(target) };
    Ok(Some(resolved))
}

pub fn log_dir(repo: &Path) -> PathBuf {
    repo.join(LOG_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_repo_from_nested_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = temp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).expect("mkdir .git");
        fs::create_dir_all(repo.join("crates/a/src")).expect("mkdir nested");

        assert_eq!(find_repo(&repo.join("crates/a/src")), Some(repo.clone()));
    }

    #[test]
    fn finds_repo_one_level_down() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("b/.git")).expect("mkdir b");
        fs::create_dir_all(temp.path().join("a/.git")).expect("mkdir a");
        fs::create_dir_all(temp.path().join("plain")).expect("mkdir plain");

        assert_eq!(find_repo(temp.path()), Some(temp.path().join("a")));
    }

    #[test]
    fn missing_repo_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(find_repo(temp.path()), None);
    }

    #[test]
    fn package_is_nearest_marker_inside_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = temp.path().to_path_buf();
        fs::create_dir_all(repo.join("services/api/src")).expect("mkdir");
        fs::write(repo.join("package.json"), "{}").expect("write root marker");
        fs::write(repo.join("services/api/go.mod"), "module api").expect("write marker");

        assert_eq!(
            find_package(&repo.join("services/api/src"), &repo),
            Some(repo.join("services/api"))
        );
        assert_eq!(find_package(&repo.join("services"), &repo), Some(repo.clone()));
    }

    #[test]
    fn git_dir_follows_pointer_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worktree = temp.path().join("wt");
        fs::create_dir_all(&worktree).expect("mkdir");
        fs::write(worktree.join(".git"), "gitdir: ../main/.git/worktrees/wt\n").expect("write");

        let git_dir = find_git_dir(&worktree).expect("resolve").expect("git dir");
        assert_eq!(git_dir, worktree.join("../main/.git/worktrees/wt"));
    }
}
