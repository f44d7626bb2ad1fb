//! The per-run changes log (`<log_dir>/changes.log`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

pub const CHANGES_FILE: &str = "changes.log";
pub const ENTRY_SEPARATOR: &str = "------| ";

/// Format one changelog entry from `git log --pretty=format:"%h %s (%an)"` output.
pub fn format_entry(timestamp: &str, range: &str, log: &str) -> String {
    let body = log.trim();
    let body = if body.is_empty() { "(no commits)" } else { body };
    format!("{ENTRY_SEPARATOR}{timestamp} | {range} |------\n{body}\n")
}

/// Append an entry to the changes log, creating the log directory as needed.
pub fn append_entry(log_dir: &Path, entry: &str) -> Result<()> {
    fs::create_dir_all(log_dir).with_context(|| format!("create log directory {}", log_dir.display()))?;
    let path = log_dir.join(CHANGES_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(entry.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

/// Most recent entry in the changes log, if any.
pub fn latest_entry(log_dir: &Path) -> Result<Option<String>> {
    let path = log_dir.join(CHANGES_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(contents
        .rsplit(ENTRY_SEPARATOR)
        .find(|chunk| !chunk.trim().is_empty())
        .map(|chunk| format!("{ENTRY_SEPARATOR}{}", chunk.trim_end())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_entry_is_last_appended() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_dir = temp.path().join("pnplog");
        append_entry(&log_dir, &format_entry("2026-01-01T00:00:00Z", "v0.1.0..HEAD", "abc123 first (me)"))
            .expect("append");
        append_entry(&log_dir, &format_entry("2026-01-02T00:00:00Z", "v0.1.1..HEAD", "def456 second (me)"))
            .expect("append");

        let latest = latest_entry(&log_dir).expect("read").expect("entry");
        assert!(latest.starts_with("------| 2026-01-02T00:00:00Z | v0.1.1..HEAD |"));
        assert!(latest.ends_with("def456 second (me)"));
    }

    #[test]
    fn missing_log_has_no_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(latest_entry(temp.path()).expect("read"), None);
    }

    #[test]
    fn empty_log_body_is_marked() {
        assert_eq!(format_entry("t", "HEAD", "  "), "------| t | HEAD |------\n(no commits)\n");
    }
}
