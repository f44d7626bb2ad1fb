//! Generated commit messages from staged change summaries.

/// Kind of change reported by `git diff --name-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

impl ChangeKind {
    /// Map a name-status marker (`A`, `M`, `D`, `R100`, ...) to a kind.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.chars().next()? {
            'A' | 'C' => Some(ChangeKind::Added),
            'M' | 'R' | 'T' => Some(ChangeKind::Updated),
            'D' => Some(ChangeKind::Removed),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Updated => "updated",
            ChangeKind::Removed => "removed",
        }
    }
}

pub const AUTO_COMMIT_PREFIX: &str = "[pnp] auto commit - ";

/// Parse `git diff --name-status` output into `(kind, path)` pairs.
pub fn parse_name_status(output: &str) -> Vec<(ChangeKind, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let kind = ChangeKind::from_marker(parts.next()?.trim())?;
            // Renames and copies list the new path last.
            let path = parts.last()?.trim();
            (!path.is_empty()).then(|| (kind, path.to_string()))
        })
        .collect()
}

/// Build a one-line summary of the change set.
///
/// Small change sets list files per kind; larger ones fall back to counts.
pub fn generate(changes: &[(ChangeKind, String)]) -> String {
    if changes.is_empty() {
        return format!("{AUTO_COMMIT_PREFIX}general update");
    }
    let groups = [ChangeKind::Added, ChangeKind::Updated, ChangeKind::Removed].map(|kind| {
        let files: Vec<&str> = changes
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, path)| path.as_str())
            .collect();
        (kind, files)
    });

    let added = groups[0].1.len();
    let body = if added < 4 && changes.len() < 7 {
        groups
            .iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(kind, files)| format!("{}: {}", kind.label(), join_human(files)))
            .collect::<Vec<_>>()
            .join("; ")
    } else {
        groups
            .iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(kind, files)| format!("{} {} file(s)", kind.label(), files.len()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{AUTO_COMMIT_PREFIX}{body}")
}

fn join_human(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [one] => (*one).to_string(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_change_set_is_general_update() {
        assert_eq!(generate(&[]), "[pnp] auto commit - general update");
    }

    #[test]
    fn small_change_sets_list_files() {
        let changes = parse_name_status("A\tsrc/new.rs\nM\tREADME.md\nM\tCargo.toml\nD\told.txt\n");
        assert_eq!(
            generate(&changes),
            "[pnp] auto commit - added: src/new.rs; updated: README.md and Cargo.toml; removed: old.txt"
        );
    }

    #[test]
    fn large_change_sets_use_counts() {
        let output: String = (0..8).map(|i| format!("M\tf{i}.rs\n")).collect();
        let changes = parse_name_status(&output);
        assert_eq!(generate(&changes), "[pnp] auto commit - updated 8 file(s)");
    }

    #[test]
    fn rename_uses_new_path() {
        let changes = parse_name_status("R100\told.rs\tnew.rs\n");
        assert_eq!(changes, vec![(ChangeKind::Updated, "new.rs".to_string())]);
    }

    #[test]
    fn joins_three_items_with_serial_comma() {
        assert_eq!(join_human(&["a", "b", "c"]), "a, b, and c");
    }
}
