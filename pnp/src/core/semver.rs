//! Tag version bumping.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bump {
    #[default]
    Patch,
    Minor,
    Major,
}

impl FromStr for Bump {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patch" => Ok(Bump::Patch),
            "minor" => Ok(Bump::Minor),
            "major" => Ok(Bump::Major),
            other => Err(anyhow!("unknown bump '{other}' (expected patch, minor or major)")),
        }
    }
}

impl fmt::Display for Bump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bump::Patch => "patch",
            Bump::Minor => "minor",
            Bump::Major => "major",
        })
    }
}

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)$").unwrap());

/// Compute the next tag from the latest one.
///
/// A pre-release suffix (`-rc1`) is carried over. Tags that are not
/// `prefix + X.Y.Z` restart at the first version for the bump kind. A
/// component that does not fit in `u64`, or would overflow, is an error.
pub fn bump_tag(latest: &str, bump: Bump, prefix: &str) -> Result<String> {
    let sem = latest.strip_prefix(prefix).unwrap_or(latest);
    let (sem, suffix) = match sem.split_once('-') {
        Some((core, rest)) => (core, format!("-{rest}")),
        None => (sem, String::new()),
    };

    let Some(caps) = SEMVER_RE.captures(sem) else {
        let fresh = match bump {
            Bump::Patch => "0.0.1",
            Bump::Minor => "0.1.0",
            Bump::Major => "1.0.0",
        };
        return Ok(format!("{prefix}{fresh}{suffix}"));
    };
    let part = |i: usize| {
        caps[i]
            .parse::<u64>()
            .map_err(|e| anyhow!("version component '{}' in tag '{latest}': {e}", &caps[i]))
    };
    let (major, minor, patch) = (part(1)?, part(2)?, part(3)?);
    let next = |n: u64| n.checked_add(1).ok_or_else(|| anyhow!("cannot bump tag '{latest}': {bump} version overflows"));
    let (major, minor, patch) = match bump {
        Bump::Patch => (major, minor, next(patch)?),
        Bump::Minor => (major, next(minor)?, 0),
        Bump::Major => (next(major)?, 0, 0),
    };
    Ok(format!("{prefix}{major}.{minor}.{patch}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bumped(latest: &str, bump: Bump, prefix: &str) -> String {
        bump_tag(latest, bump, prefix).expect("bump")
    }

    #[test]
    fn bumps_each_component() {
        assert_eq!(bumped("v1.2.3", Bump::Patch, "v"), "v1.2.4");
        assert_eq!(bumped("v1.2.3", Bump::Minor, "v"), "v1.3.0");
        assert_eq!(bumped("v1.2.3", Bump::Major, "v"), "v2.0.0");
    }

    #[test]
    fn starts_fresh_without_a_usable_tag() {
        assert_eq!(bumped("", Bump::Patch, "v"), "v0.0.1");
        assert_eq!(bumped("nightly", Bump::Minor, "v"), "v0.1.0");
        assert_eq!(bumped("", Bump::Major, "release-"), "release-1.0.0");
    }

    #[test]
    fn keeps_prerelease_suffix() {
        assert_eq!(bumped("v0.9.9-rc1", Bump::Patch, "v"), "v0.9.10-rc1");
    }

    #[test]
    fn overflowing_component_is_an_error() {
        let err = bump_tag("v0.0.18446744073709551615", Bump::Patch, "v").expect_err("overflow");
        assert!(format!("{err:#}").contains("overflows"));
        assert!(bump_tag("v18446744073709551615.0.0", Bump::Major, "v").is_err());
        assert_eq!(bumped("v0.0.18446744073709551615", Bump::Minor, "v"), "v0.1.0");
    }

    #[test]
    fn component_wider_than_u64_is_an_error() {
        assert!(bump_tag("v0.0.99999999999999999999", Bump::Patch, "v").is_err());
    }

    #[test]
    fn parses_bump_names() {
        assert_eq!("Minor".parse::<Bump>().expect("parse"), Bump::Minor);
        assert!("huge".parse::<Bump>().is_err());
    }
}
