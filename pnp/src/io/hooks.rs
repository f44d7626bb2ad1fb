//! Pre-release hook commands.
//!
//! Hooks come from a `;`-separated spec (`label::command` or `command`). They
//! are screened for shell syntax and dangerous programs, then executed
//! directly (no shell) under a timeout.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandRunner, CommandSpec, ProcessOutput};

const SHELL_METACHARACTERS: &[char] = &['$', '&', ';', '|', '>', '<', '`', '(', ')'];

const BLOCKED_PROGRAMS: &[&str] = &[
    "rm", "mv", "dd", "shutdown", "reboot", "mkfs", "kill", "killall", "sudo", "tsu", "chown", "chmod", "wget",
    "curl",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    pub label: String,
    pub command: String,
}

/// Split a hook spec into individual hooks. Empty entries are dropped.
pub fn parse_hooks(spec: &str) -> Vec<HookSpec> {
    spec.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once("::") {
            Some((label, command)) if !label.trim().is_empty() => HookSpec {
                label: label.trim().to_string(),
                command: command.trim().to_string(),
            },
            _ => HookSpec {
                label: entry.to_string(),
                command: entry.trim_start_matches("::").trim().to_string(),
            },
        })
        .collect()
}

/// Reject hooks that would need a shell or run a blocked program.
pub fn screen(hook: &HookSpec) -> Result<Vec<String>> {
    if let Some(c) = hook.command.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(anyhow!("hook '{}' uses shell syntax '{c}'", hook.label));
    }
    let argv: Vec<String> = hook.command.split_whitespace().map(str::to_string).collect();
    let Some(program) = argv.first() else {
        return Err(anyhow!("hook '{}' is empty", hook.label));
    };
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if BLOCKED_PROGRAMS.contains(&name.as_str()) {
        return Err(anyhow!("hook '{}' runs blocked command '{name}'", hook.label));
    }
    Ok(argv)
}

/// Run one screened hook in `cwd`.
#[instrument(skip_all, fields(label = %hook.label))]
pub fn run_hook(runner: &dyn CommandRunner, hook: &HookSpec, cwd: &Path, timeout: Duration) -> Result<ProcessOutput> {
    let argv = screen(hook)?;
    let (program, args) = argv.split_first().ok_or_else(|| anyhow!("hook '{}' is empty", hook.label))?;
    debug!(program = %program, "running hook");
    let out = runner.run(&CommandSpec::new(program, args, cwd, timeout))?;
    if !out.success() {
        warn!(code = out.code, "hook failed");
    }
    Ok(out)
}
