//! Child process execution with timeouts, bounded output and cooperative interrupts.
//!
//! Every external command the workflow runs goes through a [`CommandRunner`].
//! [`SystemRunner`] is the real implementation; tests substitute scripted ones.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::exit_codes;
use crate::io::telemetry::redact;

const WAIT_SLICE: Duration = Duration::from_millis(100);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install a Ctrl-C handler that flips the process-wide interrupt flag.
///
/// Running children are killed at the next wait slice and reported with
/// [`exit_codes::INTERRUPTED`].
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)).context("install interrupt handler")
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Sleep for `total`, waking early on interrupt. Returns `false` if interrupted.
pub fn sleep_interruptibly(total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if interrupted() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(WAIT_SLICE));
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub interrupted: bool,
}

impl CommandOutput {
    /// Exit code with signals folded in: SIGINT (and our own interrupt) map to 130.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return exit_codes::INTERRUPTED;
        }
        if self.timed_out {
            return exit_codes::TIMEOUT;
        }
        if let Some(code) = self.status.code() {
            return code;
        }
        signal_exit_code(&self.status)
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(2) => exit_codes::INTERRUPTED,
        Some(sig) => 128 + sig,
        None => 1,
    }
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &ExitStatus) -> i32 {
    1
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child is killed when the timeout elapses or an interrupt arrives.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(mut cmd: Command, timeout: Duration, output_limit_bytes: usize) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut was_interrupted = false;
    let status = loop {
        let now = Instant::now();
        let slice = deadline.saturating_duration_since(now).min(WAIT_SLICE);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
        if interrupted() {
            warn!("interrupt received, killing command");
            was_interrupted = true;
        } else if Instant::now() >= deadline {
            warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            timed_out = true;
        } else {
            continue;
        }
        child.kill().context("kill command")?;
        break child.wait().context("wait command after kill")?;
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, interrupted = was_interrupted, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        interrupted: was_interrupted,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<S: AsRef<str>>(program: &str, args: &[S], cwd: &Path, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            cwd: cwd.to_path_buf(),
            env: Vec::new(),
            timeout,
        }
    }

    pub fn git<S: AsRef<str>>(args: &[S], cwd: &Path, timeout: Duration) -> Self {
        Self::new("git", args, cwd, timeout)
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// True when the argument list starts with `prefix`.
    pub fn args_start_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }

    /// `program args...` for logs and telemetry.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Decoded result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Trimmed stdout, or stderr when stdout is empty.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        if out.is_empty() {
            self.stderr.trim().to_string()
        } else {
            out.to_string()
        }
    }
}

/// Seam for running external commands.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    pub output_limit_bytes: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(command = %redact(&spec.display())))]
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).current_dir(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        let output = run_command_with_timeout(cmd, spec.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", redact(&spec.display())))?;
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.timed_out {
            stderr.push_str("\ncommand timed out");
        }
        Ok(ProcessOutput {
            code: output.exit_code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_streams() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = CommandSpec::new(
            "sh",
            &["-c", "echo out; echo err >&2; exit 3"],
            temp.path(),
            Duration::from_secs(10),
        );
        let out = SystemRunner::default().run(&spec).expect("run");
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.combined(), "out");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let out = run_command_with_timeout(cmd, Duration::from_millis(200), 1024).expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_code(), exit_codes::TIMEOUT);
    }

    #[cfg(unix)]
    #[test]
    fn sigint_maps_to_interrupted_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "kill -INT $$"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 1024).expect("run");
        assert_eq!(out.exit_code(), exit_codes::INTERRUPTED);
    }

    #[cfg(unix)]
    #[test]
    fn output_is_bounded() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'abcdefghij'"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 4).expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn matches_argument_prefix() {
        let spec = CommandSpec::git(&["push", "origin", "main"], Path::new("."), Duration::from_secs(1));
        assert!(spec.args_start_with(&["push"]));
        assert!(spec.args_start_with(&["push", "origin"]));
        assert!(!spec.args_start_with(&["push", "upstream"]));
        assert_eq!(spec.display(), "git push origin main");
    }

    #[test]
    fn combined_falls_back_to_stderr() {
        let out = ProcessOutput {
            code: 1,
            stdout: "  ".to_string(),
            stderr: " fatal: nope \n".to_string(),
        };
        assert_eq!(out.combined(), "fatal: nope");
    }
}
