//! Operator prompts for interactive remediation.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

/// Source of interactive answers.
///
/// `None` from [`Prompter::choose`] means the operator closed input (EOF);
/// callers treat it as abort.
pub trait Prompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;
    fn choose(&self, question: &str, options: &[&str]) -> Result<Option<usize>>;
}

/// Reads answers from stdin, writes questions to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

impl StdinPrompter {
    fn read_line(&self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = io::stdin().lock().read_line(&mut line).context("read answer from stdin")?;
        Ok((n > 0).then(|| line.trim().to_string()))
    }
}

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let mut err = io::stderr().lock();
        write!(err, "{question} {hint} ").context("write prompt")?;
        err.flush().context("flush prompt")?;
        let Some(answer) = self.read_line()? else {
            return Ok(false);
        };
        Ok(match answer.to_ascii_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }

    fn choose(&self, question: &str, options: &[&str]) -> Result<Option<usize>> {
        let mut err = io::stderr().lock();
        writeln!(err, "{question}").context("write prompt")?;
        for (i, option) in options.iter().enumerate() {
            writeln!(err, "  {}) {option}", i + 1).context("write prompt")?;
        }
        loop {
            write!(err, "choice [1-{}]: ", options.len()).context("write prompt")?;
            err.flush().context("flush prompt")?;
            let Some(answer) = self.read_line()? else {
                return Ok(None);
            };
            if let Ok(n) = answer.parse::<usize>()
                && (1..=options.len()).contains(&n)
            {
                return Ok(Some(n - 1));
            }
            if let Some(i) = options.iter().position(|o| o.eq_ignore_ascii_case(&answer)) {
                return Ok(Some(i));
            }
        }
    }
}
