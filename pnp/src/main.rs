//! `pnp`: push and publish.
//!
//! Runs the release workflow for the repository containing the given path.
//! Failures are reported as a JSON error envelope on stdout and in the run's
//! log directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use pnp::core::classifier::Classifier;
use pnp::core::error_model::{ErrorEnvelope, FailureEvent, codes};
use pnp::core::retry::is_retryable;
use pnp::core::semver::Bump;
use pnp::exit_codes;
use pnp::io::config::{CONFIG_FILE, RunConfig, RuntimeFlags, load_config, write_config};
use pnp::io::executor::ResilientExecutor;
use pnp::io::process::{SystemRunner, install_interrupt_handler};
use pnp::io::prompt::StdinPrompter;
use pnp::io::release::GhCliPublisher;
use pnp::io::remediation::Remediator;
use pnp::io::repo::{find_repo, log_dir};
use pnp::io::telemetry::{EventSink, JsonlEventSink, NullSink, utc_timestamp};
use pnp::logging;
use pnp::orchestrator::{GitWorkflow, Orchestrator, RunContext, RunOutcome, RunReport};
use pnp::policy::PolicyEngine;

const ENVELOPE_FILE: &str = "error_envelope.json";

#[derive(Parser)]
#[command(name = "pnp", version, about = "Release workflow automation for git repositories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the release workflow.
    Run(RunArgs),
    /// Classify a git error message (`-` reads stdin) and print the result as JSON.
    Classify { stderr: String },
    /// Write a default `.pnp.toml` into a directory.
    InitConfig {
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Directory inside the repository (or package) to release.
    #[arg(default_value = ".")]
    path: PathBuf,
    /// Config file; defaults to `<repo>/.pnp.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    remote: Option<String>,
    #[arg(long)]
    push: bool,
    /// Create and push the next version tag.
    #[arg(long)]
    publish: bool,
    /// Create a GitHub release for the tag.
    #[arg(long)]
    release: bool,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    ci: bool,
    #[arg(long)]
    non_interactive: bool,
    #[arg(long)]
    auto_fix: bool,
    #[arg(long)]
    batch_commit: bool,
    #[arg(long)]
    dry_run: bool,
    /// Allow network re-clone remediations in auto-fix mode.
    #[arg(long)]
    safe_reset: bool,
    /// Allow history-rewriting remediations in auto-fix mode.
    #[arg(long)]
    destructive_reset: bool,
    /// `;`-separated hook commands, optionally `label::command`.
    #[arg(long)]
    hooks: Option<String>,
    #[arg(long)]
    tag_prefix: Option<String>,
    /// patch, minor or major.
    #[arg(long)]
    tag_bump: Option<String>,
    #[arg(long)]
    tag_message: Option<String>,
    #[arg(long)]
    tag_sign: bool,
    /// Run `git machete traverse`.
    #[arg(long)]
    machete: bool,
    /// Add `--fetch --sync` to the traverse.
    #[arg(long)]
    machete_sync: bool,
    /// GitHub repository as `owner/name`.
    #[arg(long)]
    gh_repo: Option<String>,
    #[arg(long)]
    draft: bool,
    #[arg(long)]
    prerelease: bool,
    /// File to attach to the release. Repeatable.
    #[arg(long = "asset")]
    assets: Vec<String>,
}

impl RunArgs {
    /// Flags override file values; unset flags leave them alone.
    fn apply(&self, cfg: &mut RunConfig) -> Result<()> {
        if let Some(remote) = &self.remote {
            cfg.remote = Some(remote.clone());
        }
        for (flag, field) in [
            (self.push, &mut cfg.push),
            (self.publish, &mut cfg.publish),
            (self.release, &mut cfg.release),
            (self.force, &mut cfg.force),
            (self.ci, &mut cfg.ci),
            (self.auto_fix, &mut cfg.auto_fix),
            (self.batch_commit, &mut cfg.batch_commit),
            (self.dry_run, &mut cfg.dry_run),
            (self.safe_reset, &mut cfg.safe_reset),
            (self.destructive_reset, &mut cfg.destructive_reset),
            (self.tag_sign, &mut cfg.tag.sign),
            (self.machete, &mut cfg.machete.enabled),
            (self.machete_sync, &mut cfg.machete.sync),
            (self.draft, &mut cfg.github.draft),
            (self.prerelease, &mut cfg.github.prerelease),
        ] {
            if flag {
                *field = true;
            }
        }
        if self.non_interactive {
            cfg.interactive = false;
        }
        if self.machete_sync {
            cfg.machete.enabled = true;
        }
        if let Some(hooks) = &self.hooks {
            cfg.hooks = Some(hooks.clone());
        }
        if let Some(prefix) = &self.tag_prefix {
            cfg.tag.prefix = prefix.clone();
        }
        if let Some(bump) = &self.tag_bump {
            cfg.tag.bump = bump.parse::<Bump>()?;
        }
        if let Some(message) = &self.tag_message {
            cfg.tag.message = Some(message.clone());
        }
        if let Some(repo) = &self.gh_repo {
            cfg.github.repo = Some(repo.clone());
        }
        cfg.github.assets.extend(self.assets.iter().cloned());
        Ok(())
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Classify { stderr } => cmd_classify(&stderr),
        Command::InitConfig { dir, force } => cmd_init_config(&dir, force),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    install_interrupt_handler()?;
    let start = args
        .path
        .canonicalize()
        .with_context(|| format!("resolve {}", args.path.display()))?;
    let repo = find_repo(&start);

    let config_path = args
        .config
        .clone()
        .or_else(|| repo.as_ref().map(|r| r.join(CONFIG_FILE)));
    let mut cfg = match &config_path {
        Some(path) => load_config(path)?,
        None => RunConfig::default(),
    };
    args.apply(&mut cfg)?;
    cfg.validate()?;
    let flags = RuntimeFlags::from_config(&cfg);

    let sink = open_sink(repo.as_deref());
    let events = sink.as_ref();
    let runner = SystemRunner {
        output_limit_bytes: cfg.output_limit_bytes,
    };
    let prompter = StdinPrompter;
    let remediator = Remediator::new(&runner, events, &prompter, &flags, cfg.command_timeout());
    let exec = ResilientExecutor::new(
        &runner,
        PolicyEngine::new(remediator, events),
        events,
        &flags,
        cfg.command_timeout(),
        cfg.retry_budget(),
    );
    let publisher = GhCliPublisher::new(&runner, start.clone(), cfg.command_timeout());
    let mut workflow = GitWorkflow::new(&cfg, &exec, &runner, &prompter, &publisher, events);

    let report = Orchestrator::new(events).run(&mut workflow, RunContext::new(start));
    print_steps(&report);
    match &report.outcome {
        RunOutcome::Completed => {
            println!("release workflow completed");
            Ok(exit_codes::OK)
        }
        RunOutcome::Done { message, .. } => {
            println!("{message}");
            Ok(exit_codes::OK)
        }
        RunOutcome::Failed(event) => report_failure(&report, event),
    }
}

/// Telemetry must never stop a run; fall back to a null sink.
fn open_sink(repo: Option<&Path>) -> Box<dyn EventSink> {
    let Some(repo) = repo else {
        return Box::new(NullSink);
    };
    match JsonlEventSink::new(&log_dir(repo)) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!(err = %format!("{e:#}"), "event log unavailable");
            Box::new(NullSink)
        }
    }
}

fn print_steps(report: &RunReport) {
    for record in &report.steps {
        eprintln!("[{}] {}: {}", record.verdict, record.step.label(), record.message);
    }
}

fn report_failure(report: &RunReport, event: &FailureEvent) -> Result<i32> {
    let mut context = BTreeMap::new();
    if let Some(repo) = &report.context.repo {
        context.insert("repo".to_string(), repo.display().to_string());
    }
    if let Some(tag) = &report.context.tag {
        context.insert("tag".to_string(), tag.clone());
    }
    let envelope = ErrorEnvelope::from_failure(event, utc_timestamp(), is_retryable(&event.code), context);
    if let Some(dir) = &report.context.log_dir {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        write_json(&dir.join(ENVELOPE_FILE), &envelope)?;
    }
    println!("{}", serde_json::to_string_pretty(&envelope).context("serialize error envelope")?);
    Ok(if event.code == codes::INT_KEYBOARD_INTERRUPT {
        exit_codes::INTERRUPTED
    } else {
        exit_codes::INVALID
    })
}

fn cmd_classify(stderr: &str) -> Result<i32> {
    let text = if stderr == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("read stdin")?;
        buf
    } else {
        stderr.to_string()
    };
    let classification = Classifier::new().classify(&text);
    println!(
        "{}",
        serde_json::to_string_pretty(&classification).context("serialize classification")?
    );
    Ok(exit_codes::OK)
}

fn cmd_init_config(dir: &Path, force: bool) -> Result<i32> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &RunConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
