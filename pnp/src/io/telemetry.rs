//! Structured run events.
//!
//! Events are product output, separate from `tracing` diagnostics: one JSON
//! object per line in `<log_dir>/events.jsonl`. Every payload passes through
//! [`redact_value`] before it is written. Sink failures are logged and never
//! fail the run.

use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

pub const EVENTS_FILE: &str = "events.jsonl";
const REDACTED: &str = "***";

/// One emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    pub run_id: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub payload: Value,
}

/// Destination for run events.
pub trait EventSink {
    fn emit(&self, event_type: &str, step_id: Option<&str>, payload: Value);
}

/// UTC timestamp with a `Z` suffix, second precision.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Short run identifier derived from the process id and start time.
pub fn new_run_id() -> String {
    let seed = format!("{}:{}", std::process::id(), Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true));
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    digest[..12].to_string()
}

fn build_event(run_id: &str, event_type: &str, step_id: Option<&str>, payload: Value) -> Event {
    Event {
        ts: utc_timestamp(),
        run_id: run_id.to_string(),
        event_type: event_type.to_string(),
        step_id: step_id.map(str::to_string),
        payload: redact_value(payload),
    }
}

/// Appends events to `<log_dir>/events.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlEventSink {
    path: PathBuf,
    run_id: String,
}

impl JsonlEventSink {
    pub fn new(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir).with_context(|| format!("create log directory {}", log_dir.display()))?;
        Ok(Self {
            path: log_dir.join(EVENTS_FILE),
            run_id: new_run_id(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }
}

impl EventSink for JsonlEventSink {
    fn emit(&self, event_type: &str, step_id: Option<&str>, payload: Value) {
        let event = build_event(&self.run_id, event_type, step_id, payload);
        if let Err(e) = self.append(&event) {
            warn!(err = %format!("{e:#}"), event_type, "failed to write event");
        }
    }
}

/// Discards events. Used before the log directory is known.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event_type: &str, _step_id: Option<&str>, _payload: Value) {}
}

/// Keeps events in memory for assertions.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: RefCell<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<Event> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event_type: &str, step_id: Option<&str>, payload: Value) {
        let event = build_event("memory", event_type, step_id, payload);
        self.events.borrow_mut().push(event);
    }
}

static URL_CREDENTIALS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://)[^/\s@]+@").unwrap());
static SECRET_ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(token|password|secret|passwd)(\s*[=:]\s*)[^\s,;&]+").unwrap()
});
static GITHUB_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(gh[pousr]_[A-Za-z0-9]{16,}|github_pat_[A-Za-z0-9_]{16,})").unwrap());
static SECRET_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(token|password|secret|passwd)").unwrap());

/// Mask credentials in free text.
pub fn redact(text: &str) -> String {
    let text = URL_CREDENTIALS_RE.replace_all(text, format!("${{1}}{REDACTED}@").as_str());
    let text = SECRET_ASSIGNMENT_RE.replace_all(&text, format!("${{1}}${{2}}{REDACTED}").as_str());
    GITHUB_TOKEN_RE.replace_all(&text, REDACTED).into_owned()
}

/// Mask credentials in a JSON payload. Values under secret-looking keys are dropped entirely.
pub fn redact_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| {
                    let v = if SECRET_KEY_RE.is_match(&key) && !v.is_null() {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_value(v)
                    };
                    (key, v)
                })
                .collect(),
        ),
        other => other,
    }
}
