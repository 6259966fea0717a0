//! Ledger persistence (`.conductor/state/ledger.json`).
//!
//! The controller is the single writer. Every update replaces the whole
//! document with a temp-file write followed by a rename, so concurrent readers
//! (`conductor status`, dashboards) only ever observe a complete document.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use jsonschema::validator_for;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use tracing::debug;

use crate::core::ledger::{Ledger, LedgerChange};

const LEDGER_SCHEMA: &str = include_str!("../../schemas/ledger.schema.json");

/// Generate a session id such as `sess-20260101T120000-a1b2c3`.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "sess-{}-{}",
        now.format("%Y%m%dT%H%M%S"),
        suffix.to_ascii_lowercase()
    )
}

/// Load and validate a ledger document.
pub fn load_ledger(path: &Path) -> Result<Ledger> {
    debug!(path = %path.display(), "loading ledger");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse ledger {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate ledger {}", path.display()))?;
    let ledger: Ledger = serde_json::from_value(value)
        .with_context(|| format!("decode ledger {}", path.display()))?;
    debug!(session_id = %ledger.session_id, tasks = ledger.tasks.len(), "ledger loaded");
    Ok(ledger)
}

/// Atomically write a ledger document (temp file + rename).
pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<()> {
    debug!(path = %path.display(), tasks = ledger.tasks.len(), "writing ledger");
    let mut buf = serde_json::to_string_pretty(ledger)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(LEDGER_SCHEMA).context("parse ledger schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "ledger schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("ledger path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp ledger {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace ledger {}", path.display()))?;
    Ok(())
}

/// Single-writer handle over the persisted ledger.
///
/// Holds the last document written. `update` works on a copy and only swaps
/// it in after the copy is safely on disk.
#[derive(Debug)]
pub struct LedgerStore {
    path: PathBuf,
    current: Ledger,
}

impl LedgerStore {
    /// Open the ledger at `path`, creating a fresh session document if absent.
    pub fn open(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Result<Self> {
        let path = path.into();
        let current = if path.exists() {
            load_ledger(&path)?
        } else {
            let ledger = Ledger::new(new_session_id(now), now);
            write_ledger(&path, &ledger)?;
            ledger
        };
        Ok(Self { path, current })
    }

    /// Borrow the current document.
    pub fn current(&self) -> &Ledger {
        &self.current
    }

    /// Owned copy of the current document.
    pub fn snapshot(&self) -> Ledger {
        self.current.clone()
    }

    /// Apply `f` to a copy of the document and persist it if anything changed.
    pub fn update<T>(&mut self, f: impl FnOnce(&mut Ledger) -> T) -> Result<T> {
        let mut next = self.current.clone();
        let out = f(&mut next);
        if next != self.current {
            write_ledger(&self.path, &next)?;
            self.current = next;
        }
        Ok(out)
    }

    pub fn apply(&mut self, change: LedgerChange) -> Result<()> {
        self.update(|ledger| ledger.apply(change))
    }

    /// Stamp a new session id and start time, keeping tracked tasks.
    pub fn begin_session(&mut self, now: DateTime<Utc>) -> Result<()> {
        let session_id = new_session_id(now);
        self.update(|ledger| {
            ledger.session_id = session_id;
            ledger.started_at = now;
        })
    }
}
