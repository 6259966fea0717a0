//! Interactive (manual) candidate selection.

use std::io::{BufRead, Write};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::types::Scored;

/// Source of an explicit selection that bypasses automatic picking.
pub trait Picker {
    /// Offer `ranked` candidates and return the ids chosen.
    ///
    /// `Ok(None)` means no answer arrived within `timeout`; the caller resumes
    /// the loop without scheduling.
    fn pick(&self, ranked: &[Scored], free_slots: usize, timeout: Duration)
    -> Result<Option<Vec<String>>>;
}

/// Split an answer such as `"12, 15 18"` into ids.
pub fn parse_selection(line: &str) -> Vec<String> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render the candidate menu shown to the operator.
pub fn render_menu(ranked: &[Scored], free_slots: usize) -> String {
    let mut out = format!("{free_slots} slot(s) free. Candidates:\n");
    for scored in ranked {
        let c = &scored.candidate;
        let domain = c
            .conflict_domain
            .as_deref()
            .map(|d| format!(" [{d}]"))
            .unwrap_or_default();
        out.push_str(&format!(
            "  {:>8.1}  {}  {}{}\n",
            scored.score, c.id, c.title, domain
        ));
    }
    out.push_str("Enter ids to start (comma separated), empty to skip: ");
    out
}

/// [`Picker`] that reads answers from stdin.
///
/// A single background thread owns stdin for the life of the picker, so a
/// prompt that timed out does not leave a reader behind to swallow the next
/// answer.
pub struct StdinPicker {
    lines: Mutex<Receiver<String>>,
}

impl StdinPicker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
        }
    }
}

impl Default for StdinPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Picker for StdinPicker {
    fn pick(
        &self,
        ranked: &[Scored],
        free_slots: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<String>>> {
        let lines = self
            .lines
            .lock()
            .map_err(|_| anyhow!("picker input poisoned"))?;
        // Discard anything typed while no prompt was showing.
        while lines.try_recv().is_ok() {}

        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(render_menu(ranked, free_slots).as_bytes());
        let _ = stderr.flush();

        match lines.recv_timeout(timeout) {
            Ok(line) => Ok(Some(parse_selection(&line))),
            Err(RecvTimeoutError::Timeout) => {
                let _ = writeln!(stderr);
                debug!(timeout_secs = timeout.as_secs(), "selection timed out");
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("stdin closed, no selection");
                Ok(None)
            }
        }
    }
}
