//! Capturing the output of short-lived CLI calls (`gh`) under a deadline.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Output kept per stream; the rest is drained and dropped.
pub const CAPTURE_LIMIT_BYTES: usize = 1_000_000;

#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub dropped_bytes: usize,
    pub timed_out: bool,
}

impl Captured {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Error unless the call exited zero before its deadline.
    pub fn ensure_success(&self, label: &str) -> Result<()> {
        if self.timed_out {
            return Err(anyhow!("{label} timed out"));
        }
        if !self.status.success() {
            return Err(anyhow!(
                "{label} exited with {:?}: {}",
                self.status.code(),
                String::from_utf8_lossy(&self.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// Run `cmd` with no stdin, killing it after `timeout`.
///
/// Both pipes are drained on their own threads so a chatty child cannot
/// block on a full pipe while we wait.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_ms = timeout.as_millis() as u64))]
pub fn capture(mut cmd: Command, timeout: Duration, limit: usize) -> Result<Captured> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain(stdout, limit));
    let stderr_reader = thread::spawn(move || drain(stderr, limit));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!("deadline passed, killing");
            child.kill().context("kill command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    let (stdout, dropped_out) = join(stdout_reader)?;
    let (stderr, dropped_err) = join(stderr_reader)?;
    let dropped_bytes = dropped_out + dropped_err;
    if dropped_bytes > 0 {
        warn!(dropped_bytes, "command output over limit");
    }
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(Captured {
        status,
        stdout,
        stderr,
        dropped_bytes,
        timed_out,
    })
}

fn join(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader panicked"))?
}

/// Read `reader` to the end, keeping at most `limit` bytes.
fn drain<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read command output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let take = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..take]);
        dropped += n - take;
    }
}
