//! Worker launcher abstraction.
//!
//! The [`WorkerLauncher`] trait decouples the controller from the process that
//! actually performs a task. The controller passes a typed [`WorkerRequest`];
//! turning it into instructions for a particular worker happens only inside
//! the launcher implementation.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::WorkerHandle;

const WORKER_TEMPLATE: &str = include_str!("../prompts/worker.md");

/// How the worker should approach the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    Planning,
    Executing,
}

/// Everything a worker needs to start on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerRequest {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub branch: String,
    pub workdir: PathBuf,
    pub base_ref: String,
    pub reservation: Option<u32>,
    pub mode: WorkerMode,
    /// File the worker creates once its plan is approved (planning mode).
    pub plan_marker: String,
}

/// Starts, polls and stops workers.
pub trait WorkerLauncher {
    fn launch(&self, request: &WorkerRequest) -> Result<WorkerHandle>;
    fn is_alive(&self, handle: &WorkerHandle) -> bool;
    fn stop(&self, handle: &WorkerHandle) -> Result<()>;
}

/// Render the brief handed to a command-line worker.
pub fn render_brief(request: &WorkerRequest) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("worker", WORKER_TEMPLATE)
        .context("load worker template")?;
    let template = env.get_template("worker")?;
    let rendered = template.render(context! {
        task => context! {
            id => &request.task_id,
            title => &request.title,
            description => request.description.trim(),
            branch => &request.branch,
            workdir => request.workdir.display().to_string(),
            base_ref => &request.base_ref,
            reservation => request.reservation,
            mode => request.mode,
            plan_marker => &request.plan_marker,
        },
    })?;
    Ok(rendered)
}

/// [`WorkerLauncher`] that spawns a configured command inside the workspace.
///
/// The brief is written to the worker's stdin; stdout and stderr go to
/// `<log_dir>/<task-id>.log`.
#[derive(Debug)]
pub struct CommandLauncher {
    command: Vec<String>,
    log_dir: PathBuf,
    children: Mutex<HashMap<u32, Child>>,
}

impl CommandLauncher {
    pub fn new(command: Vec<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            log_dir: log_dir.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Reap a child we spawned; `Some(alive)` when the pid is ours.
    fn poll_child(&self, pid: u32) -> Option<bool> {
        let mut children = self.children.lock().ok()?;
        let child = children.get_mut(&pid)?;
        match child.try_wait() {
            Ok(None) => Some(true),
            Ok(Some(status)) => {
                debug!(pid, exit_code = ?status.code(), "worker exited");
                children.remove(&pid);
                Some(false)
            }
            Err(err) => {
                warn!(pid, err = %err, "failed to poll worker");
                Some(true)
            }
        }
    }
}

impl WorkerLauncher for CommandLauncher {
    #[instrument(skip_all, fields(task_id = %request.task_id, mode = ?request.mode))]
    fn launch(&self, request: &WorkerRequest) -> Result<WorkerHandle> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("worker command is empty"))?;
        let brief = render_brief(request)?;

        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("create worker log dir {}", self.log_dir.display()))?;
        let log_path = self.log_dir.join(format!("{}.log", request.task_id));
        let log = File::create(&log_path)
            .with_context(|| format!("create worker log {}", log_path.display()))?;
        let log_err = log.try_clone().context("clone worker log handle")?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&request.workdir)
            .env("CONDUCTOR_TASK_ID", &request.task_id)
            .env("CONDUCTOR_BRANCH", &request.branch)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if let Some(reservation) = request.reservation {
            cmd.env("CONDUCTOR_RESERVATION", reservation.to_string());
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn worker {program}"))?;
        if let Some(mut stdin) = child.stdin.take()
            && let Err(err) = stdin.write_all(brief.as_bytes())
        {
            // Nothing tracks the child yet, so it must not outlive this call.
            warn!(pid = child.id(), err = %err, "worker did not take its brief, killing it");
            if let Err(kill_err) = child.kill() {
                warn!(err = %kill_err, "failed to kill worker");
            }
            let _ = child.wait();
            return Err(err).context("write worker brief");
        }
        let pid = child.id();
        self.children
            .lock()
            .map_err(|_| anyhow!("worker table poisoned"))?
            .insert(pid, child);

        info!(pid, log = %log_path.display(), "worker launched");
        Ok(WorkerHandle { pid })
    }

    fn is_alive(&self, handle: &WorkerHandle) -> bool {
        if let Some(alive) = self.poll_child(handle.pid) {
            return alive;
        }
        // Not spawned by this process (e.g. after a restart): check with signal 0.
        match i32::try_from(handle.pid) {
            Ok(raw) => matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM)),
            Err(_) => false,
        }
    }

    #[instrument(skip_all, fields(pid = handle.pid))]
    fn stop(&self, handle: &WorkerHandle) -> Result<()> {
        let raw = i32::try_from(handle.pid).context("worker pid out of range")?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => debug!("sent SIGTERM"),
            Err(Errno::ESRCH) => debug!("worker already gone"),
            Err(err) => return Err(anyhow!("stop worker {}: {err}", handle.pid)),
        }
        if let Ok(mut children) = self.children.lock()
            && let Some(mut child) = children.remove(&handle.pid)
        {
            let _ = child.wait();
        }
        Ok(())
    }
}
