//! Releasing and rolling back tasks.
//!
//! Two ways out of the ledger:
//! - cleanup removes the workspace, the branch and the record;
//! - revert removes only the record and keeps workspace and branch so the
//!   work can be resumed.
//!
//! Both are safe to repeat.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::controller::Controller;
use crate::core::types::{Phase, TaskRecord};
use crate::io::tracker::TaskStatus;

/// Stop the worker (if still alive) and remove workspace and branch.
pub fn release_workspace(ctl: &Controller<'_>, record: &TaskRecord) -> Result<()> {
    let services = ctl.services;
    if let Some(worker) = &record.worker
        && services.launcher.is_alive(worker)
    {
        services.launcher.stop(worker)?;
    }
    let workdir = ctl.paths.resolve(&record.workdir);
    ctl.retry.run(&format!("remove workspace of {}", record.id), || {
        services.vcs.remove_workspace(&workdir)
    })?;
    ctl.retry.run(&format!("delete branch {}", record.branch), || {
        services.vcs.delete_branch(&record.branch)
    })?;
    Ok(())
}

/// Fully clean up a task: workspace, branch, tracker status, record.
///
/// The record is removed last, so a failure part way through leaves it in
/// place for the next attempt.
#[instrument(skip_all, fields(task_id = %record.id, status = status.as_str()))]
pub fn cleanup_task(ctl: &mut Controller<'_>, record: &TaskRecord, status: TaskStatus) -> Result<()> {
    release_workspace(ctl, record)?;
    ctl.set_tracker_status(&record.id, status)?;
    ctl.forget(&record.id)?;
    debug!("task cleaned up");
    Ok(())
}

/// Roll a task back for later resumption.
///
/// The worker is stopped and the tracker status reset, but the workspace and
/// branch are left untouched.
#[instrument(skip_all, fields(task_id = %record.id, phase = %record.phase))]
pub fn revert_task(ctl: &mut Controller<'_>, record: &TaskRecord) -> Result<()> {
    if let Some(worker) = &record.worker
        && let Err(err) = ctl.services.launcher.stop(worker)
    {
        warn!(err = %format!("{err:#}"), "failed to stop worker");
    }
    if let Err(err) = ctl.set_tracker_status(&record.id, TaskStatus::Open) {
        warn!(err = %format!("{err:#}"), "failed to reset tracker status");
    }
    ctl.forget(&record.id)?;
    info!(from = %record.phase, to = %Phase::Reverted, workdir = %record.workdir, "task reverted, workspace kept");
    Ok(())
}

/// Revert every tracked task. Returns the ids reverted.
pub fn revert_all(ctl: &mut Controller<'_>) -> Vec<String> {
    let records: Vec<TaskRecord> = ctl.snapshot().active().cloned().collect();
    let mut reverted = Vec::new();
    for record in records {
        match revert_task(ctl, &record) {
            Ok(()) => reverted.push(record.id),
            Err(err) => warn!(task_id = %record.id, err = %format!("{err:#}"), "revert failed"),
        }
    }
    reverted
}
