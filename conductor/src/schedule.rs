//! Filling free slots with new tasks.
//!
//! Order of a scheduling pass:
//! 1. fetch fresh candidates and drop the ones already tracked;
//! 2. rank them, then pick a batch automatically or validate a manual pick;
//! 3. snapshot the highest issued reservation once and assign the batch's
//!    numbers before anything launches;
//! 4. per task: record it, create its workspace, launch its worker.
//!
//! A task whose launch fails is rolled back; the rest of the batch proceeds.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::controller::Controller;
use crate::core::ledger::Ledger;
use crate::core::naming::{branch_name, workspace_slug};
use crate::core::reservation::{assign_reservations, highest_issued};
use crate::core::scorer::rank;
use crate::core::selector::{Rejection, select_batch, validate_manual};
use crate::core::transitions::launch_phase;
use crate::core::types::{Candidate, Phase, Scored, TaskRecord, WorkerHandle};
use crate::io::config::ConductorConfig;
use crate::io::launcher::{WorkerMode, WorkerRequest};
use crate::io::picker::Picker;
use crate::io::tracker::{CandidateFilter, TaskSource, TaskStatus};
use crate::retry::Retry;

/// A manually requested task that could not be scheduled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("task {0} is not a current candidate")]
    UnknownCandidate(String),
    #[error("task {0} is already tracked")]
    AlreadyTracked(String),
    #[error("task {id} conflicts with active work in domain '{domain}'")]
    DomainClaimed { id: String, domain: String },
    #[error("no free slot left for task {0}")]
    NoFreeSlot(String),
    #[error("task {0} was requested more than once")]
    Duplicate(String),
}

impl SelectionError {
    fn from_rejection(id: String, rejection: Rejection) -> Self {
        match rejection {
            Rejection::UnknownCandidate => SelectionError::UnknownCandidate(id),
            Rejection::AlreadyTracked => SelectionError::AlreadyTracked(id),
            Rejection::DomainClaimed(domain) => SelectionError::DomainClaimed { id, domain },
            Rejection::NoFreeSlot => SelectionError::NoFreeSlot(id),
            Rejection::Duplicate => SelectionError::Duplicate(id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleReport {
    /// Untracked candidates seen, or `None` when none were fetched.
    pub candidates: Option<usize>,
    pub launched: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub rejected: Vec<SelectionError>,
}

/// Fetch, filter and rank candidates without side effects.
pub fn ranked_candidates(ctl: &Controller<'_>) -> Result<Vec<Scored>> {
    rank_untracked(ctl.services.tasks, &ctl.config, ctl.ledger.current(), &ctl.retry)
}

/// Rank the tracker's candidates that `ledger` does not already track.
pub fn rank_untracked(
    tasks: &dyn TaskSource,
    config: &ConductorConfig,
    ledger: &Ledger,
    retry: &Retry,
) -> Result<Vec<Scored>> {
    let filter = CandidateFilter {
        status: config.tracker.candidate_status.clone(),
    };
    let candidates = retry.run("list candidates", || tasks.list_candidates(&filter))?;
    let untracked: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| ledger.get(&c.id).is_none())
        .collect();
    Ok(rank(untracked, &config.scoring))
}

/// Run one scheduling pass.
///
/// With a `picker`, the operator's choice replaces automatic selection; a
/// timed-out prompt schedules nothing.
#[instrument(skip_all, fields(cap = ctl.config.cap))]
pub fn schedule(ctl: &mut Controller<'_>, picker: Option<&dyn Picker>) -> Result<ScheduleReport> {
    let mut report = ScheduleReport::default();
    let occupancy = ctl.ledger.current().occupancy();
    let free = occupancy.free_slots(ctl.config.cap);
    if free == 0 {
        debug!("no free slots");
        return Ok(report);
    }

    let ranked = ranked_candidates(ctl)?;
    report.candidates = Some(ranked.len());
    if ranked.is_empty() {
        debug!("no candidates");
        return Ok(report);
    }

    let batch = match picker {
        None => select_batch(&ranked, &occupancy, ctl.config.cap),
        Some(picker) => {
            let timeout = Duration::from_secs(ctl.config.selection_timeout_secs);
            let Some(requested) = picker.pick(&ranked, free, timeout)? else {
                return Ok(report);
            };
            let candidates: Vec<Candidate> =
                ranked.iter().map(|s| s.candidate.clone()).collect();
            let selection = validate_manual(&requested, &candidates, &occupancy, ctl.config.cap);
            for (id, rejection) in selection.rejected {
                let err = SelectionError::from_rejection(id, rejection);
                warn!(err = %err, "manual selection rejected");
                report.rejected.push(err);
            }
            selection.accepted
        }
    };
    if batch.is_empty() {
        return Ok(report);
    }

    let highest = highest_reservation(ctl)?;
    let reservations = assign_reservations(&batch, highest);
    info!(
        batch = batch.len(),
        highest,
        reserved = reservations.len(),
        "scheduling batch"
    );

    for candidate in &batch {
        let reservation = reservations.get(&candidate.id).copied();
        match start_task(ctl, candidate, reservation) {
            Ok(()) => report.launched.push(candidate.id.clone()),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(task_id = %candidate.id, err = %reason, "launch failed, task rolled back");
                report.failed.push((candidate.id.clone(), reason));
            }
        }
    }
    Ok(report)
}

/// Highest reservation already issued anywhere: files in the main checkout,
/// files in every workspace, and numbers held by tracked tasks.
fn highest_reservation(ctl: &Controller<'_>) -> Result<u32> {
    let vcs = ctl.services.vcs;
    let mut roots: BTreeSet<PathBuf> = ctl
        .retry
        .run("list workspaces", || vcs.list_workspaces())?
        .into_iter()
        .collect();
    roots.insert(ctl.paths.root.clone());
    let ledger = ctl.ledger.current();
    roots.extend(ledger.tasks.values().map(|r| ctl.paths.resolve(&r.workdir)));
    let roots: Vec<PathBuf> = roots.into_iter().collect();
    let scanned = ctl.scanner.highest_in(&roots)?;
    Ok(highest_issued(ledger.reservations().chain([scanned])))
}

#[instrument(skip_all, fields(task_id = %candidate.id))]
fn start_task(ctl: &mut Controller<'_>, candidate: &Candidate, reservation: Option<u32>) -> Result<()> {
    let slug = workspace_slug(&candidate.id, &candidate.title);
    let branch = branch_name(&ctl.config.branch_prefix, &slug);
    let workdir = ctl.workspace_path(&slug);
    let record = TaskRecord {
        id: candidate.id.clone(),
        title: candidate.title.clone(),
        slug,
        branch,
        workdir: workdir.display().to_string(),
        phase: Phase::Selected,
        conflict_domain: candidate.conflict_domain.clone(),
        review: None,
        reservation,
        worker: None,
        status: "selected".to_string(),
        selected_at: ctl.now(),
        updated_at: ctl.now(),
    };
    ctl.persist(record.clone())?;

    let mut created = Created::default();
    match launch(ctl, record, &mut created) {
        Ok(phase) => {
            info!(phase = %phase, reservation = ?reservation, "task started");
            Ok(())
        }
        Err(err) => {
            roll_back(ctl, &candidate.id, &created);
            Err(err)
        }
    }
}

/// What `launch` changed before failing, so rollback undoes only that.
#[derive(Debug, Default)]
struct Created {
    workspace: Option<PathBuf>,
    branch: Option<String>,
    worker: Option<WorkerHandle>,
}

fn launch(ctl: &mut Controller<'_>, mut record: TaskRecord, created: &mut Created) -> Result<Phase> {
    let services = ctl.services;
    let workdir = PathBuf::from(&record.workdir);
    if services.vcs.workspace_exists(&workdir) {
        info!(workdir = %workdir.display(), "resuming in existing workspace");
    } else {
        let branch_existed = ctl
            .retry
            .run("check branch", || services.vcs.branch_exists(&record.branch))?;
        ctl.retry.run("create workspace", || {
            services
                .vcs
                .create_workspace(&workdir, &record.branch, &ctl.config.base_ref)
        })?;
        created.workspace = Some(workdir.clone());
        if !branch_existed {
            created.branch = Some(record.branch.clone());
        }
    }

    let detail = ctl
        .retry
        .run(&format!("get task {}", record.id), || services.tasks.get_task(&record.id))?;
    let mode = if ctl.config.planning {
        WorkerMode::Planning
    } else {
        WorkerMode::Executing
    };
    let request = WorkerRequest {
        task_id: record.id.clone(),
        title: detail.title,
        description: detail.description,
        branch: record.branch.clone(),
        workdir,
        base_ref: ctl.config.base_ref.clone(),
        reservation: record.reservation,
        mode,
        plan_marker: ctl.config.worker.plan_approved_marker.clone(),
    };
    let handle = services.launcher.launch(&request)?;
    created.worker = Some(handle.clone());
    record.worker = Some(handle);
    ctl.persist(record.clone())?;

    ctl.set_tracker_status(&record.id, TaskStatus::InProgress)?;

    let phase = launch_phase(ctl.config.planning);
    record.phase = phase;
    record.status = "worker launched".to_string();
    ctl.persist(record)?;
    Ok(phase)
}

/// Undo a failed launch. Best effort: every step is attempted.
fn roll_back(ctl: &mut Controller<'_>, id: &str, created: &Created) {
    let services = ctl.services;
    if let Some(worker) = &created.worker
        && let Err(err) = services.launcher.stop(worker)
    {
        warn!(task_id = %id, err = %format!("{err:#}"), "rollback: stop worker failed");
    }
    if let Some(workspace) = &created.workspace
        && let Err(err) = services.vcs.remove_workspace(workspace)
    {
        warn!(task_id = %id, err = %format!("{err:#}"), "rollback: remove workspace failed");
    }
    if let Some(branch) = &created.branch
        && let Err(err) = services.vcs.delete_branch(branch)
    {
        warn!(task_id = %id, err = %format!("{err:#}"), "rollback: delete branch failed");
    }
    if let Err(err) = services.tasks.set_task_status(id, TaskStatus::Open) {
        warn!(task_id = %id, err = %format!("{err:#}"), "rollback: reset tracker status failed");
    }
    if let Err(err) = ctl.forget(id) {
        warn!(task_id = %id, err = %format!("{err:#}"), "rollback: remove record failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Tier;
    use crate::test_support::{Fakes, ScriptedPicker, candidate, candidate_in, record};

    #[test]
    fn urgent_unblocked_task_wins_the_only_slot() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        ctl.config.cap = 1;
        let mut urgent = candidate("1");
        urgent.tier = Tier::Urgent;
        let mut low = candidate("2");
        low.tier = Tier::Low;
        low.blocked_by = 2;
        fakes.tasks.add(urgent);
        fakes.tasks.add(low);

        let report = schedule(&mut ctl, None).expect("schedule");

        assert_eq!(report.launched, vec!["1".to_string()]);
        let ledger = ctl.snapshot();
        let rec = ledger.get("1").expect("tracked");
        assert_eq!(rec.phase, Phase::Executing);
        assert_eq!(rec.branch, "conductor/1-1-title");
        assert!(rec.worker.is_some());
        assert_eq!(fakes.tasks.status_of("1").as_deref(), Some("in_progress"));
        assert_eq!(fakes.launcher.launched_ids(), vec!["1".to_string()]);
    }

    #[test]
    fn shared_domain_schedules_only_one() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        ctl.config.cap = 2;
        fakes.tasks.add(candidate_in("a", "ui"));
        fakes.tasks.add(candidate_in("b", "ui"));

        let report = schedule(&mut ctl, None).expect("schedule");

        assert_eq!(report.launched.len(), 1);
        assert_eq!(ctl.snapshot().active_count(), 1);
    }

    #[test]
    fn batch_reservations_follow_the_highest_issued_number() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        ctl.config.cap = 3;
        let migrations = fakes.root().join("migrations");
        std::fs::create_dir_all(&migrations).expect("mkdir");
        std::fs::write(migrations.join("0005_init.sql"), "").expect("write");
        for id in ["a", "b", "c"] {
            let mut c = candidate(id);
            c.needs_reservation = true;
            fakes.tasks.add(c);
        }

        schedule(&mut ctl, None).expect("schedule");

        let mut numbers: Vec<u32> = ctl.snapshot().reservations().collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![6, 7, 8]);
        let mut briefed: Vec<u32> = fakes
            .launcher
            .requests()
            .iter()
            .filter_map(|r| r.reservation)
            .collect();
        briefed.sort_unstable();
        assert_eq!(briefed, vec![6, 7, 8]);
    }

    #[test]
    fn reservations_held_in_the_ledger_count() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        ctl.config.cap = 2;
        let mut held = record("old", Phase::Executing);
        held.reservation = Some(11);
        ctl.persist(held).expect("persist");
        let mut c = candidate("new");
        c.needs_reservation = true;
        fakes.tasks.add(c);

        schedule(&mut ctl, None).expect("schedule");

        assert_eq!(ctl.snapshot().get("new").expect("tracked").reservation, Some(12));
    }

    #[test]
    fn failed_launch_rolls_back_and_the_batch_continues() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        ctl.config.cap = 2;
        fakes.tasks.add(candidate("bad"));
        fakes.tasks.add(candidate("good"));
        fakes.launcher.fail_for("bad");

        let report = schedule(&mut ctl, None).expect("schedule");

        assert_eq!(report.launched, vec!["good".to_string()]);
        assert_eq!(report.failed.len(), 1);
        let ledger = ctl.snapshot();
        assert!(ledger.get("bad").is_none());
        assert_eq!(fakes.tasks.status_of("bad").as_deref(), Some("open"));
        assert!(!fakes.vcs.has_branch("conductor/bad-bad-title"));
        assert!(!fakes.vcs.has_workspace(&ctl.workspace_path("bad-bad-title")));
    }

    #[test]
    fn manual_selection_is_validated() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        ctl.config.cap = 2;
        let mut running = record("r", Phase::Executing);
        running.conflict_domain = Some("ui".to_string());
        ctl.persist(running).expect("persist");
        fakes.tasks.add(candidate_in("x", "ui"));
        fakes.tasks.add(candidate("y"));
        let picker = ScriptedPicker::new(vec![Some(vec![
            "x".to_string(),
            "y".to_string(),
            "zz".to_string(),
        ])]);

        let report = schedule(&mut ctl, Some(&picker)).expect("schedule");

        assert_eq!(report.launched, vec!["y".to_string()]);
        assert!(report.rejected.contains(&SelectionError::DomainClaimed {
            id: "x".to_string(),
            domain: "ui".to_string(),
        }));
        assert!(
            report
                .rejected
                .contains(&SelectionError::UnknownCandidate("zz".to_string()))
        );
    }

    #[test]
    fn timed_out_pick_schedules_nothing() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        fakes.tasks.add(candidate("1"));
        let picker = ScriptedPicker::new(vec![None]);

        let report = schedule(&mut ctl, Some(&picker)).expect("schedule");

        assert!(report.launched.is_empty());
        assert_eq!(report.candidates, Some(1));
        assert!(ctl.snapshot().tasks.is_empty());
    }

    #[test]
    fn planning_mode_starts_in_planning() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        ctl.config.planning = true;
        fakes.tasks.add(candidate("p"));

        schedule(&mut ctl, None).expect("schedule");

        assert_eq!(ctl.snapshot().get("p").expect("tracked").phase, Phase::Planning);
        assert_eq!(fakes.launcher.requests()[0].mode, WorkerMode::Planning);
    }
}
