//! Startup reconciliation of a possibly stale ledger.
//!
//! Runs once before the loop. For each tracked task, in order:
//! 1. branch or workspace gone: full cleanup;
//! 2. review merged or closed: full cleanup;
//! 3. worker no longer alive: drop the record but keep workspace and branch,
//!    so the work can be resumed by hand;
//! 4. otherwise keep tracking it.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::cleanup::cleanup_task;
use crate::controller::Controller;
use crate::core::types::{ReviewState, TaskRecord};
use crate::io::tracker::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staleness {
    Missing,
    ReviewFinished(ReviewState),
    Orphaned,
    Live,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Fully cleaned up.
    pub cleaned: Vec<String>,
    /// Record removed, workspace and branch kept.
    pub detached: Vec<String>,
    /// Still tracked.
    pub kept: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl PruneReport {
    pub fn changed(&self) -> bool {
        !self.cleaned.is_empty() || !self.detached.is_empty()
    }
}

/// Prune ledger entries that no longer correspond to in-flight work.
///
/// Running it again on an already-pruned ledger changes nothing.
#[instrument(skip_all)]
pub fn prune_stale(ctl: &mut Controller<'_>) -> PruneReport {
    let records: Vec<TaskRecord> = ctl.snapshot().tasks.into_values().collect();
    let mut report = PruneReport::default();
    for record in records {
        let outcome = match classify(ctl, &record) {
            Ok(staleness) => prune_one(ctl, &record, staleness).map(|()| staleness),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(Staleness::Missing | Staleness::ReviewFinished(_)) => report.cleaned.push(record.id),
            Ok(Staleness::Orphaned) => report.detached.push(record.id),
            Ok(Staleness::Live) => report.kept.push(record.id),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(task_id = %record.id, err = %reason, "prune failed, record kept");
                report.failed.push((record.id, reason));
            }
        }
    }
    info!(
        cleaned = report.cleaned.len(),
        detached = report.detached.len(),
        kept = report.kept.len(),
        failed = report.failed.len(),
        "stale pruning done"
    );
    report
}

fn classify(ctl: &Controller<'_>, record: &TaskRecord) -> Result<Staleness> {
    let services = ctl.services;
    let workdir = ctl.paths.resolve(&record.workdir);
    let branch_exists = ctl
        .retry
        .run(&format!("check branch {}", record.branch), || {
            services.vcs.branch_exists(&record.branch)
        })?;
    if !branch_exists || !services.vcs.workspace_exists(&workdir) {
        return Ok(Staleness::Missing);
    }

    let review = match &record.review {
        Some(review) => Some(review.clone()),
        None => ctl.find_current_review(record)?,
    };
    if let Some(review) = review {
        let status = ctl
            .retry
            .run(&format!("review status #{}", review.number), || {
                services.review.request_status(&review)
            })?;
        if status.state != ReviewState::Open {
            return Ok(Staleness::ReviewFinished(status.state));
        }
    }

    let alive = record
        .worker
        .as_ref()
        .is_some_and(|worker| services.launcher.is_alive(worker));
    if !alive {
        return Ok(Staleness::Orphaned);
    }
    Ok(Staleness::Live)
}

fn prune_one(ctl: &mut Controller<'_>, record: &TaskRecord, staleness: Staleness) -> Result<()> {
    match staleness {
        Staleness::Missing => {
            info!(task_id = %record.id, "branch or workspace gone, cleaning up");
            cleanup_task(ctl, record, TaskStatus::Open)
        }
        Staleness::ReviewFinished(state) => {
            info!(task_id = %record.id, state = ?state, "review finished, cleaning up");
            let status = if state == ReviewState::Merged {
                TaskStatus::Closed
            } else {
                TaskStatus::Open
            };
            cleanup_task(ctl, record, status)
        }
        Staleness::Orphaned => {
            info!(task_id = %record.id, workdir = %record.workdir, "worker gone, keeping workspace for resumption");
            ctl.forget(&record.id)
        }
        Staleness::Live => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Phase, ReviewStatus, WorkerHandle};
    use crate::test_support::{Fakes, candidate, record, review_ref};

    #[test]
    fn deleted_branch_is_pruned_without_leaving_a_workspace() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        let rec = record("1", Phase::Executing);
        fakes.seed_workspace(&ctl, &rec);
        fakes.vcs.drop_branch(&rec.branch);
        fakes.tasks.add(candidate("1"));
        ctl.persist(rec.clone()).expect("persist");

        let report = prune_stale(&mut ctl);

        assert_eq!(report.cleaned, vec!["1".to_string()]);
        assert!(ctl.snapshot().tasks.is_empty());
        assert!(!fakes.vcs.has_workspace(&ctl.paths.resolve(&rec.workdir)));
    }

    #[test]
    fn orphaned_task_keeps_its_workspace() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        let mut rec = record("2", Phase::Executing);
        rec.worker = Some(WorkerHandle { pid: 77 });
        fakes.seed_workspace(&ctl, &rec);
        ctl.persist(rec.clone()).expect("persist");

        let report = prune_stale(&mut ctl);

        assert_eq!(report.detached, vec!["2".to_string()]);
        assert!(ctl.snapshot().tasks.is_empty());
        assert!(fakes.vcs.has_workspace(&ctl.paths.resolve(&rec.workdir)));
        assert!(fakes.vcs.has_branch(&rec.branch));
    }

    #[test]
    fn merged_review_is_cleaned_and_closed() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        let mut rec = record("3", Phase::AwaitingReview);
        let review = review_ref(8);
        rec.review = Some(review.clone());
        rec.worker = Some(WorkerHandle { pid: 78 });
        fakes.launcher.set_alive(78, true);
        fakes.seed_workspace(&ctl, &rec);
        fakes.tasks.add(candidate("3"));
        fakes.review.open_request(
            &rec.branch,
            review,
            ReviewStatus {
                state: ReviewState::Merged,
                target_ref: "main".to_string(),
                checks: Vec::new(),
            },
        );
        ctl.persist(rec.clone()).expect("persist");

        let report = prune_stale(&mut ctl);

        assert_eq!(report.cleaned, vec!["3".to_string()]);
        assert!(!fakes.vcs.has_branch(&rec.branch));
        assert_eq!(fakes.tasks.status_of("3").as_deref(), Some("closed"));
    }

    #[test]
    fn closed_review_is_cleaned_and_reopened() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        let mut rec = record("6", Phase::AwaitingReview);
        let review = review_ref(13);
        rec.review = Some(review.clone());
        rec.worker = Some(WorkerHandle { pid: 80 });
        fakes.launcher.set_alive(80, true);
        fakes.seed_workspace(&ctl, &rec);
        fakes.tasks.add(candidate("6"));
        fakes.tasks.set_status("6", "in_progress");
        fakes.review.open_request(
            &rec.branch,
            review,
            ReviewStatus {
                state: ReviewState::Closed,
                target_ref: "main".to_string(),
                checks: Vec::new(),
            },
        );
        ctl.persist(rec.clone()).expect("persist");

        let report = prune_stale(&mut ctl);

        assert_eq!(report.cleaned, vec!["6".to_string()]);
        assert!(!fakes.vcs.has_branch(&rec.branch));
        assert_eq!(fakes.launcher.stopped(), vec![80]);
        assert_eq!(fakes.tasks.status_of("6").as_deref(), Some("open"));
        assert!(ctl.snapshot().tasks.is_empty());
    }

    #[test]
    fn closed_review_from_an_earlier_attempt_does_not_prune_a_live_task() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        let mut rec = record("7", Phase::Executing);
        rec.worker = Some(WorkerHandle { pid: 81 });
        fakes.launcher.set_alive(81, true);
        fakes.seed_workspace(&ctl, &rec);
        let mut earlier = review_ref(14);
        earlier.created_at = rec.selected_at - chrono::TimeDelta::days(2);
        fakes.review.open_request(
            &rec.branch,
            earlier,
            ReviewStatus {
                state: ReviewState::Closed,
                target_ref: "main".to_string(),
                checks: Vec::new(),
            },
        );
        ctl.persist(rec.clone()).expect("persist");

        let report = prune_stale(&mut ctl);

        assert_eq!(report.kept, vec!["7".to_string()]);
        assert!(fakes.vcs.has_branch(&rec.branch));
        assert_eq!(ctl.snapshot().get("7").expect("kept").review, None);
    }

    #[test]
    fn live_task_is_kept_and_second_prune_changes_nothing() {
        let fakes = Fakes::new();
        let mut ctl = fakes.controller();
        let mut live = record("4", Phase::Executing);
        live.worker = Some(WorkerHandle { pid: 79 });
        fakes.launcher.set_alive(79, true);
        fakes.seed_workspace(&ctl, &live);
        let gone = record("5", Phase::Executing);
        ctl.persist(live).expect("persist");
        ctl.persist(gone).expect("persist");

        let first = prune_stale(&mut ctl);
        let after_first = ctl.snapshot();
        let second = prune_stale(&mut ctl);

        assert_eq!(first.kept, vec!["4".to_string()]);
        assert_eq!(first.cleaned, vec!["5".to_string()]);
        assert!(!second.changed());
        assert_eq!(ctl.snapshot(), after_first);
    }
}
