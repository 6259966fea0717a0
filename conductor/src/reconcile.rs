//! Advancing tracked tasks against external state.
//!
//! Each tick, every non-terminal record is evaluated on its own: gather the
//! observations its phase needs, ask the pure predicate in
//! [`crate::core::transitions`] what to do, apply and persist the result. A
//! failure for one task is logged and skipped; the others still advance.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::cleanup::cleanup_task;
use crate::controller::Controller;
use crate::core::transitions::{
    Step, is_allowed, launch_phase, on_awaiting_review, on_executing, on_merged, on_planning,
};
use crate::core::types::{Phase, ReviewRef, TaskRecord};
use crate::io::tracker::TaskStatus;

/// Upper bound on transitions applied to one task in a single tick.
const MAX_STEPS_PER_TICK: usize = 8;

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: String,
    pub from: Phase,
    pub to: Phase,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub transitions: Vec<Transition>,
    /// Tasks that could not be advanced this tick, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Reconcile every active task.
pub fn reconcile_all(ctl: &mut Controller<'_>) -> ReconcileReport {
    let ids: Vec<String> = ctl.snapshot().active().map(|r| r.id.clone()).collect();
    let mut report = ReconcileReport::default();
    for id in ids {
        match reconcile_task(ctl, &id) {
            Ok(mut transitions) => report.transitions.append(&mut transitions),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(task_id = %id, err = %reason, "task not advanced this tick");
                report.failed.push((id, reason));
            }
        }
    }
    report
}

/// Advance one task as far as current observations allow.
///
/// Every step is persisted before the next is evaluated, so a task can move
/// through several phases in one tick (a review that is already merged when
/// first seen, for example).
#[instrument(skip_all, fields(task_id = %id))]
pub fn reconcile_task(ctl: &mut Controller<'_>, id: &str) -> Result<Vec<Transition>> {
    let mut applied = Vec::new();
    for _ in 0..MAX_STEPS_PER_TICK {
        let Some(mut record) = ctl.ledger.current().get(id).cloned() else {
            break;
        };
        if record.phase.is_terminal() {
            break;
        }
        let from = record.phase;
        match evaluate(ctl, &mut record)? {
            Step::Stay(status) => {
                if status != record.status || Some(&record) != ctl.ledger.current().get(id) {
                    debug!(phase = %from, status = %status, "status updated");
                    record.status = status;
                    ctl.persist(record)?;
                }
                break;
            }
            Step::Advance { to, status } => {
                if !is_allowed(from, to) {
                    return Err(anyhow!("illegal transition {from} -> {to}"));
                }
                apply(ctl, record, to, &status)?;
                info!(from = %from, to = %to, status = %status, "phase advanced");
                applied.push(Transition {
                    id: id.to_string(),
                    from,
                    to,
                    status,
                });
                if to.is_terminal() {
                    break;
                }
            }
        }
    }
    Ok(applied)
}

/// Gather what `record`'s phase needs and evaluate its predicate.
///
/// A newly found review is stored on `record`.
fn evaluate(ctl: &Controller<'_>, record: &mut TaskRecord) -> Result<Step> {
    let launcher = ctl.services.launcher;
    let worker_alive = record
        .worker
        .as_ref()
        .is_some_and(|worker| launcher.is_alive(worker));
    let step = match record.phase {
        Phase::Selected => match record.worker {
            Some(_) => Step::Advance {
                to: launch_phase(ctl.config.planning),
                status: "worker launched".to_string(),
            },
            None => Step::Stay("waiting for launch".to_string()),
        },
        Phase::Planning => {
            let marker = ctl
                .paths
                .resolve(&record.workdir)
                .join(&ctl.config.worker.plan_approved_marker);
            let review = lookup_review(ctl, record)?;
            on_planning(marker.exists(), review.as_ref())
        }
        Phase::Executing => {
            let review = lookup_review(ctl, record)?;
            on_executing(review.as_ref(), worker_alive)
        }
        Phase::AwaitingReview => {
            let review = match lookup_review(ctl, record)? {
                Some(review) => review,
                None => return Ok(Step::Stay("review request missing".to_string())),
            };
            let reviews = ctl.services.review;
            let status = ctl
                .retry
                .run(&format!("review status #{}", review.number), || {
                    reviews.request_status(&review)
                })?;
            on_awaiting_review(&status, &ctl.config.gate_policy())
        }
        Phase::Merged => on_merged(ctl.config.confirm_cleanup, worker_alive),
        Phase::Cleaned | Phase::Abandoned | Phase::Reverted => {
            Step::Stay(record.status.clone())
        }
    };
    Ok(step)
}

/// The record's review, looking it up by branch when not yet known.
fn lookup_review(ctl: &Controller<'_>, record: &mut TaskRecord) -> Result<Option<ReviewRef>> {
    if record.review.is_some() {
        return Ok(record.review.clone());
    }
    let found = ctl.find_current_review(record)?;
    if let Some(review) = &found {
        debug!(number = review.number, url = %review.url, "review request found");
        record.review = Some(review.clone());
    }
    Ok(found)
}

fn apply(ctl: &mut Controller<'_>, mut record: TaskRecord, to: Phase, status: &str) -> Result<()> {
    match to {
        Phase::Cleaned => cleanup_task(ctl, &record, TaskStatus::Closed),
        Phase::Abandoned => cleanup_task(ctl, &record, TaskStatus::Open),
        _ => {
            record.phase = to;
            record.status = status.to_string();
            ctl.persist(record)
        }
    }
}
