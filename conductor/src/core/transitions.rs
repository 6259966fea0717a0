//! Per-task lifecycle state machine.
//!
//! Each non-terminal phase has a transition predicate evaluated against what
//! the reconciler observed this tick. Predicates are pure; gathering the
//! observations is the reconciler's job.
//!
//! ```text
//! Selected -> [Planning ->] Executing -> AwaitingReview -> Merged -> Cleaned
//!                 |              |               |
//!                 +--------------+---------------+--> Reverted (interrupt)
//!                                                +--> Abandoned (closed unmerged)
//! ```

use chrono::{DateTime, Utc};

use crate::core::types::{CheckState, Phase, ReviewRef, ReviewState, ReviewStatus};

/// Result of evaluating a phase predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Remain in the current phase with an updated status line.
    Stay(String),
    /// Move to a new phase.
    Advance { to: Phase, status: String },
}

impl Step {
    fn stay(status: impl Into<String>) -> Self {
        Step::Stay(status.into())
    }

    fn advance(to: Phase, status: impl Into<String>) -> Self {
        Step::Advance {
            to,
            status: status.into(),
        }
    }
}

/// Rules applied when a review is found merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    /// The only reference a review may merge into.
    pub base_ref: String,
    /// Treat a review with no checks at all as passing.
    pub allow_no_checks: bool,
}

/// Verdict of the merge gate for one review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    Open,
    Closed,
    WrongTarget { expected: String, actual: String },
    ChecksFailing(Vec<String>),
    ChecksPending(Vec<String>),
    NoChecks,
}

impl GateVerdict {
    pub fn describe(&self) -> String {
        match self {
            GateVerdict::Pass => "merged".to_string(),
            GateVerdict::Open => "waiting for review".to_string(),
            GateVerdict::Closed => "review closed without merge".to_string(),
            GateVerdict::WrongTarget { expected, actual } => {
                format!("merged into {actual}, expected {expected}")
            }
            GateVerdict::ChecksFailing(names) => format!("checks failing: {}", names.join(", ")),
            GateVerdict::ChecksPending(names) => format!("checks pending: {}", names.join(", ")),
            GateVerdict::NoChecks => "merged without checks (not allowed)".to_string(),
        }
    }
}

/// Evaluate whether a review counts as a verified merge.
///
/// All must hold: the review is merged, it targets the base reference, and no
/// check is failing, cancelled or pending. An empty check list passes only
/// when the policy allows it.
pub fn merge_gate(status: &ReviewStatus, policy: &GatePolicy) -> GateVerdict {
    match status.state {
        ReviewState::Open => return GateVerdict::Open,
        ReviewState::Closed => return GateVerdict::Closed,
        ReviewState::Merged => {}
    }
    if status.target_ref != policy.base_ref {
        return GateVerdict::WrongTarget {
            expected: policy.base_ref.clone(),
            actual: status.target_ref.clone(),
        };
    }
    if status.checks.is_empty() {
        return if policy.allow_no_checks {
            GateVerdict::Pass
        } else {
            GateVerdict::NoChecks
        };
    }
    let failing: Vec<String> = status
        .checks
        .iter()
        .filter(|c| matches!(c.state, CheckState::Failed | CheckState::Cancelled))
        .map(|c| c.name.clone())
        .collect();
    if !failing.is_empty() {
        return GateVerdict::ChecksFailing(failing);
    }
    let pending: Vec<String> = status
        .checks
        .iter()
        .filter(|c| c.state == CheckState::Pending)
        .map(|c| c.name.clone())
        .collect();
    if !pending.is_empty() {
        return GateVerdict::ChecksPending(pending);
    }
    GateVerdict::Pass
}

/// Phase entered right after a worker is launched.
pub fn launch_phase(planning: bool) -> Phase {
    if planning {
        Phase::Planning
    } else {
        Phase::Executing
    }
}

/// Whether `review` was opened during the attempt that began at `selected_at`.
pub fn belongs_to_attempt(review: &ReviewRef, selected_at: DateTime<Utc>) -> bool {
    review.created_at >= selected_at
}

/// `Planning`: advance when the plan is approved, or skip ahead if a review
/// already exists.
pub fn on_planning(plan_approved: bool, review: Option<&ReviewRef>) -> Step {
    if let Some(review) = review {
        return Step::advance(Phase::AwaitingReview, format!("review #{} opened", review.number));
    }
    if plan_approved {
        return Step::advance(Phase::Executing, "plan approved");
    }
    Step::stay("planning")
}

/// `Executing`: advance once a review request is associated with the branch.
pub fn on_executing(review: Option<&ReviewRef>, worker_alive: bool) -> Step {
    match review {
        Some(review) => {
            Step::advance(Phase::AwaitingReview, format!("review #{} opened", review.number))
        }
        None if worker_alive => Step::stay("worker running"),
        None => Step::stay("worker exited without review"),
    }
}

/// `AwaitingReview`: merge, abandon, or keep waiting per the gate verdict.
pub fn on_awaiting_review(status: &ReviewStatus, policy: &GatePolicy) -> Step {
    let verdict = merge_gate(status, policy);
    match verdict {
        GateVerdict::Pass => Step::advance(Phase::Merged, verdict.describe()),
        GateVerdict::Closed => Step::advance(Phase::Abandoned, verdict.describe()),
        _ => Step::stay(verdict.describe()),
    }
}

/// `Merged`: clean up, unless a human must confirm and the worker host is
/// still open.
pub fn on_merged(confirm_required: bool, host_alive: bool) -> Step {
    if confirm_required && host_alive {
        return Step::stay("merged, waiting for confirmation");
    }
    Step::advance(Phase::Cleaned, "cleaned")
}

/// True if `from -> to` is an edge of the lifecycle.
pub fn is_allowed(from: Phase, to: Phase) -> bool {
    use Phase::{AwaitingReview, Cleaned, Executing, Merged, Planning, Reverted, Selected};
    match (from, to) {
        (Selected, Planning | Executing) => true,
        (Planning, Executing | AwaitingReview) => true,
        (Executing, AwaitingReview) => true,
        (AwaitingReview, Merged | Phase::Abandoned) => true,
        (Merged, Cleaned) => true,
        (from, Reverted) => !from.is_terminal(),
        _ => false,
    }
}
