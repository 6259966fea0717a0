//! Shared deterministic types for the controller core.
//!
//! These types define the contracts between the scheduler, the reconciler and
//! the external adapters. They hold no handles to external state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority tier from the tracker. Lower ordinal means more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Critical,
    Urgent,
    Normal,
    Low,
    Backlog,
}

impl Tier {
    /// Number of tiers; used to invert the ordinal for scoring.
    pub const COUNT: u32 = 5;

    pub fn ordinal(self) -> u32 {
        match self {
            Tier::Critical => 0,
            Tier::Urgent => 1,
            Tier::Normal => 2,
            Tier::Low => 3,
            Tier::Backlog => 4,
        }
    }

    /// Map a tracker priority number (0 = most urgent) onto a tier.
    ///
    /// Values past the last tier saturate to `Backlog`.
    pub fn from_ordinal(value: u32) -> Self {
        match value {
            0 => Tier::Critical,
            1 => Tier::Urgent,
            2 => Tier::Normal,
            3 => Tier::Low,
            _ => Tier::Backlog,
        }
    }
}

/// A unit of work offered by the tracker for the current scheduling cycle.
///
/// Candidates are fetched fresh every cycle and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub tier: Tier,
    /// Relative size estimate (story points or similar); larger is slower to ship.
    pub size: f64,
    pub tags: Vec<String>,
    /// Mutual-exclusion group; `None` never conflicts.
    pub conflict_domain: Option<String>,
    pub foundational: bool,
    /// Number of tasks this one blocks.
    pub blocks: u32,
    /// Number of open tasks blocking this one.
    pub blocked_by: u32,
    /// Description already constitutes a fully specified work packet.
    pub fully_specified: bool,
    /// Task needs an exclusive sequential reservation (e.g. a migration slot).
    pub needs_reservation: bool,
}

/// A candidate paired with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub candidate: Candidate,
    pub score: f64,
}

/// Full task payload used to brief a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// Lifecycle phase of a tracked task.
///
/// `Cleaned`, `Abandoned` and `Reverted` are terminal: a record that reaches
/// one of them is removed from the ledger in the same update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Selected,
    Planning,
    Executing,
    AwaitingReview,
    Merged,
    Cleaned,
    Abandoned,
    Reverted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Cleaned | Phase::Abandoned | Phase::Reverted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Selected => "selected",
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::AwaitingReview => "awaiting_review",
            Phase::Merged => "merged",
            Phase::Cleaned => "cleaned",
            Phase::Abandoned => "abandoned",
            Phase::Reverted => "reverted",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a review request (pull request) in the review system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRef {
    pub number: u64,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Opaque handle to a launched worker, persisted so recovery can check on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub pid: u32,
}

/// Persisted record of one in-flight task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub branch: String,
    pub workdir: String,
    pub phase: Phase,
    pub conflict_domain: Option<String>,
    pub review: Option<ReviewRef>,
    pub reservation: Option<u32>,
    pub worker: Option<WorkerHandle>,
    pub status: String,
    /// Start of the current attempt. Branch names repeat across attempts, so
    /// review requests opened before this belong to an earlier one.
    pub selected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Review lifecycle state as reported by the review system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewState {
    Open,
    Merged,
    Closed,
}

/// Outcome class of one automated check attached to a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Passed,
    Failed,
    Cancelled,
    Pending,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub state: CheckState,
}

/// Snapshot of a review request's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStatus {
    pub state: ReviewState,
    pub target_ref: String,
    pub checks: Vec<CheckResult>,
}
