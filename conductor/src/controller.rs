//! The collaborator bundle shared by scheduling, reconciliation and recovery.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::transitions::belongs_to_attempt;

use crate::core::ledger::{Ledger, LedgerChange};
use crate::core::types::{ReviewRef, ReviewState, TaskRecord};
use crate::io::config::ConductorConfig;
use crate::io::git::VersionControl;
use crate::io::init::ConductorPaths;
use crate::io::launcher::WorkerLauncher;
use crate::io::ledger_store::LedgerStore;
use crate::io::reservation::ReservationScanner;
use crate::io::review::ReviewSystem;
use crate::io::tracker::{TaskSource, TaskStatus};
use crate::retry::{Retry, RetryPolicy};

/// External systems the controller talks to.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub tasks: &'a dyn TaskSource,
    pub review: &'a dyn ReviewSystem,
    pub vcs: &'a dyn VersionControl,
    pub launcher: &'a dyn WorkerLauncher,
}

/// Everything one controller session needs.
///
/// The ledger store is owned here and is the only writer of the ledger.
pub struct Controller<'a> {
    pub config: ConductorConfig,
    pub paths: ConductorPaths,
    pub services: Services<'a>,
    pub ledger: LedgerStore,
    pub retry: Retry,
    pub scanner: ReservationScanner,
    clock: fn() -> DateTime<Utc>,
}

impl<'a> Controller<'a> {
    /// Open (or create) the ledger under `paths` and build the controller.
    pub fn open(
        config: ConductorConfig,
        paths: ConductorPaths,
        services: Services<'a>,
    ) -> Result<Self> {
        let ledger = LedgerStore::open(&paths.ledger_path, Utc::now())?;
        let retry = Retry::new(RetryPolicy::from(&config.retry));
        let scanner = ReservationScanner::from_config(&config.reservation)?;
        debug!(
            session_id = %ledger.current().session_id,
            tracked = ledger.current().tasks.len(),
            "controller opened"
        );
        Ok(Self {
            config,
            paths,
            services,
            ledger,
            retry,
            scanner,
            clock: Utc::now,
        })
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Readers get a full copy, never a borrowed, half-updated document.
    pub fn snapshot(&self) -> Ledger {
        self.ledger.snapshot()
    }

    pub fn workspace_path(&self, slug: &str) -> PathBuf {
        self.paths.workspace(&self.config, slug)
    }

    /// Persist `record`, stamping its update time. Terminal records are dropped.
    pub fn persist(&mut self, mut record: TaskRecord) -> Result<()> {
        record.updated_at = self.now();
        self.ledger.apply(LedgerChange::Upsert(record))
    }

    pub fn forget(&mut self, id: &str) -> Result<()> {
        self.ledger.apply(LedgerChange::Remove(id.to_string()))
    }

    /// The review request for `record`'s current attempt, if any.
    ///
    /// A request opened before the attempt started counts only while it is
    /// still open (a resumed branch keeps its request); a finished one
    /// belongs to an earlier attempt on the same branch name.
    pub fn find_current_review(&self, record: &TaskRecord) -> Result<Option<ReviewRef>> {
        let reviews = self.services.review;
        let Some(review) = self
            .retry
            .run(&format!("find review for {}", record.branch), || {
                reviews.find_request_for_branch(&record.branch)
            })?
        else {
            return Ok(None);
        };
        if belongs_to_attempt(&review, record.selected_at) {
            return Ok(Some(review));
        }
        let status = self
            .retry
            .run(&format!("review status #{}", review.number), || {
                reviews.request_status(&review)
            })?;
        if status.state == ReviewState::Open {
            return Ok(Some(review));
        }
        debug!(
            task_id = %record.id,
            number = review.number,
            created_at = %review.created_at,
            state = ?status.state,
            "ignoring finished review from an earlier attempt"
        );
        Ok(None)
    }

    /// Set a tracker status under the retry policy.
    pub fn set_tracker_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let tasks = self.services.tasks;
        self.retry.run(&format!("set status of {id}"), || {
            tasks.set_task_status(id, status)
        })
    }
}
