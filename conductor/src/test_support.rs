//! Test-only builders and in-memory collaborators.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tempfile::TempDir;

use crate::controller::{Controller, Services};
use crate::core::types::{
    Candidate, Phase, ReviewRef, ReviewStatus, Scored, TaskDetail, TaskRecord, Tier, WorkerHandle,
};
use crate::io::config::ConductorConfig;
use crate::io::git::VersionControl;
use crate::io::init::ConductorPaths;
use crate::io::launcher::{WorkerLauncher, WorkerRequest};
use crate::io::picker::Picker;
use crate::io::review::ReviewSystem;
use crate::io::tracker::{CandidateFilter, TaskSource, TaskStatus};
use crate::retry::{Retry, RetryPolicy};
use crate::ticker::{Tick, Ticker};

/// 2026-01-01T12:00:00Z.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .expect("valid fixed time")
}

/// A neutral candidate: normal tier, no size, no links, no domain.
pub fn candidate(id: &str) -> Candidate {
    Candidate {
        id: id.to_string(),
        title: format!("{id} title"),
        tier: Tier::Normal,
        size: 0.0,
        tags: Vec::new(),
        conflict_domain: None,
        foundational: false,
        blocks: 0,
        blocked_by: 0,
        fully_specified: false,
        needs_reservation: false,
    }
}

pub fn candidate_in(id: &str, domain: &str) -> Candidate {
    Candidate {
        conflict_domain: Some(domain.to_string()),
        tags: vec![format!("area:{domain}")],
        ..candidate(id)
    }
}

/// A tracked record in `phase` with no review, reservation or worker.
pub fn record(id: &str, phase: Phase) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("{id} title"),
        slug: format!("{id}-task"),
        branch: format!("conductor/{id}-task"),
        workdir: format!("/work/{id}-task"),
        phase,
        conflict_domain: None,
        review: None,
        reservation: None,
        worker: None,
        status: phase.as_str().to_string(),
        selected_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

/// Review request `number`, opened an hour after [`fixed_time`].
pub fn review_ref(number: u64) -> ReviewRef {
    ReviewRef {
        number,
        url: format!("https://example.invalid/pr/{number}"),
        created_at: fixed_time() + TimeDelta::hours(1),
    }
}

/// Retry policy that never sleeps.
pub fn instant_retry() -> Retry {
    fn no_sleep(_: Duration) {}
    Retry::new(RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
    })
    .with_sleeper(no_sleep)
}

/// Backlog held in memory. Status updates for unknown ids are recorded too.
#[derive(Debug, Default)]
pub struct FakeTasks {
    candidates: RefCell<Vec<Candidate>>,
    statuses: RefCell<BTreeMap<String, String>>,
    failing_lists: Cell<u32>,
}

impl FakeTasks {
    /// Add an open candidate, keeping insertion order as tracker order.
    pub fn add(&self, candidate: Candidate) {
        self.statuses
            .borrow_mut()
            .insert(candidate.id.clone(), TaskStatus::Open.as_str().to_string());
        self.candidates.borrow_mut().push(candidate);
    }

    pub fn set_status(&self, id: &str, status: &str) {
        self.statuses
            .borrow_mut()
            .insert(id.to_string(), status.to_string());
    }

    pub fn status_of(&self, id: &str) -> Option<String> {
        self.statuses.borrow().get(id).cloned()
    }

    /// Fail the next `n` candidate listings.
    pub fn fail_next_lists(&self, n: u32) {
        self.failing_lists.set(n);
    }
}

impl TaskSource for FakeTasks {
    fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Candidate>> {
        let failing = self.failing_lists.get();
        if failing > 0 {
            self.failing_lists.set(failing - 1);
            return Err(anyhow!("tracker unavailable"));
        }
        let statuses = self.statuses.borrow();
        Ok(self
            .candidates
            .borrow()
            .iter()
            .filter(|c| statuses.get(&c.id).is_some_and(|s| *s == filter.status))
            .cloned()
            .collect())
    }

    fn get_task(&self, id: &str) -> Result<TaskDetail> {
        self.candidates
            .borrow()
            .iter()
            .find(|c| c.id == id)
            .map(|c| TaskDetail {
                id: c.id.clone(),
                title: c.title.clone(),
                description: format!("{id} description"),
            })
            .ok_or_else(|| anyhow!("task {id} not found"))
    }

    fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.set_status(id, status.as_str());
        Ok(())
    }
}

/// Review requests keyed by branch, statuses keyed by number.
#[derive(Debug, Default)]
pub struct FakeReview {
    by_branch: RefCell<BTreeMap<String, ReviewRef>>,
    statuses: RefCell<BTreeMap<u64, ReviewStatus>>,
    failing: RefCell<BTreeSet<String>>,
}

impl FakeReview {
    pub fn open_request(&self, branch: &str, review: ReviewRef, status: ReviewStatus) {
        self.statuses.borrow_mut().insert(review.number, status);
        self.by_branch
            .borrow_mut()
            .insert(branch.to_string(), review);
    }

    pub fn set_status(&self, number: u64, status: ReviewStatus) {
        self.statuses.borrow_mut().insert(number, status);
    }

    pub fn fail_lookups_for(&self, branch: &str) {
        self.failing.borrow_mut().insert(branch.to_string());
    }
}

impl ReviewSystem for FakeReview {
    fn find_request_for_branch(&self, branch: &str) -> Result<Option<ReviewRef>> {
        if self.failing.borrow().contains(branch) {
            return Err(anyhow!("review system unavailable"));
        }
        Ok(self.by_branch.borrow().get(branch).cloned())
    }

    fn request_status(&self, review: &ReviewRef) -> Result<ReviewStatus> {
        self.statuses
            .borrow()
            .get(&review.number)
            .cloned()
            .ok_or_else(|| anyhow!("review #{} not found", review.number))
    }
}

/// Workspaces and branches as plain sets; nothing touches the filesystem.
#[derive(Debug, Default)]
pub struct FakeVcs {
    workspaces: RefCell<BTreeSet<PathBuf>>,
    branches: RefCell<BTreeSet<String>>,
}

impl FakeVcs {
    pub fn add_workspace(&self, path: &Path, branch: &str) {
        self.workspaces.borrow_mut().insert(path.to_path_buf());
        self.branches.borrow_mut().insert(branch.to_string());
    }

    pub fn has_workspace(&self, path: &Path) -> bool {
        self.workspaces.borrow().contains(path)
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.branches.borrow().contains(branch)
    }

    /// Simulate a branch deleted behind the controller's back.
    pub fn drop_branch(&self, branch: &str) {
        self.branches.borrow_mut().remove(branch);
    }
}

impl VersionControl for FakeVcs {
    fn create_workspace(&self, path: &Path, branch: &str, _from_ref: &str) -> Result<()> {
        if self.has_workspace(path) {
            return Err(anyhow!("workspace {} already exists", path.display()));
        }
        self.add_workspace(path, branch);
        Ok(())
    }

    fn remove_workspace(&self, path: &Path) -> Result<()> {
        self.workspaces.borrow_mut().remove(path);
        Ok(())
    }

    fn workspace_exists(&self, path: &Path) -> bool {
        self.has_workspace(path)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.has_branch(branch))
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.branches.borrow_mut().remove(branch);
        Ok(())
    }

    fn list_workspaces(&self) -> Result<Vec<PathBuf>> {
        Ok(self.workspaces.borrow().iter().cloned().collect())
    }
}

/// Launcher that hands out fake pids and remembers every request.
#[derive(Debug)]
pub struct FakeLauncher {
    next_pid: Cell<u32>,
    alive: RefCell<BTreeSet<u32>>,
    stopped: RefCell<Vec<u32>>,
    requests: RefCell<Vec<WorkerRequest>>,
    failing: RefCell<BTreeSet<String>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            next_pid: Cell::new(1000),
            alive: RefCell::default(),
            stopped: RefCell::default(),
            requests: RefCell::default(),
            failing: RefCell::default(),
        }
    }
}

impl FakeLauncher {
    pub fn set_alive(&self, pid: u32, alive: bool) {
        if alive {
            self.alive.borrow_mut().insert(pid);
        } else {
            self.alive.borrow_mut().remove(&pid);
        }
    }

    /// Every worker exits.
    pub fn exit_all(&self) {
        self.alive.borrow_mut().clear();
    }

    pub fn fail_for(&self, task_id: &str) {
        self.failing.borrow_mut().insert(task_id.to_string());
    }

    pub fn stopped(&self) -> Vec<u32> {
        self.stopped.borrow().clone()
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        self.requests.borrow().clone()
    }

    pub fn launched_ids(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|r| r.task_id.clone())
            .collect()
    }
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&self, request: &WorkerRequest) -> Result<WorkerHandle> {
        if self.failing.borrow().contains(&request.task_id) {
            return Err(anyhow!("worker for {} failed to start", request.task_id));
        }
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        self.alive.borrow_mut().insert(pid);
        self.requests.borrow_mut().push(request.clone());
        Ok(WorkerHandle { pid })
    }

    fn is_alive(&self, handle: &WorkerHandle) -> bool {
        self.alive.borrow().contains(&handle.pid)
    }

    fn stop(&self, handle: &WorkerHandle) -> Result<()> {
        self.alive.borrow_mut().remove(&handle.pid);
        self.stopped.borrow_mut().push(handle.pid);
        Ok(())
    }
}

/// Picker that replays canned answers, then times out.
#[derive(Debug, Default)]
pub struct ScriptedPicker {
    answers: RefCell<VecDeque<Option<Vec<String>>>>,
}

impl ScriptedPicker {
    pub fn new(answers: Vec<Option<Vec<String>>>) -> Self {
        Self {
            answers: RefCell::new(answers.into()),
        }
    }
}

impl Picker for ScriptedPicker {
    fn pick(
        &self,
        _ranked: &[Scored],
        _free_slots: usize,
        _timeout: Duration,
    ) -> Result<Option<Vec<String>>> {
        Ok(self.answers.borrow_mut().pop_front().flatten())
    }
}

/// Ticker that replays a script and then reports an interrupt.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTicker {
    script: VecDeque<Tick>,
}

impl ScriptedTicker {
    pub fn new(script: impl IntoIterator<Item = Tick>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// `n` plain ticks, then an interrupt.
    pub fn ticks(n: usize) -> Self {
        Self::new(std::iter::repeat_n(Tick::Tick, n))
    }
}

impl Ticker for ScriptedTicker {
    fn wait(&mut self) -> Tick {
        self.script.pop_front().unwrap_or(Tick::Interrupted)
    }
}

/// One of each fake plus a scratch repository root.
#[derive(Debug)]
pub struct Fakes {
    temp: TempDir,
    pub tasks: FakeTasks,
    pub review: FakeReview,
    pub vcs: FakeVcs,
    pub launcher: FakeLauncher,
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().expect("tempdir"),
            tasks: FakeTasks::default(),
            review: FakeReview::default(),
            vcs: FakeVcs::default(),
            launcher: FakeLauncher::default(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            tasks: &self.tasks,
            review: &self.review,
            vcs: &self.vcs,
            launcher: &self.launcher,
        }
    }

    /// Controller over the fakes with default config, a fixed clock and
    /// retries that never sleep.
    pub fn controller(&self) -> Controller<'_> {
        self.controller_with(ConductorConfig::default())
    }

    pub fn controller_with(&self, config: ConductorConfig) -> Controller<'_> {
        Controller::open(config, ConductorPaths::new(self.root()), self.services())
            .expect("open controller")
            .with_clock(fixed_time)
            .with_retry(instant_retry())
    }

    /// Register `record`'s workspace and branch as existing.
    pub fn seed_workspace(&self, ctl: &Controller<'_>, record: &TaskRecord) {
        self.vcs
            .add_workspace(&ctl.paths.resolve(&record.workdir), &record.branch);
    }
}
