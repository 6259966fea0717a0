//! Review-system adapter backed by the GitHub CLI (`gh`).

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::types::{CheckResult, CheckState, ReviewRef, ReviewState, ReviewStatus};
use crate::io::process::{CAPTURE_LIMIT_BYTES, capture};

/// Queries against the code-review system.
pub trait ReviewSystem {
    /// Most recent review request whose head is `branch`, in any state.
    ///
    /// Callers must check `created_at`: a reused branch name also matches
    /// requests from earlier attempts.
    fn find_request_for_branch(&self, branch: &str) -> Result<Option<ReviewRef>>;
    fn request_status(&self, review: &ReviewRef) -> Result<ReviewStatus>;
}

/// [`ReviewSystem`] that shells out to `gh`.
#[derive(Debug, Clone)]
pub struct GhReview {
    program: String,
    workdir: PathBuf,
    timeout: Duration,
}

impl GhReview {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
            timeout,
        }
    }

    /// Fail fast when the CLI is missing or not authenticated.
    pub fn ensure_available(&self) -> Result<()> {
        self.gh(&["auth", "status"])
            .map(|_| ())
            .with_context(|| format!("{} is required and must be authenticated", self.program))
    }

    fn gh(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.workdir);
        let label = format!("{} {}", self.program, args.join(" "));
        let output = capture(cmd, self.timeout, CAPTURE_LIMIT_BYTES)
            .with_context(|| format!("run {label}"))?;
        output.ensure_success(&label)?;
        Ok(output.stdout_text())
    }
}

impl ReviewSystem for GhReview {
    #[instrument(skip_all, fields(branch))]
    fn find_request_for_branch(&self, branch: &str) -> Result<Option<ReviewRef>> {
        let out = self.gh(&[
            "pr", "list", "--head", branch, "--state", "all", "--limit", "1", "--json",
            "number,url,createdAt",
        ])?;
        let found = parse_pr_list(&out)?;
        debug!(found = ?found.as_ref().map(|r| r.number), "review lookup");
        Ok(found)
    }

    #[instrument(skip_all, fields(number = review.number))]
    fn request_status(&self, review: &ReviewRef) -> Result<ReviewStatus> {
        let number = review.number.to_string();
        let out = self.gh(&[
            "pr",
            "view",
            &number,
            "--json",
            "state,baseRefName,statusCheckRollup",
        ])?;
        parse_pr_view(&out)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrListItem {
    number: u64,
    url: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrView {
    state: String,
    base_ref_name: String,
    #[serde(default)]
    status_check_rollup: Option<Vec<RollupItem>>,
}

/// One entry of `statusCheckRollup`: either a check run or a commit status.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RollupItem {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    context: Option<String>,
    /// Check-run lifecycle (`COMPLETED`, `IN_PROGRESS`, ...).
    #[serde(default)]
    status: Option<String>,
    /// Check-run result once completed.
    #[serde(default)]
    conclusion: Option<String>,
    /// Commit-status state (`SUCCESS`, `PENDING`, ...).
    #[serde(default)]
    state: Option<String>,
}

fn parse_pr_list(json: &str) -> Result<Option<ReviewRef>> {
    let items: Vec<PrListItem> = serde_json::from_str(json).context("parse gh pr list")?;
    Ok(items.into_iter().next().map(|item| ReviewRef {
        number: item.number,
        url: item.url,
        created_at: item.created_at,
    }))
}

fn parse_pr_view(json: &str) -> Result<ReviewStatus> {
    let view: PrView = serde_json::from_str(json).context("parse gh pr view")?;
    let state = match view.state.as_str() {
        "OPEN" => ReviewState::Open,
        "MERGED" => ReviewState::Merged,
        "CLOSED" => ReviewState::Closed,
        other => return Err(anyhow!("unknown review state '{other}'")),
    };
    let checks = view
        .status_check_rollup
        .unwrap_or_default()
        .into_iter()
        .map(|item| CheckResult {
            name: item
                .name
                .clone()
                .or_else(|| item.context.clone())
                .unwrap_or_else(|| "unnamed".to_string()),
            state: classify_check(&item),
        })
        .collect();
    Ok(ReviewStatus {
        state,
        target_ref: view.base_ref_name,
        checks,
    })
}

fn classify_check(item: &RollupItem) -> CheckState {
    if let Some(state) = item.state.as_deref() {
        return match state {
            "SUCCESS" => CheckState::Passed,
            "FAILURE" | "ERROR" => CheckState::Failed,
            _ => CheckState::Pending,
        };
    }
    if item.status.as_deref() != Some("COMPLETED") {
        return CheckState::Pending;
    }
    match item.conclusion.as_deref() {
        Some("SUCCESS") => CheckState::Passed,
        Some("SKIPPED" | "NEUTRAL") => CheckState::Skipped,
        Some("CANCELLED") => CheckState::Cancelled,
        _ => CheckState::Failed,
    }
}
