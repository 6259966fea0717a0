//! Git adapter for task workspaces.
//!
//! Each task gets its own worktree on its own branch. The controller only
//! needs a handful of operations, so we keep a small, explicit wrapper around
//! `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

/// Workspace and branch operations the controller depends on.
pub trait VersionControl {
    /// Create a workspace at `path` on `branch`, branching from `from_ref`.
    ///
    /// If `branch` already exists it is reused, so preserved work resumes.
    fn create_workspace(&self, path: &Path, branch: &str, from_ref: &str) -> Result<()>;
    /// Remove the workspace at `path`; a missing workspace is not an error.
    fn remove_workspace(&self, path: &Path) -> Result<()>;
    fn workspace_exists(&self, path: &Path) -> bool;
    fn branch_exists(&self, branch: &str) -> Result<bool>;
    /// Delete a local branch; a missing branch is not an error.
    fn delete_branch(&self, branch: &str) -> Result<()>;
    /// Every checkout of the repository, the main one included.
    fn list_workspaces(&self) -> Result<Vec<PathBuf>>;
}

/// Wrapper for executing git commands in a repository.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Fail fast when `git` is missing or `workdir` is not a repository.
    pub fn ensure_repository(&self) -> Result<()> {
        let out = self
            .run(&["rev-parse", "--is-inside-work-tree"])
            .context("git is required")?;
        if !out.status.success() {
            return Err(anyhow!(
                "{} is not a git repository",
                self.workdir.display()
            ));
        }
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    #[instrument(skip_all, fields(branch, from_ref))]
    fn create_workspace(&self, path: &Path, branch: &str, from_ref: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let path_arg = path.to_string_lossy();
        if self.branch_exists(branch)? {
            info!(branch, path = %path.display(), "reusing existing branch for workspace");
            self.run_checked(&["worktree", "add", &path_arg, branch])?;
        } else {
            debug!(branch, from_ref, path = %path.display(), "creating workspace");
            self.run_checked(&["worktree", "add", "-b", branch, &path_arg, from_ref])?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn remove_workspace(&self, path: &Path) -> Result<()> {
        if path.exists() {
            let path_arg = path.to_string_lossy();
            self.run_checked(&["worktree", "remove", "--force", &path_arg])?;
        } else {
            debug!("workspace already gone");
        }
        // Drop bookkeeping for worktrees whose directories vanished externally.
        if let Err(err) = self.run_checked(&["worktree", "prune"]) {
            warn!(err = %err, "git worktree prune failed");
        }
        Ok(())
    }

    fn workspace_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    #[instrument(skip_all, fields(branch))]
    fn delete_branch(&self, branch: &str) -> Result<()> {
        if !self.branch_exists(branch)? {
            debug!("branch already gone");
            return Ok(());
        }
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    fn list_workspaces(&self) -> Result<Vec<PathBuf>> {
        let out = self.run_capture(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }
}

fn parse_worktree_list(porcelain: &str) -> Vec<PathBuf> {
    porcelain
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(|path| PathBuf::from(path.trim()))
        .collect()
}
