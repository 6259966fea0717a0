//! Controller configuration.
//!
//! Layers are merged in precedence order, lowest first:
//!
//! 1. programmatic defaults
//! 2. user-level `$XDG_CONFIG_HOME/conductor/config.toml`
//!    (or `$HOME/.config/conductor/config.toml`)
//! 3. repo-level `.conductor/config.toml`
//! 4. `CONDUCTOR_*` environment variables (`__` separates nested keys)
//!
//! The merged result is validated once, before the loop starts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::scorer::ScoreWeights;
use crate::core::transitions::GatePolicy;

pub const ENV_PREFIX: &str = "CONDUCTOR_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cap must be > 0")]
    ZeroCap,
    #[error("poll_interval_secs must be > 0")]
    ZeroPollInterval,
    #[error("base_ref must not be empty")]
    EmptyBaseRef,
    #[error("worker.command must be a non-empty array")]
    EmptyWorkerCommand,
    #[error("retry.max_attempts must be > 0")]
    ZeroRetryAttempts,
    #[error(
        "retry.initial_backoff_ms ({0}) must not exceed retry.max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),
    #[error("reservation.pattern is not a valid regex with one capture group: {0}")]
    InvalidReservationPattern(String),
    #[error("review.timeout_secs must be > 0")]
    ZeroReviewTimeout,
}

/// Typed controller configuration.
///
/// Missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Reference every review must merge into.
    pub base_ref: String,
    /// Maximum number of concurrently active tasks.
    pub cap: usize,
    /// Seconds between reconciliation ticks.
    pub poll_interval_secs: u64,
    /// How long to wait for interactive selection input before resuming.
    pub selection_timeout_secs: u64,
    /// Prefix for task branches.
    pub branch_prefix: String,
    /// Directory (relative to the repo root) that holds task workspaces.
    pub worktree_dir: String,
    /// Start workers in interactive planning mode.
    pub planning: bool,
    /// Park merged tasks until the worker host is closed.
    pub confirm_cleanup: bool,
    /// Keep polling when the tracker has no candidates and nothing is active.
    pub keep_waiting: bool,
    /// A merged review with no checks at all passes the merge gate.
    pub allow_no_checks: bool,
    pub tracker: TrackerConfig,
    pub review: ReviewConfig,
    pub worker: WorkerConfig,
    pub reservation: ReservationConfig,
    pub retry: RetryConfig,
    pub scoring: ScoreWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Backlog file, relative to the repo root.
    pub backlog_path: String,
    /// Tracker status that marks a task as schedulable.
    pub candidate_status: String,
    /// Label prefix that names a conflict domain (e.g. `area:ui`).
    pub conflict_prefix: String,
    /// Label that marks a task as needing a reservation.
    pub reservation_label: String,
    /// Label that marks a task description as a complete work packet.
    pub specified_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Review CLI binary (`gh`).
    pub command: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker command; the brief is written to its stdin.
    pub command: Vec<String>,
    /// File a planning worker creates in its workspace once the plan is approved.
    pub plan_approved_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReservationConfig {
    /// Directories (relative to the repo root and to each workspace) scanned
    /// for previously issued numbers.
    pub dirs: Vec<String>,
    /// Regex applied to file names; capture group 1 is the number.
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            base_ref: "main".to_string(),
            cap: 2,
            poll_interval_secs: 60,
            selection_timeout_secs: 30,
            branch_prefix: "conductor".to_string(),
            worktree_dir: ".conductor/worktrees".to_string(),
            planning: false,
            confirm_cleanup: false,
            keep_waiting: false,
            allow_no_checks: true,
            tracker: TrackerConfig::default(),
            review: ReviewConfig::default(),
            worker: WorkerConfig::default(),
            reservation: ReservationConfig::default(),
            retry: RetryConfig::default(),
            scoring: ScoreWeights::default(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            backlog_path: ".conductor/backlog.json".to_string(),
            candidate_status: "open".to_string(),
            conflict_prefix: "area:".to_string(),
            reservation_label: "migration".to_string(),
            specified_label: "spec-ready".to_string(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            command: "gh".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "--print".to_string()],
            plan_approved_marker: ".conductor-plan-approved".to_string(),
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            dirs: vec!["migrations".to_string()],
            pattern: r"^(\d+)[_-]".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cap == 0 {
            return Err(ConfigError::ZeroCap);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.base_ref.trim().is_empty() {
            return Err(ConfigError::EmptyBaseRef);
        }
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            return Err(ConfigError::EmptyWorkerCommand);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms,
            ));
        }
        if self.review.timeout_secs == 0 {
            return Err(ConfigError::ZeroReviewTimeout);
        }
        match regex::Regex::new(&self.reservation.pattern) {
            Ok(re) if re.captures_len() >= 2 => {}
            _ => {
                return Err(ConfigError::InvalidReservationPattern(
                    self.reservation.pattern.clone(),
                ));
            }
        }
        Ok(())
    }

    pub fn gate_policy(&self) -> GatePolicy {
        GatePolicy {
            base_ref: self.base_ref.clone(),
            allow_no_checks: self.allow_no_checks,
        }
    }
}

/// Files that feed the file-backed layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSources {
    pub user: Option<PathBuf>,
    pub repo: PathBuf,
}

impl ConfigSources {
    /// Standard locations for a repository root.
    pub fn for_root(root: &Path) -> Self {
        Self {
            user: user_config_path(),
            repo: root.join(".conductor").join("config.toml"),
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir).join("conductor").join("config.toml"));
    }
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(|home| PathBuf::from(home).join(".config").join("conductor").join("config.toml"))
}

/// Merge every layer and validate the result.
///
/// Missing files are skipped; a file that exists but does not parse is an error.
pub fn load_config(sources: &ConfigSources) -> Result<ConductorConfig> {
    let mut figment = Figment::new().merge(Serialized::defaults(ConductorConfig::default()));
    if let Some(user) = &sources.user {
        debug!(path = %user.display(), exists = user.exists(), "user config layer");
        figment = figment.merge(Toml::file(user));
    }
    debug!(path = %sources.repo.display(), exists = sources.repo.exists(), "repo config layer");
    let cfg: ConductorConfig = figment
        .merge(Toml::file(&sources.repo))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("extract configuration")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(temp: &Path) -> ConfigSources {
        ConfigSources {
            user: Some(temp.join("user.toml")),
            repo: temp.join("repo.toml"),
        }
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = temp_env::with_vars_unset(["CONDUCTOR_CAP", "CONDUCTOR_BASE_REF"], || {
            load_config(&sources(temp.path()))
        })
        .expect("load");
        assert_eq!(cfg, ConductorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("repo.toml");
        let cfg = ConductorConfig {
            cap: 5,
            planning: true,
            ..ConductorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = temp_env::with_vars_unset(["CONDUCTOR_CAP", "CONDUCTOR_PLANNING"], || {
            load_config(&sources(temp.path()))
        })
        .expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn layers_apply_in_precedence_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("user.toml"),
            "cap = 4\nbase_ref = \"trunk\"\npoll_interval_secs = 5\n",
        )
        .expect("write user");
        fs::write(
            temp.path().join("repo.toml"),
            "cap = 3\n[retry]\nmax_attempts = 2\n",
        )
        .expect("write repo");

        let cfg = temp_env::with_vars(
            [
                ("CONDUCTOR_CAP", Some("7")),
                ("CONDUCTOR_RETRY__MAX_BACKOFF_MS", Some("9000")),
            ],
            || load_config(&sources(temp.path())),
        )
        .expect("load");

        assert_eq!(cfg.cap, 7);
        assert_eq!(cfg.base_ref, "trunk");
        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.max_backoff_ms, 9000);
        assert_eq!(cfg.retry.initial_backoff_ms, 500);
    }

    #[test]
    fn malformed_repo_config_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("repo.toml"), "cap = [").expect("write repo");
        let result = load_config(&sources(temp.path()));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let zero_cap = ConductorConfig {
            cap: 0,
            ..ConductorConfig::default()
        };
        assert_eq!(zero_cap.validate(), Err(ConfigError::ZeroCap));

        let mut backoff = ConductorConfig::default();
        backoff.retry.initial_backoff_ms = 10_000;
        assert_eq!(
            backoff.validate(),
            Err(ConfigError::InvalidBackoff(10_000, 8_000))
        );

        let mut pattern = ConductorConfig::default();
        pattern.reservation.pattern = r"^\d+".to_string();
        assert!(matches!(
            pattern.validate(),
            Err(ConfigError::InvalidReservationPattern(_))
        ));

        let mut worker = ConductorConfig::default();
        worker.worker.command = vec![" ".to_string()];
        assert_eq!(worker.validate(), Err(ConfigError::EmptyWorkerCommand));
    }
}
