//! Initialization helpers for `.conductor/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{ConductorConfig, write_config};
use super::tracker::Backlog;

/// All canonical paths within `.conductor/` for a repository root.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
    pub stop_path: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        let state_dir = conductor_dir.join("state");
        Self {
            root: root.clone(),
            conductor_dir: conductor_dir.clone(),
            state_dir: state_dir.clone(),
            logs_dir: conductor_dir.join("logs"),
            gitignore_path: conductor_dir.join(".gitignore"),
            config_path: conductor_dir.join("config.toml"),
            ledger_path: state_dir.join("ledger.json"),
            stop_path: conductor_dir.join("STOP"),
        }
    }

    /// Resolve a configured, root-relative path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Workspace directory for a task slug.
    pub fn workspace(&self, cfg: &ConductorConfig, slug: &str) -> PathBuf {
        self.resolve(&cfg.worktree_dir).join(slug)
    }

    pub fn backlog(&self, cfg: &ConductorConfig) -> PathBuf {
        self.resolve(&cfg.tracker.backlog_path)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_path.exists()
    }

    /// Create the sentinel stop marker.
    pub fn request_stop(&self) -> Result<()> {
        create_dir(&self.conductor_dir)?;
        fs::write(&self.stop_path, "")
            .with_context(|| format!("write stop marker {}", self.stop_path.display()))
    }

    /// Remove the sentinel stop marker if present.
    pub fn clear_stop(&self) -> Result<()> {
        match fs::remove_file(&self.stop_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("remove stop marker {}", self.stop_path.display())),
        }
    }
}

/// Options for `init_conductor`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing conductor-owned files.
    pub force: bool,
}

/// Create `.conductor/` scaffolding in `root`.
///
/// Fails if `.conductor/` already exists unless `options.force` is set. The
/// ledger is never touched here; a forced re-init keeps tracked tasks.
pub fn init_conductor(root: &Path, options: &InitOptions) -> Result<ConductorPaths> {
    let paths = ConductorPaths::new(root);
    if paths.conductor_dir.exists() && !options.force {
        return Err(anyhow!(
            "conductor init: .conductor already exists (use --force to overwrite)"
        ));
    }
    if paths.conductor_dir.exists() && !paths.conductor_dir.is_dir() {
        return Err(anyhow!(
            "conductor init: .conductor exists but is not a directory"
        ));
    }

    create_dir(&paths.conductor_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.logs_dir)?;

    let cfg = ConductorConfig::default();
    write_file(&paths.gitignore_path, CONDUCTOR_GITIGNORE)?;
    write_config(&paths.config_path, &cfg)?;
    let backlog_path = paths.backlog(&cfg);
    if !backlog_path.exists() {
        let mut buf = serde_json::to_string_pretty(&Backlog::default())?;
        buf.push('\n');
        write_file(&backlog_path, &buf)?;
    }

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const CONDUCTOR_GITIGNORE: &str = "worktrees/\nlogs/\nstate/\nSTOP\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{ConfigSources, load_config};

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_conductor(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.state_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(!paths.ledger_path.exists());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            CONDUCTOR_GITIGNORE
        );
        let backlog = fs::read_to_string(temp.path().join(".conductor/backlog.json"))
            .expect("read backlog");
        assert!(backlog.contains("\"tasks\": []"));

        let cfg = load_config(&ConfigSources {
            user: None,
            repo: paths.config_path.clone(),
        })
        .expect("load");
        assert_eq!(cfg, ConductorConfig::default());
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_conductor(temp.path(), &InitOptions { force: false })
            .expect_err("second init");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn forced_init_restores_config_and_keeps_backlog() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "cap = 9\n").expect("write config");
        let backlog = temp.path().join(".conductor/backlog.json");
        fs::write(&backlog, r#"{"tasks": [{"id": "1", "title": "Keep me"}]}"#)
            .expect("write backlog");

        init_conductor(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert!(!fs::read_to_string(&paths.config_path).expect("read").contains("cap = 9"));
        assert!(fs::read_to_string(&backlog).expect("read").contains("Keep me"));
    }

    #[test]
    fn stop_marker_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ConductorPaths::new(temp.path());
        assert!(!paths.stop_requested());
        paths.request_stop().expect("request");
        assert!(paths.stop_requested());
        paths.clear_stop().expect("clear");
        paths.clear_stop().expect("clear again");
        assert!(!paths.stop_requested());
    }
}
