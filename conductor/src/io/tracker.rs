//! Task-tracker adapter backed by a JSON backlog file.
//!
//! The backlog lives in the repository (`.conductor/backlog.json` by default)
//! so humans and other tools can edit it. Status updates rewrite the file
//! atomically.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{Candidate, TaskDetail, Tier};
use crate::io::config::TrackerConfig;

/// Tracker status values the controller writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Open,
    InProgress,
    Closed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Closed => "closed",
        }
    }
}

/// Which tracker entries count as candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    pub status: String,
}

/// The external task tracker.
pub trait TaskSource {
    fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Candidate>>;
    fn get_task(&self, id: &str) -> Result<TaskDetail>;
    fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()>;
}

/// Label conventions used to derive typed candidate fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRules {
    pub conflict_prefix: String,
    pub reservation_label: String,
    pub specified_label: String,
}

impl From<&TrackerConfig> for LabelRules {
    fn from(cfg: &TrackerConfig) -> Self {
        Self {
            conflict_prefix: cfg.conflict_prefix.clone(),
            reservation_label: cfg.reservation_label.clone(),
            specified_label: cfg.specified_label.clone(),
        }
    }
}

/// On-disk backlog document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backlog {
    pub tasks: Vec<BacklogTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 0 is the most urgent.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub foundational: bool,
    /// Ids of tasks this one blocks.
    #[serde(default)]
    pub blocks: Vec<String>,
    /// Ids of tasks blocking this one.
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_priority() -> u32 {
    2
}

fn default_status() -> String {
    TaskStatus::Open.as_str().to_string()
}

/// [`TaskSource`] over a backlog file.
#[derive(Debug, Clone)]
pub struct BacklogFile {
    path: PathBuf,
    rules: LabelRules,
}

impl BacklogFile {
    pub fn new(path: impl Into<PathBuf>, rules: LabelRules) -> Self {
        Self {
            path: path.into(),
            rules,
        }
    }

    pub fn load(&self) -> Result<Backlog> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "backlog missing, treating as empty");
            return Ok(Backlog::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read backlog {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse backlog {}", self.path.display()))
    }

    pub fn save(&self, backlog: &Backlog) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(backlog).context("serialize backlog")?;
        buf.push('\n');
        let parent = self
            .path
            .parent()
            .with_context(|| format!("backlog path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp backlog {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace backlog {}", self.path.display()))?;
        Ok(())
    }

    fn to_candidate(&self, task: &BacklogTask, statuses: &BTreeMap<&str, &str>) -> Candidate {
        let is_open = |id: &String| {
            statuses
                .get(id.as_str())
                .is_some_and(|s| *s != TaskStatus::Closed.as_str())
        };
        let conflict_domain = task
            .labels
            .iter()
            .find_map(|l| l.strip_prefix(self.rules.conflict_prefix.as_str()))
            .map(str::to_string)
            .filter(|d| !d.is_empty());
        Candidate {
            id: task.id.clone(),
            title: task.title.clone(),
            tier: Tier::from_ordinal(task.priority),
            size: task.size,
            tags: task.labels.clone(),
            conflict_domain,
            foundational: task.foundational,
            blocks: task.blocks.iter().filter(|id| is_open(id)).count() as u32,
            blocked_by: task.blocked_by.iter().filter(|id| is_open(id)).count() as u32,
            fully_specified: task.labels.contains(&self.rules.specified_label),
            needs_reservation: task.labels.contains(&self.rules.reservation_label),
        }
    }
}

impl TaskSource for BacklogFile {
    #[instrument(skip_all, fields(status = %filter.status))]
    fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Candidate>> {
        let backlog = self.load()?;
        let statuses: BTreeMap<&str, &str> = backlog
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t.status.as_str()))
            .collect();
        let candidates: Vec<Candidate> = backlog
            .tasks
            .iter()
            .filter(|t| t.status == filter.status)
            .map(|t| self.to_candidate(t, &statuses))
            .collect();
        debug!(count = candidates.len(), "listed candidates");
        Ok(candidates)
    }

    fn get_task(&self, id: &str) -> Result<TaskDetail> {
        let backlog = self.load()?;
        let task = backlog
            .tasks
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("task {id} not found in {}", self.path.display()))?;
        Ok(TaskDetail {
            id: task.id,
            title: task.title,
            description: task.description,
        })
    }

    #[instrument(skip_all, fields(id, status = status.as_str()))]
    fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut backlog = self.load()?;
        let task = backlog
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("task {id} not found in {}", self.path.display()))?;
        if task.status == status.as_str() {
            return Ok(());
        }
        task.status = status.as_str().to_string();
        self.save(&backlog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> LabelRules {
        LabelRules::from(&TrackerConfig::default())
    }

    fn task(id: &str) -> BacklogTask {
        BacklogTask {
            id: id.to_string(),
            title: format!("{id} title"),
            description: format!("{id} description"),
            priority: 2,
            size: 1.0,
            labels: Vec::new(),
            foundational: false,
            blocks: Vec::new(),
            blocked_by: Vec::new(),
            status: "open".to_string(),
        }
    }

    fn filter() -> CandidateFilter {
        CandidateFilter {
            status: "open".to_string(),
        }
    }

    #[test]
    fn missing_backlog_has_no_candidates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = BacklogFile::new(temp.path().join("backlog.json"), rules());
        assert!(source.list_candidates(&filter()).expect("list").is_empty());
    }

    #[test]
    fn labels_and_links_map_to_candidate_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = BacklogFile::new(temp.path().join("backlog.json"), rules());

        let mut main = task("1");
        main.priority = 0;
        main.labels = vec![
            "area:ui".to_string(),
            "migration".to_string(),
            "spec-ready".to_string(),
        ];
        main.blocks = vec!["2".to_string(), "3".to_string()];
        main.blocked_by = vec!["4".to_string(), "5".to_string()];
        let blocked = task("2");
        let mut done = task("3");
        done.status = "closed".to_string();
        let mut blocker = task("4");
        blocker.status = "in_progress".to_string();
        let mut closed_blocker = task("5");
        closed_blocker.status = "closed".to_string();
        source
            .save(&Backlog {
                tasks: vec![main, blocked, done, blocker, closed_blocker],
            })
            .expect("save");

        let candidates = source.list_candidates(&filter()).expect("list");
        let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        let first = &candidates[0];
        assert_eq!(first.tier, Tier::Critical);
        assert_eq!(first.conflict_domain.as_deref(), Some("ui"));
        assert!(first.needs_reservation);
        assert!(first.fully_specified);
        assert_eq!(first.blocks, 1);
        assert_eq!(first.blocked_by, 1);
    }

    #[test]
    fn set_status_rewrites_file_and_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = BacklogFile::new(temp.path().join("backlog.json"), rules());
        source
            .save(&Backlog {
                tasks: vec![task("1")],
            })
            .expect("save");

        source
            .set_task_status("1", TaskStatus::InProgress)
            .expect("set");
        source
            .set_task_status("1", TaskStatus::InProgress)
            .expect("set again");
        assert!(source.list_candidates(&filter()).expect("list").is_empty());
        assert_eq!(source.load().expect("load").tasks[0].status, "in_progress");

        let detail = source.get_task("1").expect("get");
        assert_eq!(detail.description, "1 description");
        assert!(source.set_task_status("nope", TaskStatus::Open).is_err());
    }

    #[test]
    fn backlog_accepts_minimal_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("backlog.json");
        fs::write(&path, r#"{"tasks": [{"id": "9", "title": "Minimal"}]}"#).expect("write");
        let source = BacklogFile::new(&path, rules());
        let candidates = source.list_candidates(&filter()).expect("list");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].tier, Tier::Normal);
        assert_eq!(candidates[0].conflict_domain, None);
    }
}
