//! Discover previously issued reservation numbers on disk.
//!
//! A reservation is issued by creating a file whose name starts with the
//! number (e.g. `migrations/0007_add_index.sql`). The scan looks at the same
//! directories in every checkout so numbers used on unmerged branches count.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::io::config::ReservationConfig;

#[derive(Debug, Clone)]
pub struct ReservationScanner {
    dirs: Vec<String>,
    pattern: Regex,
}

impl ReservationScanner {
    pub fn new(dirs: Vec<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("compile reservation pattern '{pattern}'"))?;
        Ok(Self { dirs, pattern })
    }

    pub fn from_config(cfg: &ReservationConfig) -> Result<Self> {
        Self::new(cfg.dirs.clone(), &cfg.pattern)
    }

    /// Highest number found under any of `roots`, or zero.
    pub fn highest_in(&self, roots: &[PathBuf]) -> Result<u32> {
        let mut highest = 0;
        for root in roots {
            for dir in &self.dirs {
                highest = highest.max(self.highest_in_dir(&root.join(dir))?);
            }
        }
        debug!(highest, roots = roots.len(), "scanned reservations");
        Ok(highest)
    }

    fn highest_in_dir(&self, dir: &Path) -> Result<u32> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut highest = 0;
        let entries = fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let name = entry.file_name();
            if let Some(number) = self.number_in(&name.to_string_lossy()) {
                highest = highest.max(number);
            }
        }
        Ok(highest)
    }

    fn number_in(&self, file_name: &str) -> Option<u32> {
        self.pattern
            .captures(file_name)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> ReservationScanner {
        ReservationScanner::from_config(&ReservationConfig::default()).expect("scanner")
    }

    #[test]
    fn extracts_leading_numbers() {
        let s = scanner();
        assert_eq!(s.number_in("0007_add_index.sql"), Some(7));
        assert_eq!(s.number_in("12-seed.sql"), Some(12));
        assert_eq!(s.number_in("README.md"), None);
        assert_eq!(s.number_in("v2_notes.md"), None);
    }

    #[test]
    fn highest_spans_every_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let main = temp.path().join("main");
        let ws = temp.path().join("ws");
        fs::create_dir_all(main.join("migrations")).expect("mkdir");
        fs::create_dir_all(ws.join("migrations")).expect("mkdir");
        fs::write(main.join("migrations/0003_a.sql"), "").expect("write");
        fs::write(main.join("migrations/0005_b.sql"), "").expect("write");
        fs::write(ws.join("migrations/0004_c.sql"), "").expect("write");

        let s = scanner();
        assert_eq!(s.highest_in(&[main.clone()]).expect("scan"), 5);
        fs::write(ws.join("migrations/0009_d.sql"), "").expect("write");
        assert_eq!(s.highest_in(&[main, ws]).expect("scan"), 9);
    }

    #[test]
    fn missing_directories_count_as_zero() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            scanner()
                .highest_in(&[temp.path().to_path_buf()])
                .expect("scan"),
            0
        );
    }
}
