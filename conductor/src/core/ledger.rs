//! The ledger document: session metadata plus one record per in-flight task.
//!
//! The document is treated as a value. Updates produce a new document that
//! replaces the old one wholesale; readers only ever hold complete snapshots.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::selector::Occupancy;
use crate::core::types::{Phase, TaskRecord};

pub const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl Ledger {
    pub fn new(session_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            version: LEDGER_VERSION,
            session_id: session_id.into(),
            started_at,
            tasks: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    /// Records that still need reconciliation, in id order.
    pub fn active(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values().filter(|r| !r.phase.is_terminal())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Ids and claimed conflict domains of every tracked task.
    pub fn occupancy(&self) -> Occupancy {
        let tracked: BTreeSet<String> = self.tasks.keys().cloned().collect();
        let domains = self
            .tasks
            .values()
            .filter_map(|r| r.conflict_domain.clone())
            .filter(|d| !d.is_empty())
            .collect();
        Occupancy { tracked, domains }
    }

    /// Reservation numbers held by tracked tasks.
    pub fn reservations(&self) -> impl Iterator<Item = u32> + '_ {
        self.tasks.values().filter_map(|r| r.reservation)
    }

    /// Apply a change to one record.
    ///
    /// A record whose phase becomes terminal is dropped, so a task id is
    /// either tracked or fully released.
    pub fn apply(&mut self, change: LedgerChange) {
        match change {
            LedgerChange::Upsert(record) => {
                if record.phase.is_terminal() {
                    self.tasks.remove(&record.id);
                } else {
                    self.tasks.insert(record.id.clone(), record);
                }
            }
            LedgerChange::Remove(id) => {
                self.tasks.remove(&id);
            }
        }
    }

    /// Convenience wrapper that leaves `self` untouched.
    pub fn with(&self, change: LedgerChange) -> Ledger {
        let mut next = self.clone();
        next.apply(change);
        next
    }

    /// Ids currently in `phase`.
    pub fn ids_in(&self, phase: Phase) -> Vec<String> {
        self.tasks
            .values()
            .filter(|r| r.phase == phase)
            .map(|r| r.id.clone())
            .collect()
    }
}

/// A single record-level mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerChange {
    Upsert(TaskRecord),
    Remove(String),
}
