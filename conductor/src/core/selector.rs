//! Conflict-aware batch selection.
//!
//! Selection walks ranked candidates greedily and enforces two constraints:
//! the concurrency cap, and that no two active tasks share a non-empty
//! conflict domain.

use std::collections::BTreeSet;

use crate::core::types::{Candidate, Scored};

/// What is already running when a batch is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    /// Ids of tasks already tracked in the ledger.
    pub tracked: BTreeSet<String>,
    /// Conflict domains claimed by tracked tasks.
    pub domains: BTreeSet<String>,
}

impl Occupancy {
    pub fn active(&self) -> usize {
        self.tracked.len()
    }

    /// Free slots under `cap`; never negative.
    pub fn free_slots(&self, cap: usize) -> usize {
        cap.saturating_sub(self.active())
    }

    fn claims(&self, domain: Option<&str>) -> bool {
        match domain {
            Some(domain) if !domain.is_empty() => self.domains.contains(domain),
            _ => false,
        }
    }

    fn claim(&mut self, candidate: &Candidate) {
        self.tracked.insert(candidate.id.clone());
        if let Some(domain) = candidate.conflict_domain.as_deref()
            && !domain.is_empty()
        {
            self.domains.insert(domain.to_string());
        }
    }
}

/// Why a manually requested task was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownCandidate,
    AlreadyTracked,
    DomainClaimed(String),
    NoFreeSlot,
    Duplicate,
}

/// Result of validating a manual selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManualSelection {
    pub accepted: Vec<Candidate>,
    pub rejected: Vec<(String, Rejection)>,
}

/// Greedily pick up to `cap - active` candidates from a ranked list.
///
/// Candidates already tracked are skipped, as is any candidate whose conflict
/// domain is claimed by a running task or by an earlier pick in this batch.
pub fn select_batch(ranked: &[Scored], occupancy: &Occupancy, cap: usize) -> Vec<Candidate> {
    let mut claimed = occupancy.clone();
    let mut free = occupancy.free_slots(cap);
    let mut picked = Vec::new();

    for scored in ranked {
        if free == 0 {
            break;
        }
        let candidate = &scored.candidate;
        if claimed.tracked.contains(&candidate.id) {
            continue;
        }
        if claimed.claims(candidate.conflict_domain.as_deref()) {
            continue;
        }
        claimed.claim(candidate);
        picked.push(candidate.clone());
        free -= 1;
    }

    picked
}

/// Validate an explicit selection against the same slot and domain rules.
///
/// Requested ids are taken in the order given; scores are ignored.
pub fn validate_manual(
    requested: &[String],
    candidates: &[Candidate],
    occupancy: &Occupancy,
    cap: usize,
) -> ManualSelection {
    let mut claimed = occupancy.clone();
    let mut free = occupancy.free_slots(cap);
    let mut seen = BTreeSet::new();
    let mut out = ManualSelection::default();

    for id in requested {
        if !seen.insert(id.clone()) {
            out.rejected.push((id.clone(), Rejection::Duplicate));
            continue;
        }
        let Some(candidate) = candidates.iter().find(|c| &c.id == id) else {
            out.rejected.push((id.clone(), Rejection::UnknownCandidate));
            continue;
        };
        if occupancy.tracked.contains(id) {
            out.rejected.push((id.clone(), Rejection::AlreadyTracked));
            continue;
        }
        if claimed.claims(candidate.conflict_domain.as_deref()) {
            let domain = candidate.conflict_domain.clone().unwrap_or_default();
            out.rejected
                .push((id.clone(), Rejection::DomainClaimed(domain)));
            continue;
        }
        if free == 0 {
            out.rejected.push((id.clone(), Rejection::NoFreeSlot));
            continue;
        }
        claimed.claim(candidate);
        out.accepted.push(candidate.clone());
        free -= 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scorer::{ScoreWeights, rank};
    use crate::core::types::Tier;
    use crate::test_support::{candidate, candidate_in};

    fn ids(picked: &[Candidate]) -> Vec<&str> {
        picked.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn cap_one_picks_the_urgent_ready_task() {
        let mut first = candidate("1");
        first.tier = Tier::Urgent;
        let mut second = candidate("2");
        second.tier = Tier::Low;
        second.blocked_by = 2;
        let ranked = rank(vec![first, second], &ScoreWeights::default());

        let picked = select_batch(&ranked, &Occupancy::default(), 1);
        assert_eq!(ids(&picked), vec!["1"]);
    }

    #[test]
    fn shared_domain_yields_one_pick() {
        let ranked = rank(
            vec![candidate_in("a", "ui"), candidate_in("b", "ui")],
            &ScoreWeights::default(),
        );
        let picked = select_batch(&ranked, &Occupancy::default(), 2);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn running_domain_blocks_new_pick() {
        let ranked = rank(
            vec![candidate_in("a", "ui"), candidate_in("b", "api")],
            &ScoreWeights::default(),
        );
        let occupancy = Occupancy {
            tracked: BTreeSet::from(["running".to_string()]),
            domains: BTreeSet::from(["ui".to_string()]),
        };
        let picked = select_batch(&ranked, &occupancy, 3);
        assert_eq!(ids(&picked), vec!["b"]);
    }

    #[test]
    fn tasks_without_domain_never_conflict() {
        let ranked = rank(
            vec![candidate("a"), candidate("b"), candidate("c")],
            &ScoreWeights::default(),
        );
        let picked = select_batch(&ranked, &Occupancy::default(), 3);
        assert_eq!(ids(&picked), vec!["a", "b", "c"]);
    }

    #[test]
    fn full_cap_selects_nothing() {
        let ranked = rank(vec![candidate("a")], &ScoreWeights::default());
        let occupancy = Occupancy {
            tracked: BTreeSet::from(["x".to_string(), "y".to_string()]),
            domains: BTreeSet::new(),
        };
        assert!(select_batch(&ranked, &occupancy, 2).is_empty());
        assert!(select_batch(&ranked, &occupancy, 1).is_empty());
    }

    #[test]
    fn already_tracked_candidate_is_skipped() {
        let ranked = rank(vec![candidate("a"), candidate("b")], &ScoreWeights::default());
        let occupancy = Occupancy {
            tracked: BTreeSet::from(["a".to_string()]),
            domains: BTreeSet::new(),
        };
        let picked = select_batch(&ranked, &occupancy, 3);
        assert_eq!(ids(&picked), vec!["b"]);
    }

    #[test]
    fn manual_selection_applies_slot_and_domain_rules() {
        let candidates = vec![
            candidate_in("a", "ui"),
            candidate_in("b", "ui"),
            candidate("c"),
            candidate("d"),
        ];
        let occupancy = Occupancy {
            tracked: BTreeSet::from(["d".to_string()]),
            domains: BTreeSet::new(),
        };
        let requested: Vec<String> = ["b", "a", "zzz", "d", "b", "c", "x"]
            .into_iter()
            .map(String::from)
            .collect();

        let selection = validate_manual(&requested, &candidates, &occupancy, 3);
        assert_eq!(ids(&selection.accepted), vec!["b", "c"]);
        assert_eq!(
            selection.rejected,
            vec![
                ("a".to_string(), Rejection::DomainClaimed("ui".to_string())),
                ("zzz".to_string(), Rejection::UnknownCandidate),
                ("d".to_string(), Rejection::AlreadyTracked),
                ("b".to_string(), Rejection::Duplicate),
                ("x".to_string(), Rejection::UnknownCandidate),
            ]
        );
    }

    #[test]
    fn manual_selection_respects_free_slots() {
        let candidates = vec![candidate("a"), candidate("b")];
        let requested = vec!["a".to_string(), "b".to_string()];
        let selection = validate_manual(&requested, &candidates, &Occupancy::default(), 1);
        assert_eq!(ids(&selection.accepted), vec!["a"]);
        assert_eq!(
            selection.rejected,
            vec![("b".to_string(), Rejection::NoFreeSlot)]
        );
    }
}
